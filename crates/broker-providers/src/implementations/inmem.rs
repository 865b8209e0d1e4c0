//! In-memory provider with a fixed instance quota.
//!
//! Used by tests and the default service wiring. Instances become ACTIVE
//! immediately and expose a synthetic SSH address so the post-provision
//! path can run end to end.

use crate::ProviderInterface;
use async_trait::async_trait;
use broker_types::instance::{CORES_ATT, MEMORY_MB_ATT, SSH_PUBLIC_ADDRESS_ATT};
use broker_types::{Category, Instance, InstanceState, ProviderError, ResourcesInfo, Token};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

pub struct InMemoryProvider {
	max_instances: usize,
	instances: DashMap<String, Instance>,
	next_address: AtomicU64,
	rejection: Mutex<Option<ProviderError>>,
	cores_per_instance: f64,
	mem_per_instance: f64,
}

impl InMemoryProvider {
	pub fn new(max_instances: usize) -> Self {
		Self {
			max_instances,
			instances: DashMap::new(),
			next_address: AtomicU64::new(1),
			rejection: Mutex::new(None),
			cores_per_instance: 1.0,
			mem_per_instance: 1024.0,
		}
	}

	/// Marks an instance FAILED, as a real cloud might after a host fault.
	pub fn fail_instance(&self, instance_id: &str) {
		if let Some(mut instance) = self.instances.get_mut(instance_id) {
			instance.state = InstanceState::Failed;
		}
	}

	/// Makes every subsequent allocation fail with `error`, e.g. to mimic a
	/// scheduler with no eligible host.
	pub fn reject_requests_with(&self, error: ProviderError) {
		*self.rejection.lock().expect("rejection poisoned") = Some(error);
	}
}

#[async_trait]
impl ProviderInterface for InMemoryProvider {
	async fn request_instance(
		&self,
		_token: &Token,
		_categories: &[Category],
		_attributes: &HashMap<String, String>,
		_local_image_id: Option<&str>,
	) -> Result<String, ProviderError> {
		if let Some(error) = self.rejection.lock().expect("rejection poisoned").clone() {
			return Err(error);
		}
		if self.instances.len() >= self.max_instances {
			return Err(ProviderError::QuotaExceeded);
		}
		let id = format!("i-{}", uuid::Uuid::new_v4());
		let host = self.next_address.fetch_add(1, Ordering::Relaxed);
		let mut instance = Instance::new(id.clone(), InstanceState::Active);
		instance.attributes.insert(
			SSH_PUBLIC_ADDRESS_ATT.to_string(),
			format!("10.11.{}.{}:22", host / 256, host % 256),
		);
		instance
			.attributes
			.insert(CORES_ATT.to_string(), self.cores_per_instance.to_string());
		instance
			.attributes
			.insert(MEMORY_MB_ATT.to_string(), self.mem_per_instance.to_string());
		self.instances.insert(id.clone(), instance);
		Ok(id)
	}

	async fn get_instance(
		&self,
		_token: &Token,
		instance_id: &str,
	) -> Result<Instance, ProviderError> {
		self.instances
			.get(instance_id)
			.map(|entry| entry.clone())
			.ok_or(ProviderError::NotFound)
	}

	async fn remove_instance(
		&self,
		_token: &Token,
		instance_id: &str,
	) -> Result<(), ProviderError> {
		self.instances
			.remove(instance_id)
			.map(|_| ())
			.ok_or(ProviderError::NotFound)
	}

	async fn get_instances(&self, _token: &Token) -> Result<Vec<Instance>, ProviderError> {
		Ok(self.instances.iter().map(|entry| entry.clone()).collect())
	}

	async fn resources_info(&self, _token: &Token) -> Result<ResourcesInfo, ProviderError> {
		let in_use = self.instances.len() as f64;
		let idle = (self.max_instances as f64 - in_use).max(0.0);
		Ok(ResourcesInfo {
			cpu_idle: idle * self.cores_per_instance,
			cpu_in_use: in_use * self.cores_per_instance,
			mem_idle: idle * self.mem_per_instance,
			mem_in_use: in_use * self.mem_per_instance,
			instances_idle: idle,
			instances_in_use: in_use,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn token() -> Token {
		Token::new("access", "alice")
	}

	#[tokio::test]
	async fn enforces_quota() {
		let provider = InMemoryProvider::new(1);
		provider
			.request_instance(&token(), &[], &HashMap::new(), None)
			.await
			.unwrap();
		let err = provider
			.request_instance(&token(), &[], &HashMap::new(), None)
			.await;
		assert_eq!(err, Err(ProviderError::QuotaExceeded));
	}

	#[tokio::test]
	async fn instances_have_ssh_addresses() {
		let provider = InMemoryProvider::new(4);
		let id = provider
			.request_instance(&token(), &[], &HashMap::new(), None)
			.await
			.unwrap();
		let instance = provider.get_instance(&token(), &id).await.unwrap();
		assert!(instance.ssh_public_address().is_some());
		assert_eq!(instance.state, InstanceState::Active);

		provider.remove_instance(&token(), &id).await.unwrap();
		assert_eq!(
			provider.get_instance(&token(), &id).await.unwrap_err(),
			ProviderError::NotFound
		);
	}
}
