//! Resource provider plugin contracts.
//!
//! One [`ProviderInterface`] implementation exists per IaaS backing a
//! resource kind; the [`ProviderRegistry`] binds the closed set of kinds
//! {compute, storage, network} to their providers once at startup so no
//! string dispatch happens on the scheduling path.

use async_trait::async_trait;
use broker_types::{Category, Instance, ProviderError, ResourceKind, ResourcesInfo, Token};
use std::collections::HashMap;
use std::sync::Arc;

pub mod implementations {
	pub mod inmem;
}

mod benchmark;
mod images;

pub use benchmark::{BenchmarkInterface, VanillaBenchmark};
pub use images::{ImageStoreInterface, StaticImageStore};
pub use implementations::inmem::InMemoryProvider;

/// Contract every resource provider plugin implements.
///
/// Implementations must signal the distinguishable [`ProviderError`] kinds:
/// unauthorized, not-found, bad-request, quota-exceeded and no-valid-host.
#[async_trait]
pub trait ProviderInterface: Send + Sync {
	/// Allocates an instance and returns its provider-local id.
	async fn request_instance(
		&self,
		token: &Token,
		categories: &[Category],
		attributes: &HashMap<String, String>,
		local_image_id: Option<&str>,
	) -> Result<String, ProviderError>;

	async fn get_instance(&self, token: &Token, instance_id: &str)
		-> Result<Instance, ProviderError>;

	async fn remove_instance(
		&self,
		token: &Token,
		instance_id: &str,
	) -> Result<(), ProviderError>;

	/// Every instance visible under the credential.
	async fn get_instances(&self, token: &Token) -> Result<Vec<Instance>, ProviderError>;

	/// Quota/usage snapshot for the credential.
	async fn resources_info(&self, token: &Token) -> Result<ResourcesInfo, ProviderError>;
}

/// Thin service wrapper owning a boxed provider implementation.
pub struct ProviderService {
	provider: Box<dyn ProviderInterface>,
}

impl ProviderService {
	pub fn new(provider: Box<dyn ProviderInterface>) -> Self {
		Self { provider }
	}

	pub async fn request_instance(
		&self,
		token: &Token,
		categories: &[Category],
		attributes: &HashMap<String, String>,
		local_image_id: Option<&str>,
	) -> Result<String, ProviderError> {
		self.provider
			.request_instance(token, categories, attributes, local_image_id)
			.await
	}

	pub async fn get_instance(
		&self,
		token: &Token,
		instance_id: &str,
	) -> Result<Instance, ProviderError> {
		self.provider.get_instance(token, instance_id).await
	}

	pub async fn remove_instance(
		&self,
		token: &Token,
		instance_id: &str,
	) -> Result<(), ProviderError> {
		self.provider.remove_instance(token, instance_id).await
	}

	pub async fn get_instances(&self, token: &Token) -> Result<Vec<Instance>, ProviderError> {
		self.provider.get_instances(token).await
	}

	pub async fn resources_info(&self, token: &Token) -> Result<ResourcesInfo, ProviderError> {
		self.provider.resources_info(token).await
	}
}

/// Per-kind provider binding, resolved once per call site.
#[derive(Clone)]
pub struct ProviderRegistry {
	compute: Arc<ProviderService>,
	storage: Arc<ProviderService>,
	network: Arc<ProviderService>,
}

impl ProviderRegistry {
	pub fn new(
		compute: Arc<ProviderService>,
		storage: Arc<ProviderService>,
		network: Arc<ProviderService>,
	) -> Self {
		Self {
			compute,
			storage,
			network,
		}
	}

	pub fn service(&self, kind: ResourceKind) -> &ProviderService {
		match kind {
			ResourceKind::Compute => &self.compute,
			ResourceKind::Storage => &self.storage,
			ResourceKind::Network => &self.network,
		}
	}

	pub fn compute(&self) -> &ProviderService {
		&self.compute
	}
}
