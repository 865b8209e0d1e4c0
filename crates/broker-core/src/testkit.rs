//! Shared fixtures for the engine tests: a scriptable federation
//! transport, an in-memory snapshot store and a fully wired test broker.

use crate::controller::{BrokerBuilder, BrokerController};
use async_trait::async_trait;
use broker_accounting::SimpleAccounting;
use broker_config::{BrokerConfig, CapacityConfig, SiteConfig, SshConfig, StorageConfig, TimersConfig};
use broker_federation::{
	FederationError, FederationTransport, ForwardOutcome, ForwardRequest, ServedOrderReply,
};
use broker_identity::{IdentityInterface, StaticIdentity};
use broker_providers::{
	BenchmarkInterface, InMemoryProvider, ProviderInterface, ProviderRegistry, ProviderService,
};
use broker_storage::{SnapshotStore, StorageError};
use broker_types::{
	Category, Instance, Order, OrderState, ProviderError, ResourcesInfo, Token,
};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

/// Federation transport whose replies are driven by the test.
#[derive(Default)]
pub(crate) struct MockTransport {
	pub forwards: Mutex<Vec<(String, ForwardRequest)>>,
	pub cancels: Mutex<Vec<(String, String)>>,
	pub replies: Mutex<Vec<(String, ServedOrderReply)>>,
	pub removed_remote: Mutex<Vec<(String, String)>>,
	pub in_use: DashMap<String, bool>,
	pub woken: AtomicU32,
	pending: Mutex<HashMap<String, oneshot::Sender<ForwardOutcome>>>,
}

impl MockTransport {
	pub fn new() -> Self {
		Self::default()
	}

	/// Delivers a peer's outcome for a previously forwarded order.
	pub fn reply(&self, order_id: &str, outcome: ForwardOutcome) {
		let sender = self
			.pending
			.lock()
			.unwrap()
			.remove(order_id)
			.unwrap_or_else(|| panic!("no pending forward for {}", order_id));
		let _ = sender.send(outcome);
	}

	pub fn grant(&self, order_id: &str, instance_id: Option<&str>) {
		self.reply(
			order_id,
			ForwardOutcome::Granted(instance_id.map(str::to_string)),
		);
	}

	pub fn forwarded_peers(&self, order_id: &str) -> Vec<String> {
		self.forwards
			.lock()
			.unwrap()
			.iter()
			.filter(|(_, request)| request.order_id == order_id)
			.map(|(peer, _)| peer.clone())
			.collect()
	}
}

#[async_trait]
impl FederationTransport for MockTransport {
	async fn forward_order(
		&self,
		peer: &str,
		request: ForwardRequest,
	) -> oneshot::Receiver<ForwardOutcome> {
		let (tx, rx) = oneshot::channel();
		self.pending
			.lock()
			.unwrap()
			.insert(request.order_id.clone(), tx);
		self.forwards
			.lock()
			.unwrap()
			.push((peer.to_string(), request));
		rx
	}

	async fn cancel_order(&self, peer: &str, order_id: &str) -> Result<(), FederationError> {
		self.cancels
			.lock()
			.unwrap()
			.push((peer.to_string(), order_id.to_string()));
		Ok(())
	}

	async fn reply_served_order(
		&self,
		peer: &str,
		reply: ServedOrderReply,
	) -> Result<(), FederationError> {
		self.replies.lock().unwrap().push((peer.to_string(), reply));
		Ok(())
	}

	async fn instance_in_use(
		&self,
		_peer: &str,
		_global_instance_id: &str,
		order_id: &str,
	) -> Result<bool, FederationError> {
		Ok(self.in_use.get(order_id).map(|entry| *entry).unwrap_or(true))
	}

	async fn remote_instance(
		&self,
		peer: &str,
		_instance_id: &str,
	) -> Result<Instance, FederationError> {
		Err(FederationError::Unreachable(peer.to_string()))
	}

	async fn remove_remote_instance(
		&self,
		peer: &str,
		instance_id: &str,
	) -> Result<(), FederationError> {
		self.removed_remote
			.lock()
			.unwrap()
			.push((peer.to_string(), instance_id.to_string()));
		Ok(())
	}

	async fn member_quota(
		&self,
		peer: &str,
		_token: &Token,
	) -> Result<ResourcesInfo, FederationError> {
		Err(FederationError::Unreachable(peer.to_string()))
	}

	async fn wake_sleeping_hosts(&self, _vcpu: u32, _mem_mb: u32) -> Result<(), FederationError> {
		self.woken.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}
}

/// Snapshot store over a map; tests never touch the filesystem.
#[derive(Default)]
pub(crate) struct MemorySnapshotStore {
	orders: DashMap<String, Order>,
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
	async fn load_orders(&self) -> Result<Vec<Order>, StorageError> {
		Ok(self.orders.iter().map(|entry| entry.clone()).collect())
	}

	async fn upsert_order(&self, order: &Order) -> Result<(), StorageError> {
		self.orders.insert(order.id.clone(), order.clone());
		Ok(())
	}

	async fn delete_order(&self, order_id: &str) -> Result<(), StorageError> {
		self.orders.remove(order_id);
		Ok(())
	}
}

/// Delegating provider so tests keep a handle on the inner in-memory one.
pub(crate) struct SharedProvider(pub Arc<InMemoryProvider>);

#[async_trait]
impl ProviderInterface for SharedProvider {
	async fn request_instance(
		&self,
		token: &Token,
		categories: &[Category],
		attributes: &HashMap<String, String>,
		local_image_id: Option<&str>,
	) -> Result<String, ProviderError> {
		self.0
			.request_instance(token, categories, attributes, local_image_id)
			.await
	}

	async fn get_instance(
		&self,
		token: &Token,
		instance_id: &str,
	) -> Result<Instance, ProviderError> {
		self.0.get_instance(token, instance_id).await
	}

	async fn remove_instance(
		&self,
		token: &Token,
		instance_id: &str,
	) -> Result<(), ProviderError> {
		self.0.remove_instance(token, instance_id).await
	}

	async fn get_instances(&self, token: &Token) -> Result<Vec<Instance>, ProviderError> {
		self.0.get_instances(token).await
	}

	async fn resources_info(&self, token: &Token) -> Result<ResourcesInfo, ProviderError> {
		self.0.resources_info(token).await
	}
}

pub(crate) fn test_config(member_id: &str) -> BrokerConfig {
	BrokerConfig {
		site: SiteConfig {
			member_id: member_id.to_string(),
			admin_users: Vec::new(),
			prioritize_local: true,
			public_key: None,
			ssh_common_user: "broker".to_string(),
		},
		timers: TimersConfig::default(),
		ssh: SshConfig {
			poll_interval_ms: 5,
			max_tries: 3,
		},
		capacity: CapacityConfig::default(),
		storage: StorageConfig::default(),
	}
}

pub(crate) struct TestBroker {
	pub controller: BrokerController,
	pub transport: Arc<MockTransport>,
	pub compute: Arc<InMemoryProvider>,
	pub accounting: Arc<SimpleAccounting>,
	pub snapshots: Arc<MemorySnapshotStore>,
	pub access_id: String,
}

/// A broker wired against in-memory collaborators, with a token already
/// issued for user `alice`.
pub(crate) async fn test_broker(compute_quota: usize) -> TestBroker {
	test_broker_with(test_config("local"), compute_quota).await
}

pub(crate) async fn test_broker_with(config: BrokerConfig, compute_quota: usize) -> TestBroker {
	build_test_broker(config, compute_quota, None).await
}

pub(crate) async fn test_broker_with_benchmark(
	benchmark: Arc<dyn BenchmarkInterface>,
	compute_quota: usize,
) -> TestBroker {
	build_test_broker(test_config("local"), compute_quota, Some(benchmark)).await
}

async fn build_test_broker(
	config: BrokerConfig,
	compute_quota: usize,
	benchmark: Option<Arc<dyn BenchmarkInterface>>,
) -> TestBroker {
	let compute = Arc::new(InMemoryProvider::new(compute_quota));
	let registry = ProviderRegistry::new(
		Arc::new(ProviderService::new(Box::new(SharedProvider(compute.clone())))),
		Arc::new(ProviderService::new(Box::new(InMemoryProvider::new(64)))),
		Arc::new(ProviderService::new(Box::new(InMemoryProvider::new(64)))),
	);
	let transport = Arc::new(MockTransport::new());
	let accounting = Arc::new(SimpleAccounting::new());
	let identity = Arc::new(StaticIdentity::new());
	let snapshots = Arc::new(MemorySnapshotStore::default());

	let mut credentials = HashMap::new();
	credentials.insert("username".to_string(), "alice".to_string());
	let access_id = identity
		.create_token(&credentials)
		.await
		.unwrap()
		.access_id;

	let mut builder = BrokerBuilder::new()
		.with_config(config)
		.with_providers(registry)
		.with_identity(identity)
		.with_transport(transport.clone())
		.with_accounting(accounting.clone())
		.with_snapshot_store(snapshots.clone());
	if let Some(benchmark) = benchmark {
		builder = builder.with_benchmark(benchmark);
	}
	let controller = builder.build().expect("test broker wiring");

	TestBroker {
		controller,
		transport,
		compute,
		accounting,
		snapshots,
		access_id,
	}
}

/// Polls until the order reaches `state` or the budget runs out.
pub(crate) async fn wait_for_state(
	ctx: &Arc<crate::controller::BrokerContext>,
	order_id: &str,
	state: OrderState,
) -> Order {
	for _ in 0..200 {
		if let Some(order) = ctx.repository.get(order_id) {
			if order.state == state {
				return order;
			}
		}
		tokio::time::sleep(Duration::from_millis(5)).await;
	}
	panic!(
		"order {} never reached {:?}; current: {:?}",
		order_id,
		state,
		ctx.repository.get(order_id).map(|order| order.state)
	);
}
