//! The broker facade and its builder.
//!
//! [`BrokerController`] exposes the operations the presentation layer and
//! the peer-facing transport call into, and owns the periodic tasks that
//! drive scheduling and reconciliation. All collaborators are injected via
//! [`BrokerBuilder`]; every optional collaborator has a working in-memory
//! default so tests and single-site deployments need minimal wiring.

use crate::benchmark::{NoopRemoteExec, RemoteExecInterface};
use crate::repository::{FailedBatches, ForwardedOrders, OrderRepository};
use crate::timer::PeriodicTask;
use crate::{benchmark, monitors, scheduling};
use broker_accounting::{AccountingInterface, SimpleAccounting};
use broker_capacity::{
	CapacityControllerInterface, NofPrioritization, PairwiseFairnessController,
	PrioritizationInterface,
};
use broker_config::BrokerConfig;
use broker_federation::{
	AcceptAllAuthorization, FederationTransport, ForwardOutcome, ForwardRequest,
	MemberAuthorizationInterface, MemberPickerInterface, NoopTransport, RoundRobinPicker,
	with_local_member,
};
use broker_identity::{IdentityError, IdentityInterface, MapperInterface, StaticIdentity, StaticMapper};
use broker_providers::{
	BenchmarkInterface, ImageStoreInterface, ProviderRegistry, StaticImageStore, VanillaBenchmark,
};
use broker_storage::{FileSnapshotStore, SnapshotStore};
use broker_types::{
	attributes, now_millis, AccountingRecord, BrokerError, FederationMember, Instance, Order,
	OrderState, ResourcesInfo, Result, Token, GLOBAL_ID_SEPARATOR,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Shared state and collaborators, passed by `Arc` into every loop.
pub struct BrokerContext {
	pub(crate) config: BrokerConfig,
	pub(crate) identity: Arc<dyn IdentityInterface>,
	pub(crate) mapper: Arc<dyn MapperInterface>,
	pub(crate) providers: ProviderRegistry,
	pub(crate) image_store: Arc<dyn ImageStoreInterface>,
	pub(crate) benchmark: Arc<dyn BenchmarkInterface>,
	pub(crate) remote_exec: Arc<dyn RemoteExecInterface>,
	pub(crate) accounting: Arc<dyn AccountingInterface>,
	pub(crate) transport: Arc<dyn FederationTransport>,
	pub(crate) picker: Arc<dyn MemberPickerInterface>,
	pub(crate) authorization: Arc<dyn MemberAuthorizationInterface>,
	pub(crate) capacity: Arc<dyn CapacityControllerInterface>,
	pub(crate) prioritization: Arc<dyn PrioritizationInterface>,
	pub(crate) snapshots: Arc<dyn SnapshotStore>,
	pub(crate) repository: OrderRepository,
	pub(crate) forwarded: ForwardedOrders,
	pub(crate) failed_batches: FailedBatches,
	pub(crate) members: RwLock<Vec<FederationMember>>,
	pub(crate) instance_monitor: PeriodicTask,
	pub(crate) served_monitor: PeriodicTask,
}

impl BrokerContext {
	pub(crate) fn local_member_id(&self) -> &str {
		&self.config.site.member_id
	}

	pub(crate) fn current_members(&self) -> Vec<FederationMember> {
		self.members.read().expect("member list poisoned").clone()
	}

	/// Token minted from the site's federation-service credential profile.
	pub(crate) async fn federation_token(&self, order: &Order) -> Result<Token> {
		let credentials = self
			.mapper
			.credentials_for_order(order)
			.await
			.map_err(identity_error)?;
		self.identity
			.create_token(&credentials)
			.await
			.map_err(identity_error)
	}

	/// Token minted from the caller's own mapped local credentials.
	pub(crate) async fn caller_local_token(&self, access_id: &str) -> Result<Token> {
		let credentials = self
			.mapper
			.local_credentials(access_id)
			.await
			.map_err(identity_error)?;
		self.identity
			.create_token(&credentials)
			.await
			.map_err(identity_error)
	}

	pub(crate) async fn persist(&self, order: &Order) {
		if let Err(e) = self.snapshots.upsert_order(order).await {
			warn!(order = %order.id, error = %e, "order snapshot write failed");
		}
	}

	pub(crate) async fn drop_snapshot(&self, order_id: &str) {
		if let Err(e) = self.snapshots.delete_order(order_id).await {
			warn!(order = order_id, error = %e, "order snapshot delete failed");
		}
	}
}

fn identity_error(e: IdentityError) -> BrokerError {
	BrokerError::Unauthorized(e.to_string())
}

pub struct BrokerController {
	ctx: Arc<BrokerContext>,
	scheduler: PeriodicTask,
	garbage_collector: PeriodicTask,
	accounting_updater: PeriodicTask,
	capacity_updater: PeriodicTask,
	snapshot_sync: PeriodicTask,
}

impl BrokerController {
	/// Loads persisted orders and starts the periodic loops. Orders that
	/// were PENDING at shutdown go back to OPEN since their forwarding
	/// context did not survive the restart.
	pub async fn start(&self) -> Result<()> {
		let recovered = self
			.ctx
			.snapshots
			.load_orders()
			.await
			.map_err(|e| BrokerError::Storage(e.to_string()))?;
		let now = now_millis();
		let mut spawning = Vec::new();
		for mut order in recovered {
			if order.state == OrderState::Pending {
				order.providing_member_id = None;
				order.set_state(OrderState::Open, now);
			}
			// A deletion that finished tearing down before the shutdown has
			// nothing left to recover.
			if order.state == OrderState::Deleted && order.instance_id.is_none() {
				self.ctx.drop_snapshot(&order.id).await;
				continue;
			}
			if order.state == OrderState::Spawning {
				spawning.push(order.id.clone());
			}
			self.ctx.repository.add(order);
		}
		info!(
			orders = self.ctx.repository.all().len(),
			site = self.ctx.local_member_id(),
			"broker starting"
		);

		// Locally hosted instances may have died while the broker was down;
		// reconcile them now instead of waiting for the first monitor pass.
		for order in self
			.ctx
			.repository
			.orders_in(None, &[OrderState::Fulfilled, OrderState::Deleted])
		{
			if order.instance_id.is_none() {
				continue;
			}
			let hosted_locally = order
				.providing_member_id
				.as_deref()
				.map(|member| member == self.ctx.local_member_id())
				.unwrap_or(true);
			if !hosted_locally {
				continue;
			}
			if scheduling::fetch_instance(&self.ctx, &order).await.is_err() {
				warn!(order = %order.id, "recovered order lost its instance");
				scheduling::instance_removed(&self.ctx, &order.id).await;
			}
		}

		// Benchmark steps interrupted by the restart run again.
		for order_id in spawning {
			tokio::spawn(benchmark::run_post_provision(self.ctx.clone(), order_id));
		}
		monitors::ensure_instance_monitor(&self.ctx);
		monitors::ensure_served_monitor(&self.ctx);

		let timers = &self.ctx.config.timers;
		let ctx = self.ctx.clone();
		self.scheduler.start(timers.scheduler_period(), move || {
			let ctx = ctx.clone();
			async move { scheduling::check_and_submit_open_orders(&ctx).await }
		});
		let ctx = self.ctx.clone();
		self.garbage_collector
			.start(timers.garbage_collector_period(), move || {
				let ctx = ctx.clone();
				async move { monitors::garbage_collect(&ctx).await }
			});
		let ctx = self.ctx.clone();
		self.accounting_updater
			.start(timers.accounting_period(), move || {
				let ctx = ctx.clone();
				async move { monitors::accounting_tick(&ctx).await }
			});
		let ctx = self.ctx.clone();
		self.capacity_updater
			.start(timers.capacity_period(), move || {
				let ctx = ctx.clone();
				async move { monitors::capacity_tick(&ctx).await }
			});
		let ctx = self.ctx.clone();
		self.snapshot_sync
			.start(timers.snapshot_sync_period(), move || {
				let ctx = ctx.clone();
				async move { monitors::snapshot_sync(&ctx).await }
			});
		Ok(())
	}

	pub fn shutdown(&self) {
		info!("broker shutting down");
		self.scheduler.cancel();
		self.garbage_collector.cancel();
		self.accounting_updater.cancel();
		self.capacity_updater.cancel();
		self.snapshot_sync.cancel();
		self.ctx.instance_monitor.cancel();
		self.ctx.served_monitor.cancel();
	}

	/// Creates one order per requested instance. Multi-instance requests
	/// share a generated batch id so scheduling failures short-circuit
	/// across siblings.
	pub async fn create_orders(
		&self,
		access_id: &str,
		categories: Vec<broker_types::Category>,
		mut order_attributes: HashMap<String, String>,
	) -> Result<Vec<Order>> {
		let token = self
			.ctx
			.identity
			.get_token(access_id)
			.await
			.map_err(identity_error)?;

		let count: u32 = match order_attributes.get(attributes::INSTANCE_COUNT) {
			None => 1,
			Some(raw) => raw
				.parse()
				.ok()
				.filter(|count| *count >= 1)
				.ok_or_else(|| {
					BrokerError::BadRequest(format!("invalid instance count: {}", raw))
				})?,
		};
		if count > 1 && !order_attributes.contains_key(attributes::BATCH_ID) {
			order_attributes.insert(attributes::BATCH_ID.to_string(), Uuid::new_v4().to_string());
		}

		let mut orders = Vec::with_capacity(count as usize);
		for _ in 0..count {
			let order = Order::new(
				Uuid::new_v4().to_string(),
				token.clone(),
				categories.clone(),
				order_attributes.clone(),
				true,
				self.ctx.local_member_id(),
			);
			self.ctx.persist(&order).await;
			self.ctx.repository.add(order.clone());
			orders.push(order);
		}
		debug!(user = %token.user, count, "orders created");
		Ok(orders)
	}

	pub async fn get_order(&self, access_id: &str, order_id: &str) -> Result<Order> {
		let token = self
			.ctx
			.identity
			.get_token(access_id)
			.await
			.map_err(identity_error)?;
		self.ctx
			.repository
			.get_for_user(&token.user, order_id)
			.ok_or_else(|| BrokerError::NotFound(format!("order {}", order_id)))
	}

	pub async fn orders_by_user(&self, access_id: &str) -> Result<Vec<Order>> {
		let token = self
			.ctx
			.identity
			.get_token(access_id)
			.await
			.map_err(identity_error)?;
		Ok(self.ctx.repository.by_user(&token.user, false))
	}

	/// Owner-initiated removal. Removing an unknown or already-deleted
	/// order is a no-op.
	pub async fn remove_order(&self, access_id: &str, order_id: &str) -> Result<()> {
		let token = self
			.ctx
			.identity
			.get_token(access_id)
			.await
			.map_err(identity_error)?;
		let Some(order) = self.ctx.repository.get_for_user(&token.user, order_id) else {
			return Ok(());
		};
		if order.state == OrderState::Deleted {
			return Ok(());
		}
		self.remove_order_unchecked(order).await;
		Ok(())
	}

	pub async fn remove_all_orders(&self, access_id: &str) -> Result<()> {
		let token = self
			.ctx
			.identity
			.get_token(access_id)
			.await
			.map_err(identity_error)?;
		for order in self.ctx.repository.by_user(&token.user, true) {
			if order.state != OrderState::Deleted {
				self.remove_order_unchecked(order).await;
			}
		}
		Ok(())
	}

	async fn remove_order_unchecked(&self, order: Order) {
		// A pending order may have been offered to several peers; notify
		// all of them, not just the current one.
		if order.state == OrderState::Pending {
			let mut peers = self.ctx.forwarded.tried_peers(&order.id);
			if let Some(providing) = &order.providing_member_id {
				if !peers.contains(providing) {
					peers.push(providing.clone());
				}
			}
			for peer in peers {
				if let Err(e) = self.ctx.transport.cancel_order(&peer, &order.id).await {
					warn!(order = %order.id, peer = %peer, error = %e, "cancel notice failed");
				}
			}
			self.ctx.forwarded.remove(&order.id);
		}

		let now = now_millis();
		match self.ctx.repository.remove(&order.id, now) {
			Some(deleted) => {
				self.ctx.persist(&deleted).await;
				scheduling::tear_down_instance(&self.ctx, &deleted).await;
			}
			None => self.ctx.drop_snapshot(&order.id).await,
		}
	}

	/// The instance backing one of the caller's orders, with its global id.
	pub async fn get_instance(&self, access_id: &str, order_id: &str) -> Result<Instance> {
		let order = self.get_order(access_id, order_id).await?;
		let mut instance = scheduling::fetch_instance(&self.ctx, &order).await?;
		if let Some(global_id) = order.global_instance_id() {
			instance.id = global_id;
		}
		Ok(instance)
	}

	pub async fn get_instances(&self, access_id: &str) -> Result<Vec<Instance>> {
		let orders = self.orders_by_user(access_id).await?;
		let mut instances = Vec::new();
		for order in orders {
			if order.instance_id.is_none() {
				continue;
			}
			match scheduling::fetch_instance(&self.ctx, &order).await {
				Ok(mut instance) => {
					if let Some(global_id) = order.global_instance_id() {
						instance.id = global_id;
					}
					instances.push(instance);
				}
				Err(e) => warn!(order = %order.id, error = %e, "instance fetch failed"),
			}
		}
		Ok(instances)
	}

	/// Admission path for an order a peer wants this site to fulfill.
	/// Returns whether the order was queued; a rejected order never enters
	/// the repository.
	pub async fn queue_served_order(
		&self,
		requesting_member_id: &str,
		request: ForwardRequest,
	) -> bool {
		let member = FederationMember::new(requesting_member_id);
		if !self
			.ctx
			.authorization
			.can_donate_to(Some(&member), &request.token)
		{
			debug!(peer = requesting_member_id, "served order rejected by authorization");
			return false;
		}

		let fulfilled = self.ctx.repository.fulfilled_count_for_peer(requesting_member_id);
		let max_capacity = self.ctx.capacity.max_capacity(&member).await;
		if (fulfilled + 1) as f64 > max_capacity {
			info!(
				peer = requesting_member_id,
				fulfilled, max_capacity, "served order rejected by capacity"
			);
			return false;
		}

		if self.ctx.repository.contains(&request.order_id) {
			// Duplicate forward of an already-queued order.
			return true;
		}

		let mut order_attributes = request.attributes;
		// Batch ids are site-scoped; qualify them so two peers using the
		// same batch id never collide.
		if let Some(batch_id) = order_attributes.get(attributes::BATCH_ID).cloned() {
			if !batch_id.contains(GLOBAL_ID_SEPARATOR) {
				order_attributes.insert(
					attributes::BATCH_ID.to_string(),
					format!("{}{}{}", requesting_member_id, GLOBAL_ID_SEPARATOR, batch_id),
				);
			}
		}

		let order = Order::new(
			request.order_id,
			request.token,
			request.categories,
			order_attributes,
			false,
			requesting_member_id,
		);
		info!(order = %order.id, peer = requesting_member_id, "served order queued");
		self.ctx.persist(&order).await;
		self.ctx.repository.add(order);
		monitors::ensure_served_monitor(&self.ctx);
		true
	}

	/// Entry point for forward outcomes arriving from the transport; also
	/// exercised internally by the forwarding path.
	pub async fn handle_forward_reply(&self, order_id: &str, peer: &str, outcome: ForwardOutcome) {
		scheduling::handle_forward_reply(&self.ctx, order_id, peer, outcome).await;
	}

	/// Answers a peer's liveness probe for an instance it runs on our
	/// behalf (or we run on its behalf).
	pub fn instance_has_order_related_to(
		&self,
		order_id: Option<&str>,
		instance_id: &str,
	) -> bool {
		let order = match order_id {
			Some(order_id) => self.ctx.repository.get(order_id),
			None => self.ctx.repository.order_by_instance(instance_id),
		};
		match order {
			None => false,
			Some(order) => match &order.instance_id {
				None => order.state.is_in(&[OrderState::Open, OrderState::Pending]),
				Some(bound) => {
					broker_types::normalize_instance_id(bound)
						== broker_types::normalize_instance_id(instance_id)
				}
			},
		}
	}

	pub fn update_members(&self, members: Vec<FederationMember>) {
		*self.ctx.members.write().expect("member list poisoned") = members;
	}

	/// The federation membership, always including the local site.
	pub fn members(&self) -> Vec<FederationMember> {
		with_local_member(&self.ctx.current_members(), self.ctx.local_member_id())
	}

	/// Quota/usage snapshot of one member, local or remote.
	pub async fn member_quota(&self, access_id: &str, member_id: &str) -> Result<ResourcesInfo> {
		let token = self
			.ctx
			.identity
			.get_token(access_id)
			.await
			.map_err(identity_error)?;
		if member_id == self.ctx.local_member_id() {
			// Local usage is summed over every mapped credential profile.
			let mut total = ResourcesInfo::default();
			for (profile, credentials) in self.ctx.mapper.all_local_credentials().await {
				let local_token = match self.ctx.identity.create_token(&credentials).await {
					Ok(token) => token,
					Err(e) => {
						warn!(profile = %profile, error = %e, "credential profile unusable");
						continue;
					}
				};
				match self
					.ctx
					.providers
					.compute()
					.resources_info(&local_token)
					.await
				{
					Ok(info) => total.add(&info),
					Err(e) => warn!(profile = %profile, error = %e, "quota query failed"),
				}
			}
			return Ok(total);
		}
		self.ctx
			.transport
			.member_quota(member_id, &token)
			.await
			.map_err(|e| BrokerError::Transport(e.to_string()))
	}

	/// Full accounting table. Restricted to configured admin users.
	pub async fn accounting(&self, access_id: &str) -> Result<Vec<AccountingRecord>> {
		self.require_admin(access_id).await?;
		Ok(self.ctx.accounting.accounting().await)
	}

	pub async fn accounting_for(
		&self,
		access_id: &str,
		user: &str,
		requesting_member: &str,
		providing_member: &str,
	) -> Result<Option<AccountingRecord>> {
		self.require_admin(access_id).await?;
		Ok(self
			.ctx
			.accounting
			.accounting_for(user, requesting_member, providing_member)
			.await)
	}

	/// The caller's own accrued usage against one providing site. Not
	/// admin-gated; users may always see what they consumed.
	pub async fn user_usage(&self, access_id: &str, providing_member: &str) -> Result<f64> {
		let token = self
			.ctx
			.identity
			.get_token(access_id)
			.await
			.map_err(identity_error)?;
		Ok(self
			.ctx
			.accounting
			.accounting_for(&token.user, self.ctx.local_member_id(), providing_member)
			.await
			.map(|record| record.usage)
			.unwrap_or(0.0))
	}

	async fn require_admin(&self, access_id: &str) -> Result<()> {
		let token = self
			.ctx
			.identity
			.get_token(access_id)
			.await
			.map_err(identity_error)?;
		let admins = &self.ctx.config.site.admin_users;
		if admins.is_empty() || admins.iter().any(|admin| admin == &token.user) {
			Ok(())
		} else {
			Err(BrokerError::Forbidden(format!(
				"user {} may not query accounting",
				token.user
			)))
		}
	}

	#[cfg(test)]
	pub(crate) fn context(&self) -> &Arc<BrokerContext> {
		&self.ctx
	}
}

#[derive(Default)]
pub struct BrokerBuilder {
	config: Option<BrokerConfig>,
	identity: Option<Arc<dyn IdentityInterface>>,
	mapper: Option<Arc<dyn MapperInterface>>,
	providers: Option<ProviderRegistry>,
	image_store: Option<Arc<dyn ImageStoreInterface>>,
	benchmark: Option<Arc<dyn BenchmarkInterface>>,
	remote_exec: Option<Arc<dyn RemoteExecInterface>>,
	accounting: Option<Arc<dyn AccountingInterface>>,
	transport: Option<Arc<dyn FederationTransport>>,
	picker: Option<Arc<dyn MemberPickerInterface>>,
	authorization: Option<Arc<dyn MemberAuthorizationInterface>>,
	capacity: Option<Arc<dyn CapacityControllerInterface>>,
	prioritization: Option<Arc<dyn PrioritizationInterface>>,
	snapshots: Option<Arc<dyn SnapshotStore>>,
}

impl BrokerBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_config(mut self, config: BrokerConfig) -> Self {
		self.config = Some(config);
		self
	}

	pub fn with_identity(mut self, identity: Arc<dyn IdentityInterface>) -> Self {
		self.identity = Some(identity);
		self
	}

	pub fn with_mapper(mut self, mapper: Arc<dyn MapperInterface>) -> Self {
		self.mapper = Some(mapper);
		self
	}

	pub fn with_providers(mut self, providers: ProviderRegistry) -> Self {
		self.providers = Some(providers);
		self
	}

	pub fn with_image_store(mut self, image_store: Arc<dyn ImageStoreInterface>) -> Self {
		self.image_store = Some(image_store);
		self
	}

	pub fn with_benchmark(mut self, benchmark: Arc<dyn BenchmarkInterface>) -> Self {
		self.benchmark = Some(benchmark);
		self
	}

	pub fn with_remote_exec(mut self, remote_exec: Arc<dyn RemoteExecInterface>) -> Self {
		self.remote_exec = Some(remote_exec);
		self
	}

	pub fn with_accounting(mut self, accounting: Arc<dyn AccountingInterface>) -> Self {
		self.accounting = Some(accounting);
		self
	}

	pub fn with_transport(mut self, transport: Arc<dyn FederationTransport>) -> Self {
		self.transport = Some(transport);
		self
	}

	pub fn with_picker(mut self, picker: Arc<dyn MemberPickerInterface>) -> Self {
		self.picker = Some(picker);
		self
	}

	pub fn with_authorization(
		mut self,
		authorization: Arc<dyn MemberAuthorizationInterface>,
	) -> Self {
		self.authorization = Some(authorization);
		self
	}

	pub fn with_capacity_controller(
		mut self,
		capacity: Arc<dyn CapacityControllerInterface>,
	) -> Self {
		self.capacity = Some(capacity);
		self
	}

	pub fn with_prioritization(
		mut self,
		prioritization: Arc<dyn PrioritizationInterface>,
	) -> Self {
		self.prioritization = Some(prioritization);
		self
	}

	pub fn with_snapshot_store(mut self, snapshots: Arc<dyn SnapshotStore>) -> Self {
		self.snapshots = Some(snapshots);
		self
	}

	pub fn build(self) -> Result<BrokerController> {
		let config = self
			.config
			.ok_or_else(|| BrokerError::Config("configuration is required".to_string()))?;
		let providers = self
			.providers
			.ok_or_else(|| BrokerError::Config("provider registry is required".to_string()))?;

		let local_member_id = config.site.member_id.clone();
		let accounting = self
			.accounting
			.unwrap_or_else(|| Arc::new(SimpleAccounting::new()));
		let capacity = self.capacity.unwrap_or_else(|| {
			Arc::new(PairwiseFairnessController::new(
				local_member_id.clone(),
				accounting.clone(),
				config.capacity.delta,
				config.capacity.minimum_threshold,
				config.capacity.maximum_threshold,
				config.capacity.maximum_capacity,
			))
		});
		let prioritization = self.prioritization.unwrap_or_else(|| {
			Arc::new(NofPrioritization::new(
				local_member_id.clone(),
				config.site.prioritize_local,
				accounting.clone(),
			))
		});
		let snapshots = self
			.snapshots
			.unwrap_or_else(|| Arc::new(FileSnapshotStore::new(PathBuf::from(&config.storage.path))));

		let ctx = Arc::new(BrokerContext {
			identity: self.identity.unwrap_or_else(|| Arc::new(StaticIdentity::new())),
			mapper: self
				.mapper
				.unwrap_or_else(|| Arc::new(StaticMapper::for_user("federation-service"))),
			providers,
			image_store: self
				.image_store
				.unwrap_or_else(|| Arc::new(StaticImageStore::passthrough())),
			benchmark: self
				.benchmark
				.unwrap_or_else(|| Arc::new(VanillaBenchmark::new())),
			remote_exec: self.remote_exec.unwrap_or_else(|| Arc::new(NoopRemoteExec)),
			accounting,
			transport: self.transport.unwrap_or_else(|| Arc::new(NoopTransport)),
			picker: self
				.picker
				.unwrap_or_else(|| Arc::new(RoundRobinPicker::new(local_member_id.clone()))),
			authorization: self
				.authorization
				.unwrap_or_else(|| Arc::new(AcceptAllAuthorization)),
			capacity,
			prioritization,
			snapshots,
			repository: OrderRepository::new(),
			forwarded: ForwardedOrders::new(),
			failed_batches: FailedBatches::new(),
			members: RwLock::new(Vec::new()),
			instance_monitor: PeriodicTask::new("instance-monitor"),
			served_monitor: PeriodicTask::new("served-order-monitor"),
			config,
		});

		Ok(BrokerController {
			ctx,
			scheduler: PeriodicTask::new("scheduler"),
			garbage_collector: PeriodicTask::new("garbage-collector"),
			accounting_updater: PeriodicTask::new("accounting-updater"),
			capacity_updater: PeriodicTask::new("capacity-updater"),
			snapshot_sync: PeriodicTask::new("snapshot-sync"),
		})
	}
}
