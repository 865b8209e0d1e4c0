//! Periodic reconciliation loops.
//!
//! The instance and served-order monitors are lazy: they arm themselves
//! when matching orders appear and cancel themselves when their working
//! set drains. The garbage collector, accounting updater, capacity updater
//! and snapshot sync run for the life of the process.

use crate::controller::BrokerContext;
use crate::scheduling;
use broker_types::{now_millis, InstanceState, OrderState};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Arms the instance monitor if any order currently needs watching.
/// Starting an armed monitor is a no-op.
pub(crate) fn ensure_instance_monitor(ctx: &Arc<BrokerContext>) {
	let watched = ctx.repository.orders_in(
		None,
		&[
			OrderState::Spawning,
			OrderState::Fulfilled,
			OrderState::Deleted,
		],
	);
	if !watched.iter().any(|order| order.is_local) {
		return;
	}
	let tick_ctx = ctx.clone();
	ctx.instance_monitor.start(
		ctx.config.timers.instance_monitor_period(),
		move || {
			let ctx = tick_ctx.clone();
			async move { instance_monitor_tick(&ctx).await }
		},
	);
}

/// One instance-monitor pass: re-fetch every monitored local instance,
/// reap failures, and finish teardown of DELETED orders.
pub(crate) async fn instance_monitor_tick(ctx: &Arc<BrokerContext>) {
	let monitored = ctx
		.repository
		.orders_in(None, &[OrderState::Fulfilled, OrderState::Deleted]);
	for order in monitored.iter().filter(|order| order.is_local) {
		if order.state == OrderState::Deleted {
			scheduling::tear_down_instance(ctx, order).await;
			continue;
		}
		if order.instance_id.is_none() {
			continue;
		}
		match scheduling::fetch_instance(ctx, order).await {
			Ok(instance) if instance.state == InstanceState::Failed => {
				warn!(order = %order.id, "instance failed, reclaiming");
				scheduling::tear_down_instance(ctx, order).await;
			}
			Ok(_) => {}
			Err(e) => {
				warn!(order = %order.id, error = %e, "monitored instance vanished");
				scheduling::instance_removed(ctx, &order.id).await;
			}
		}
	}

	let still_watched = ctx.repository.orders_in(
		None,
		&[
			OrderState::Spawning,
			OrderState::Fulfilled,
			OrderState::Deleted,
		],
	);
	if !still_watched.iter().any(|order| order.is_local) {
		debug!("no orders left to monitor");
		ctx.instance_monitor.cancel();
	}
}

/// Arms the served-order monitor if any donated order is live.
pub(crate) fn ensure_served_monitor(ctx: &Arc<BrokerContext>) {
	if ctx.repository.all_served_orders().is_empty() {
		return;
	}
	let tick_ctx = ctx.clone();
	ctx.served_monitor.start(
		ctx.config.timers.served_order_monitor_period(),
		move || {
			let ctx = tick_ctx.clone();
			async move { served_monitor_tick(&ctx).await }
		},
	);
}

/// One served-order pass: confirm with each origin peer that it still
/// references the donated instance; reap orders it has forgotten.
pub(crate) async fn served_monitor_tick(ctx: &Arc<BrokerContext>) {
	for order in ctx.repository.all_served_orders() {
		let Some(global_instance_id) = order.global_instance_id() else {
			continue;
		};
		match ctx
			.transport
			.instance_in_use(&order.requesting_member_id, &global_instance_id, &order.id)
			.await
		{
			Ok(true) => {}
			Ok(false) => {
				info!(
					order = %order.id,
					peer = %order.requesting_member_id,
					"peer no longer references served order, reclaiming"
				);
				scheduling::tear_down_instance(ctx, &order).await;
			}
			// An unreachable peer is not evidence of abandonment.
			Err(e) => debug!(peer = %order.requesting_member_id, error = %e, "served-order probe failed"),
		}
	}
	if ctx.repository.all_served_orders().is_empty() {
		ctx.served_monitor.cancel();
	}
}

/// Deletes provider instances that no tracked order references, across
/// every local credential profile.
pub(crate) async fn garbage_collect(ctx: &Arc<BrokerContext>) {
	for (profile, credentials) in ctx.mapper.all_local_credentials().await {
		let token = match ctx.identity.create_token(&credentials).await {
			Ok(token) => token,
			Err(e) => {
				warn!(profile = %profile, error = %e, "credential profile unusable");
				continue;
			}
		};
		let instances = match ctx.providers.compute().get_instances(&token).await {
			Ok(instances) => instances,
			Err(e) => {
				warn!(profile = %profile, error = %e, "instance enumeration failed");
				continue;
			}
		};
		for instance in instances {
			if ctx.repository.order_by_instance(&instance.id).is_some() {
				continue;
			}
			warn!(instance = %instance.id, profile = %profile, "removing orphan instance");
			if let Err(e) = ctx
				.providers
				.compute()
				.remove_instance(&token, &instance.id)
				.await
			{
				warn!(instance = %instance.id, error = %e, "orphan removal failed");
			}
		}
	}
}

/// Accrues usage for every order currently holding an instance.
pub(crate) async fn accounting_tick(ctx: &Arc<BrokerContext>) {
	let orders = ctx.repository.orders_with_instances();
	ctx.accounting.update(&orders, now_millis()).await;
}

/// Recomputes the donation quota of every known peer.
pub(crate) async fn capacity_tick(ctx: &Arc<BrokerContext>) {
	let now = now_millis();
	for member in ctx.current_members() {
		if member.id == ctx.local_member_id() {
			continue;
		}
		ctx.capacity.update_capacity(&member, now).await;
	}
}

/// Reconciles the snapshot store against the live working set.
pub(crate) async fn snapshot_sync(ctx: &Arc<BrokerContext>) {
	let live = ctx.repository.all();
	let live_ids: HashSet<&str> = live.iter().map(|order| order.id.as_str()).collect();
	match ctx.snapshots.load_orders().await {
		Ok(persisted) => {
			for stale in persisted {
				if !live_ids.contains(stale.id.as_str()) {
					ctx.drop_snapshot(&stale.id).await;
				}
			}
		}
		Err(e) => warn!(error = %e, "snapshot enumeration failed"),
	}
	for order in live {
		ctx.persist(&order).await;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testkit::{test_broker, wait_for_state};
	use broker_accounting::AccountingInterface;
	use broker_federation::ForwardRequest;
	use broker_providers::ProviderInterface;
	use broker_types::{attributes, Token};
	use std::collections::HashMap;

	async fn fulfilled_local_order(
		broker: &crate::testkit::TestBroker,
		order_attributes: HashMap<String, String>,
	) -> broker_types::Order {
		let order = broker
			.controller
			.create_orders(&broker.access_id, Vec::new(), order_attributes)
			.await
			.unwrap()
			.remove(0);
		let ctx = broker.controller.context();
		crate::scheduling::check_and_submit_open_orders(ctx).await;
		wait_for_state(ctx, &order.id, OrderState::Fulfilled).await
	}

	#[tokio::test]
	async fn failed_instance_closes_one_time_order() {
		let broker = test_broker(4).await;
		let order = fulfilled_local_order(&broker, HashMap::new()).await;
		let ctx = broker.controller.context().clone();

		broker.compute.fail_instance(order.instance_id.as_deref().unwrap());
		instance_monitor_tick(&ctx).await;

		let closed = ctx.repository.get(&order.id).unwrap();
		assert_eq!(closed.state, OrderState::Closed);
		assert!(closed.instance_id.is_none());
		assert!(closed.providing_member_id.is_none());
	}

	#[tokio::test]
	async fn persistent_order_reopens_after_instance_loss() {
		let broker = test_broker(4).await;
		let mut order_attributes = HashMap::new();
		order_attributes.insert(attributes::TYPE.to_string(), "persistent".to_string());
		let order = fulfilled_local_order(&broker, order_attributes).await;
		let ctx = broker.controller.context().clone();

		broker.compute.fail_instance(order.instance_id.as_deref().unwrap());
		instance_monitor_tick(&ctx).await;

		let reopened = ctx.repository.get(&order.id).unwrap();
		assert_eq!(reopened.state, OrderState::Open);
		assert!(reopened.instance_id.is_none());
		assert!(reopened.fulfilled_time.is_none());

		// The next pass provisions a fresh instance.
		crate::scheduling::check_and_submit_open_orders(&ctx).await;
		let refulfilled = wait_for_state(&ctx, &order.id, OrderState::Fulfilled).await;
		assert_ne!(refulfilled.instance_id, order.instance_id);
	}

	#[tokio::test]
	async fn served_monitor_arms_for_orders_queued_after_startup() {
		let broker = test_broker(4).await;
		let ctx = broker.controller.context().clone();
		assert!(!ctx.served_monitor.is_running());

		assert!(
			broker
				.controller
				.queue_served_order(
					"site-b",
					ForwardRequest {
						order_id: "served-7".to_string(),
						categories: Vec::new(),
						attributes: HashMap::new(),
						token: Token::new("peer-access", "remote-user"),
					},
				)
				.await
		);
		assert!(ctx.served_monitor.is_running());

		crate::scheduling::check_and_submit_open_orders(&ctx).await;
		wait_for_state(&ctx, "served-7", OrderState::Fulfilled).await;
		assert!(ctx.served_monitor.is_running());
	}

	#[tokio::test]
	async fn served_monitor_reaps_orders_the_origin_forgot() {
		let broker = test_broker(4).await;
		let ctx = broker.controller.context().clone();
		assert!(
			broker
				.controller
				.queue_served_order(
					"site-b",
					ForwardRequest {
						order_id: "served-1".to_string(),
						categories: Vec::new(),
						attributes: HashMap::new(),
						token: Token::new("peer-access", "remote-user"),
					},
				)
				.await
		);
		crate::scheduling::check_and_submit_open_orders(&ctx).await;
		wait_for_state(&ctx, "served-1", OrderState::Fulfilled).await;

		served_monitor_tick(&ctx).await;
		assert!(ctx.repository.contains("served-1"));

		broker.transport.in_use.insert("served-1".to_string(), false);
		served_monitor_tick(&ctx).await;

		assert!(!ctx.repository.contains("served-1"));
		let remaining = broker
			.compute
			.get_instances(&Token::new("probe", "alice"))
			.await
			.unwrap();
		assert!(remaining.is_empty());
	}

	#[tokio::test]
	async fn garbage_collector_removes_only_orphan_instances() {
		let broker = test_broker(4).await;
		let order = fulfilled_local_order(&broker, HashMap::new()).await;
		let ctx = broker.controller.context().clone();

		let orphan = broker
			.compute
			.request_instance(&Token::new("probe", "alice"), &[], &HashMap::new(), None)
			.await
			.unwrap();

		garbage_collect(&ctx).await;

		let remaining = broker
			.compute
			.get_instances(&Token::new("probe", "alice"))
			.await
			.unwrap();
		assert_eq!(remaining.len(), 1);
		assert_ne!(remaining[0].id, orphan);
		assert_eq!(remaining[0].id, order.instance_id.unwrap());
	}

	#[tokio::test]
	async fn accounting_tick_accrues_usage_for_bound_orders() {
		let broker = test_broker(4).await;
		fulfilled_local_order(&broker, HashMap::new()).await;
		let ctx = broker.controller.context().clone();

		accounting_tick(&ctx).await;
		tokio::time::sleep(std::time::Duration::from_millis(10)).await;
		accounting_tick(&ctx).await;

		let records = broker.accounting.accounting().await;
		assert_eq!(records.len(), 1);
		assert_eq!(records[0].requesting_member, "local");
		assert_eq!(records[0].providing_member, "local");
	}
}
