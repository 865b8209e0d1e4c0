//! Post-provision flow for compute instances.
//!
//! Runs out-of-band after an instance is bound: optionally waits for SSH
//! reachability, swaps the injected temporary key for the order's real
//! public key, runs the benchmark plugin, finalizes the order state and
//! notifies the origin peer for served orders. Completion of this flow is
//! what arms the instance monitor.

use crate::controller::BrokerContext;
use crate::{monitors, scheduling, userdata};
use async_trait::async_trait;
use broker_types::{attributes, now_millis, BrokerError, OrderState};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Command execution on a provisioned instance. SSH session management is
/// a pluggable collaborator; only its contract lives here.
#[async_trait]
pub trait RemoteExecInterface: Send + Sync {
	async fn is_reachable(&self, address: &str) -> bool;

	async fn run(&self, address: &str, user: &str, command: &str) -> Result<String, BrokerError>;
}

/// Remote exec that treats every instance as immediately reachable and
/// swallows commands. Suits tests and clouds without SSH access.
pub struct NoopRemoteExec;

#[async_trait]
impl RemoteExecInterface for NoopRemoteExec {
	async fn is_reachable(&self, _address: &str) -> bool {
		true
	}

	async fn run(
		&self,
		_address: &str,
		_user: &str,
		_command: &str,
	) -> Result<String, BrokerError> {
		Ok(String::new())
	}
}

enum SshWait {
	Ready(String),
	Unreachable,
	OrderGone,
}

pub(crate) async fn run_post_provision(ctx: Arc<BrokerContext>, order_id: String) {
	if ctx.config.site.public_key.is_some() {
		match wait_for_ssh(&ctx, &order_id).await {
			SshWait::Ready(address) => replace_public_key(&ctx, &order_id, &address).await,
			SshWait::Unreachable => {
				warn!(order = %order_id, "instance never became reachable, skipping key swap")
			}
			SshWait::OrderGone => return,
		}
	}

	let Some(order) = ctx.repository.get(&order_id) else {
		return;
	};
	let Some(global_instance_id) = order.global_instance_id() else {
		return;
	};

	let instance = scheduling::fetch_instance(&ctx, &order).await.ok();
	ctx.benchmark.run(&global_instance_id, instance.as_ref()).await;

	// Finalize under the shard lock and only from SPAWNING; a deletion that
	// landed during the awaits above must stay terminal.
	let now = now_millis();
	let finalized = ctx
		.repository
		.update(&order_id, |o| {
			if o.state == OrderState::Spawning {
				o.set_state(OrderState::Fulfilled, now);
			}
		})
		.filter(|o| o.state == OrderState::Fulfilled);
	if let Some(updated) = finalized {
		info!(order = %order_id, instance = %global_instance_id, "order fulfilled");
		ctx.persist(&updated).await;
		if !updated.is_local {
			scheduling::notify_served_outcome(&ctx, &updated).await;
			monitors::ensure_served_monitor(&ctx);
		}
	}
	// A forwarded order granted by a peer is no longer in flight.
	ctx.forwarded.remove(&order_id);
	monitors::ensure_instance_monitor(&ctx);
}

/// Polls until the instance exposes an SSH address and answers on it, up
/// to the configured retry budget.
async fn wait_for_ssh(ctx: &Arc<BrokerContext>, order_id: &str) -> SshWait {
	for _ in 0..ctx.config.ssh.max_tries {
		let Some(order) = ctx.repository.get(order_id) else {
			return SshWait::OrderGone;
		};
		if order.state == OrderState::Deleted {
			return SshWait::OrderGone;
		}
		if let Ok(instance) = scheduling::fetch_instance(ctx, &order).await {
			if let Some(address) = instance.ssh_public_address() {
				if ctx.remote_exec.is_reachable(address).await {
					return SshWait::Ready(address.to_string());
				}
			}
		}
		tokio::time::sleep(ctx.config.ssh.poll_interval()).await;
	}
	SshWait::Unreachable
}

/// Appends the order's real public key on the instance, replacing reliance
/// on the site's temporary key.
async fn replace_public_key(ctx: &Arc<BrokerContext>, order_id: &str, address: &str) {
	let Some(order) = ctx.repository.get(order_id) else {
		return;
	};
	let Some(public_key) = order.attribute(attributes::DATA_PUBLIC_KEY) else {
		debug!(order = order_id, "order carries no public key to install");
		return;
	};
	let command = userdata::authorize_key_command(public_key);
	if let Err(e) = ctx
		.remote_exec
		.run(address, &ctx.config.site.ssh_common_user, &command)
		.await
	{
		warn!(order = order_id, error = %e, "public key installation failed");
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::scheduling;
	use crate::testkit::test_broker_with_benchmark;
	use broker_providers::BenchmarkInterface;
	use broker_types::Instance;
	use std::collections::HashMap;
	use std::sync::Mutex;
	use tokio::sync::{oneshot, Semaphore};

	/// Benchmark that signals when it starts and blocks until released.
	struct GatedBenchmark {
		started: Mutex<Option<oneshot::Sender<()>>>,
		release: Semaphore,
	}

	#[async_trait]
	impl BenchmarkInterface for GatedBenchmark {
		async fn run(&self, _global_instance_id: &str, _instance: Option<&Instance>) {
			if let Some(tx) = self.started.lock().unwrap().take() {
				let _ = tx.send(());
			}
			let _permit = self.release.acquire().await.unwrap();
		}

		async fn remove(&self, _global_instance_id: &str) {}

		async fn power(&self, _global_instance_id: &str) -> Option<f64> {
			None
		}
	}

	#[tokio::test]
	async fn deletion_during_benchmark_stays_terminal() {
		let (started_tx, started_rx) = oneshot::channel();
		let benchmark = Arc::new(GatedBenchmark {
			started: Mutex::new(Some(started_tx)),
			release: Semaphore::new(0),
		});
		let broker = test_broker_with_benchmark(benchmark.clone(), 4).await;
		let ctx = broker.controller.context().clone();
		let order = broker
			.controller
			.create_orders(&broker.access_id, Vec::new(), HashMap::new())
			.await
			.unwrap()
			.remove(0);

		scheduling::check_and_submit_open_orders(&ctx).await;
		started_rx.await.unwrap();
		assert_eq!(
			ctx.repository.get(&order.id).unwrap().state,
			OrderState::Spawning
		);

		// The owner deletes while the benchmark runs; instance teardown is
		// still in flight, so the order sits in the repository as DELETED.
		let _ = ctx.repository.remove(&order.id, now_millis());
		benchmark.release.add_permits(1);
		tokio::time::sleep(std::time::Duration::from_millis(30)).await;

		let after = ctx.repository.get(&order.id).unwrap();
		assert_eq!(after.state, OrderState::Deleted);

		// Teardown completes and the order leaves the working set for good.
		crate::monitors::instance_monitor_tick(&ctx).await;
		assert!(ctx.repository.get(&order.id).is_none());
	}
}
