//! Typed configuration for the broker.
//!
//! Defaults mirror the reference deployment: a 30s scheduler, 2min monitors,
//! 4min garbage collection, 5min accounting/persistence sync, 10min capacity
//! updates and a 5min forward timeout.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
	pub site: SiteConfig,
	#[serde(default)]
	pub timers: TimersConfig,
	#[serde(default)]
	pub ssh: SshConfig,
	#[serde(default)]
	pub capacity: CapacityConfig,
	#[serde(default)]
	pub storage: StorageConfig,
}

/// Identity and policy of the local site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
	/// This broker's federation member id.
	pub member_id: String,
	/// Users allowed to query accounting data. Empty means everyone.
	#[serde(default)]
	pub admin_users: Vec<String>,
	/// Prefer preempting orders donated by the requester's own peer.
	#[serde(default = "default_true")]
	pub prioritize_local: bool,
	/// Site SSH public key injected into forwarded and local payloads.
	#[serde(default)]
	pub public_key: Option<String>,
	/// Login user expected on provisioned instances.
	#[serde(default = "default_ssh_user")]
	pub ssh_common_user: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimersConfig {
	pub scheduler_period_ms: u64,
	pub instance_monitor_period_ms: u64,
	pub served_order_monitor_period_ms: u64,
	pub garbage_collector_period_ms: u64,
	pub accounting_period_ms: u64,
	pub capacity_period_ms: u64,
	pub snapshot_sync_period_ms: u64,
	/// How long a forwarded order may stay PENDING before being reset.
	pub forward_timeout_ms: u64,
}

impl Default for TimersConfig {
	fn default() -> Self {
		Self {
			scheduler_period_ms: 30_000,
			instance_monitor_period_ms: 120_000,
			served_order_monitor_period_ms: 120_000,
			garbage_collector_period_ms: 240_000,
			accounting_period_ms: 300_000,
			capacity_period_ms: 600_000,
			snapshot_sync_period_ms: 300_000,
			forward_timeout_ms: 300_000,
		}
	}
}

impl TimersConfig {
	pub fn scheduler_period(&self) -> Duration {
		Duration::from_millis(self.scheduler_period_ms)
	}

	pub fn instance_monitor_period(&self) -> Duration {
		Duration::from_millis(self.instance_monitor_period_ms)
	}

	pub fn served_order_monitor_period(&self) -> Duration {
		Duration::from_millis(self.served_order_monitor_period_ms)
	}

	pub fn garbage_collector_period(&self) -> Duration {
		Duration::from_millis(self.garbage_collector_period_ms)
	}

	pub fn accounting_period(&self) -> Duration {
		Duration::from_millis(self.accounting_period_ms)
	}

	pub fn capacity_period(&self) -> Duration {
		Duration::from_millis(self.capacity_period_ms)
	}

	pub fn snapshot_sync_period(&self) -> Duration {
		Duration::from_millis(self.snapshot_sync_period_ms)
	}
}

/// Bounds for the post-provision SSH reachability wait.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
	pub poll_interval_ms: u64,
	pub max_tries: u32,
}

impl Default for SshConfig {
	fn default() -> Self {
		Self {
			poll_interval_ms: 10_000,
			max_tries: 90,
		}
	}
}

impl SshConfig {
	pub fn poll_interval(&self) -> Duration {
		Duration::from_millis(self.poll_interval_ms)
	}
}

/// Fairness-driven capacity controller parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CapacityConfig {
	/// Hill-climbing step, in fulfilled-order units.
	pub delta: f64,
	/// Fairness band outside of which the controller moves capacity.
	pub minimum_threshold: f64,
	pub maximum_threshold: f64,
	/// Hard upper bound on capacity supplied to any single peer.
	pub maximum_capacity: f64,
}

impl Default for CapacityConfig {
	fn default() -> Self {
		Self {
			delta: 1.0,
			minimum_threshold: 0.8,
			maximum_threshold: 1.0,
			maximum_capacity: 100.0,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
	/// Directory for order snapshots.
	pub path: String,
}

impl Default for StorageConfig {
	fn default() -> Self {
		Self {
			path: "./data/orders".to_string(),
		}
	}
}

fn default_true() -> bool {
	true
}

fn default_ssh_user() -> String {
	"broker".to_string()
}
