//! Federation members and their resource-usage snapshots.

use serde::{Deserialize, Serialize};

/// Aggregated quota/usage snapshot for one site, possibly summed over
/// several local credential sets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourcesInfo {
	pub cpu_idle: f64,
	pub cpu_in_use: f64,
	pub mem_idle: f64,
	pub mem_in_use: f64,
	pub instances_idle: f64,
	pub instances_in_use: f64,
}

impl ResourcesInfo {
	pub fn add(&mut self, other: &ResourcesInfo) {
		self.cpu_idle += other.cpu_idle;
		self.cpu_in_use += other.cpu_in_use;
		self.mem_idle += other.mem_idle;
		self.mem_in_use += other.mem_in_use;
		self.instances_idle += other.instances_idle;
		self.instances_in_use += other.instances_in_use;
	}
}

/// A peer broker participating in the federation. The local site is always
/// implicitly a member of the set returned by member queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FederationMember {
	pub id: String,
	pub resources: Option<ResourcesInfo>,
}

impl FederationMember {
	pub fn new(id: impl Into<String>) -> Self {
		Self {
			id: id.into(),
			resources: None,
		}
	}

	pub fn with_resources(id: impl Into<String>, resources: ResourcesInfo) -> Self {
		Self {
			id: id.into(),
			resources: Some(resources),
		}
	}
}
