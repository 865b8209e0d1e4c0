//! Provider-side instance view.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Attribute key for the instance's SSH-reachable public address.
pub const SSH_PUBLIC_ADDRESS_ATT: &str = "ssh-public-address";
/// Attribute key for the SSH login user on the instance.
pub const SSH_USERNAME_ATT: &str = "ssh-username";
/// Attribute key for the number of cores allocated to the instance.
pub const CORES_ATT: &str = "cores";
/// Attribute key for the memory (MiB) allocated to the instance.
pub const MEMORY_MB_ATT: &str = "memory-mb";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
	Pending,
	Active,
	Failed,
	Suspended,
}

/// One allocated resource as reported by a provider plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
	pub id: String,
	pub state: InstanceState,
	#[serde(default)]
	pub attributes: HashMap<String, String>,
}

impl Instance {
	pub fn new(id: impl Into<String>, state: InstanceState) -> Self {
		Self {
			id: id.into(),
			state,
			attributes: HashMap::new(),
		}
	}

	pub fn attribute(&self, key: &str) -> Option<&str> {
		self.attributes.get(key).map(String::as_str)
	}

	pub fn ssh_public_address(&self) -> Option<&str> {
		self.attribute(SSH_PUBLIC_ADDRESS_ATT)
	}
}
