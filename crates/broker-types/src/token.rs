//! Federation tokens issued by identity plugins.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A caller's federation credential.
///
/// Carries the user identity, the opaque access id presented on requests,
/// an optional expiry, and any plugin-specific attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
	pub access_id: String,
	pub user: String,
	pub expiry: Option<DateTime<Utc>>,
	#[serde(default)]
	pub attributes: HashMap<String, String>,
}

impl Token {
	pub fn new(access_id: impl Into<String>, user: impl Into<String>) -> Self {
		Self {
			access_id: access_id.into(),
			user: user.into(),
			expiry: None,
			attributes: HashMap::new(),
		}
	}

	pub fn with_expiry(mut self, expiry: DateTime<Utc>) -> Self {
		self.expiry = Some(expiry);
		self
	}

	pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
		matches!(self.expiry, Some(expiry) if expiry < now)
	}
}
