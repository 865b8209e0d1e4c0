//! Accounting records exchanged with the accounting plugin.

use serde::{Deserialize, Serialize};

/// Accrued usage for one (user, requesting site, providing site) triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountingRecord {
	pub user: String,
	pub requesting_member: String,
	pub providing_member: String,
	pub usage: f64,
}

impl AccountingRecord {
	pub fn new(
		user: impl Into<String>,
		requesting_member: impl Into<String>,
		providing_member: impl Into<String>,
	) -> Self {
		Self {
			user: user.into(),
			requesting_member: requesting_member.into(),
			providing_member: providing_member.into(),
			usage: 0.0,
		}
	}

	pub fn add_usage(&mut self, amount: f64) {
		self.usage += amount;
	}
}
