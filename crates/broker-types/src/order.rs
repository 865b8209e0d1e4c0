//! The order model and its lifecycle.
//!
//! An order is a request for one allocated resource (compute, storage or
//! network), created locally by a user or donated by a federation peer. It
//! moves through the [`OrderState`] machine driven by the scheduler loop.

use crate::token::Token;
use crate::Millis;
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Separator between instance id and member id in a global instance id.
pub const GLOBAL_ID_SEPARATOR: char = '@';

/// Attribute keys recognized on orders. Keys listed in [`attributes::reserved`]
/// are scheduling metadata and are stripped before the payload reaches a
/// provider plugin.
pub mod attributes {
	pub const INSTANCE_COUNT: &str = "instance-count";
	pub const TYPE: &str = "type";
	pub const VALID_FROM: &str = "valid-from";
	pub const VALID_UNTIL: &str = "valid-until";
	pub const BATCH_ID: &str = "batch-id";
	pub const REQUIREMENTS: &str = "requirements";
	pub const RESOURCE_KIND: &str = "resource-kind";
	pub const DATA_PUBLIC_KEY: &str = "public-key-data";
	pub const USER_DATA: &str = "user-data";
	pub const EXTRA_USER_DATA: &str = "extra-user-data";
	pub const EXTRA_USER_DATA_CONTENT_TYPE: &str = "extra-user-data-content-type";
	pub const STORAGE_SIZE: &str = "storage-size";
	pub const NETWORK_ID: &str = "network-id";

	/// Keys stripped from the attribute map before a provider call.
	pub fn reserved() -> &'static [&'static str] {
		&[
			INSTANCE_COUNT,
			TYPE,
			VALID_FROM,
			VALID_UNTIL,
			BATCH_ID,
			REQUIREMENTS,
			RESOURCE_KIND,
		]
	}
}

/// Category schemes/terms carried on order payloads.
pub mod categories {
	pub const TEMPLATE_OS_SCHEME: &str = "template/os";
	pub const CREDENTIALS_SCHEME: &str = "credentials";
	pub const PUBLIC_KEY_TERM: &str = "public-key";
	pub const USER_DATA_TERM: &str = "user-data";
}

/// A resource-template tag attached to an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
	pub term: String,
	pub scheme: String,
}

impl Category {
	pub fn new(term: impl Into<String>, scheme: impl Into<String>) -> Self {
		Self {
			term: term.into(),
			scheme: scheme.into(),
		}
	}
}

/// The closed set of resource kinds an order may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
	Compute,
	Storage,
	Network,
}

impl fmt::Display for ResourceKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			ResourceKind::Compute => "compute",
			ResourceKind::Storage => "storage",
			ResourceKind::Network => "network",
		};
		write!(f, "{}", name)
	}
}

impl FromStr for ResourceKind {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"compute" => Ok(ResourceKind::Compute),
			"storage" => Ok(ResourceKind::Storage),
			"network" => Ok(ResourceKind::Network),
			other => Err(format!("unknown resource kind: {}", other)),
		}
	}
}

/// Whether an order survives the loss of its instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrderType {
	OneTime,
	Persistent,
}

/// Order lifecycle states.
///
/// `Open → Pending → Spawning → Fulfilled → (Open | Closed | Deleted)`,
/// with `Open → Closed` on expiry and `Open → Fulfilled` directly for
/// storage/network orders. `Closed` and `Deleted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderState {
	Open,
	Pending,
	Spawning,
	Fulfilled,
	Closed,
	Deleted,
}

impl OrderState {
	pub fn is_in(&self, states: &[OrderState]) -> bool {
		states.contains(self)
	}

	pub fn is_terminal(&self) -> bool {
		matches!(self, OrderState::Closed | OrderState::Deleted)
	}
}

impl fmt::Display for OrderState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			OrderState::Open => "open",
			OrderState::Pending => "pending",
			OrderState::Spawning => "spawning",
			OrderState::Fulfilled => "fulfilled",
			OrderState::Closed => "closed",
			OrderState::Deleted => "deleted",
		};
		write!(f, "{}", name)
	}
}

/// The unit of work tracked by the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
	pub id: String,
	pub federation_token: Token,
	pub instance_id: Option<String>,
	pub providing_member_id: Option<String>,
	pub requesting_member_id: String,
	/// Set when entering FULFILLED, cleared when re-entering OPEN.
	pub fulfilled_time: Option<Millis>,
	pub is_local: bool,
	pub state: OrderState,
	pub categories: Vec<Category>,
	pub attributes: HashMap<String, String>,
	pub resource_kind: ResourceKind,
}

impl Order {
	pub fn new(
		id: impl Into<String>,
		federation_token: Token,
		categories: Vec<Category>,
		attributes: HashMap<String, String>,
		is_local: bool,
		requesting_member_id: impl Into<String>,
	) -> Self {
		let resource_kind = attributes
			.get(attributes::RESOURCE_KIND)
			.and_then(|value| value.parse().ok())
			.unwrap_or(ResourceKind::Compute);
		Self {
			id: id.into(),
			federation_token,
			instance_id: None,
			providing_member_id: None,
			requesting_member_id: requesting_member_id.into(),
			fulfilled_time: None,
			is_local,
			state: OrderState::Open,
			categories,
			attributes,
			resource_kind,
		}
	}

	/// Transitions the order, maintaining the fulfilled timestamp.
	pub fn set_state(&mut self, state: OrderState, now: Millis) {
		match state {
			OrderState::Fulfilled => self.fulfilled_time = Some(now),
			OrderState::Open => self.fulfilled_time = None,
			_ => {}
		}
		self.state = state;
	}

	pub fn attribute(&self, key: &str) -> Option<&str> {
		self.attributes.get(key).map(String::as_str)
	}

	pub fn put_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
		self.attributes.insert(key.into(), value.into());
	}

	pub fn add_category(&mut self, category: Category) {
		if !self.categories.contains(&category) {
			self.categories.push(category);
		}
	}

	pub fn batch_id(&self) -> Option<&str> {
		self.attribute(attributes::BATCH_ID)
	}

	pub fn requirements(&self) -> Option<&str> {
		self.attribute(attributes::REQUIREMENTS)
	}

	pub fn is_persistent(&self) -> bool {
		self.attribute(attributes::TYPE)
			.map(|value| value == "persistent")
			.unwrap_or(false)
	}

	/// The globally unique handle for this order's instance, or `None`
	/// before an instance is bound.
	pub fn global_instance_id(&self) -> Option<String> {
		self.instance_id.as_ref().map(|instance_id| {
			global_instance_id(instance_id, self.providing_member_id.as_deref())
		})
	}

	/// True when the order is inside its `[valid-from, valid-until]` window.
	/// A malformed `valid-from` keeps the order waiting.
	pub fn is_into_valid_period(&self, now: Millis) -> bool {
		let start = match self.attribute(attributes::VALID_FROM) {
			Some(raw) => match parse_iso8601_millis(raw) {
				Some(start) => start,
				None => return false,
			},
			None => 0,
		};
		start <= now && !self.is_expired(now)
	}

	/// True once `valid-until` has passed. A malformed `valid-until` counts
	/// as expired.
	pub fn is_expired(&self, now: Millis) -> bool {
		match self.attribute(attributes::VALID_UNTIL) {
			None => false,
			Some(raw) => match parse_iso8601_millis(raw) {
				Some(until) => until < now,
				None => true,
			},
		}
	}
}

fn parse_iso8601_millis(raw: &str) -> Option<Millis> {
	DateTime::parse_from_rfc3339(raw)
		.ok()
		.map(|dt| dt.timestamp_millis() as Millis)
}

/// Builds the `instance@member` global id. A missing member id yields the
/// bare instance id; callers substitute the local site first.
pub fn global_instance_id(instance_id: &str, member_id: Option<&str>) -> String {
	match member_id {
		Some(member_id) => format!("{}{}{}", instance_id, GLOBAL_ID_SEPARATOR, member_id),
		None => instance_id.to_string(),
	}
}

/// Strips the member suffix from a possibly-global instance id.
pub fn normalize_instance_id(instance_id: &str) -> &str {
	match instance_id.find(GLOBAL_ID_SEPARATOR) {
		Some(pos) => &instance_id[..pos],
		None => instance_id,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn order_with_attributes(attributes: HashMap<String, String>) -> Order {
		Order::new(
			"order-1",
			Token::new("access", "alice"),
			Vec::new(),
			attributes,
			true,
			"local-site",
		)
	}

	#[test]
	fn resource_kind_defaults_to_compute() {
		let order = order_with_attributes(HashMap::new());
		assert_eq!(order.resource_kind, ResourceKind::Compute);

		let mut attrs = HashMap::new();
		attrs.insert(attributes::RESOURCE_KIND.to_string(), "network".to_string());
		assert_eq!(order_with_attributes(attrs).resource_kind, ResourceKind::Network);
	}

	#[test]
	fn fulfilled_time_follows_state() {
		let mut order = order_with_attributes(HashMap::new());
		assert_eq!(order.fulfilled_time, None);

		order.set_state(OrderState::Fulfilled, 42);
		assert_eq!(order.fulfilled_time, Some(42));

		order.set_state(OrderState::Open, 50);
		assert_eq!(order.fulfilled_time, None);
	}

	#[test]
	fn validity_window() {
		let mut attrs = HashMap::new();
		attrs.insert(
			attributes::VALID_FROM.to_string(),
			"2030-01-01T00:00:00Z".to_string(),
		);
		let order = order_with_attributes(attrs);
		let now = 1_000;
		assert!(!order.is_into_valid_period(now));
		assert!(!order.is_expired(now));

		let mut attrs = HashMap::new();
		attrs.insert(
			attributes::VALID_UNTIL.to_string(),
			"2000-01-01T00:00:00Z".to_string(),
		);
		let order = order_with_attributes(attrs);
		let now = chrono::Utc::now().timestamp_millis() as Millis;
		assert!(order.is_expired(now));
		assert!(!order.is_into_valid_period(now));
	}

	#[test]
	fn malformed_expiry_counts_as_expired() {
		let mut attrs = HashMap::new();
		attrs.insert(attributes::VALID_UNTIL.to_string(), "not-a-date".to_string());
		let order = order_with_attributes(attrs);
		assert!(order.is_expired(0));
	}

	#[test]
	fn global_id_round_trip() {
		assert_eq!(global_instance_id("vm-1", Some("site-a")), "vm-1@site-a");
		assert_eq!(normalize_instance_id("vm-1@site-a"), "vm-1");
		assert_eq!(normalize_instance_id("vm-1"), "vm-1");
	}
}
