//! Shared types for the federation broker.
//!
//! This crate defines the order model and its lifecycle, federation member
//! and token types, provider-facing instance types, and the error taxonomy
//! used across every other crate in the workspace.

pub mod accounting;
pub mod errors;
pub mod instance;
pub mod member;
pub mod order;
pub mod token;

pub use accounting::AccountingRecord;
pub use errors::{BrokerError, ProviderError, Result};
pub use instance::{Instance, InstanceState};
pub use member::{FederationMember, ResourcesInfo};
pub use order::{
	attributes, global_instance_id, normalize_instance_id, Category, Order, OrderState, OrderType,
	ResourceKind, GLOBAL_ID_SEPARATOR,
};
pub use token::Token;

/// Wall-clock time in milliseconds since the Unix epoch.
pub type Millis = u64;

/// Current wall-clock time in milliseconds.
pub fn now_millis() -> Millis {
	chrono::Utc::now().timestamp_millis() as Millis
}
