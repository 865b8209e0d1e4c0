//! Federation negotiation contracts.
//!
//! The transport carries the request/callback protocol between peer
//! brokers; the wire encoding itself is a pluggable collaborator. Order
//! forwarding is fire-and-forget with exactly one of two outcomes delivered
//! later on a oneshot channel, so the caller's reconciliation logic stays
//! explicit and testable, including its tolerance for stale or duplicate
//! replies.

mod auth;
mod picker;

pub use auth::{AcceptAllAuthorization, MemberAuthorizationInterface};
pub use picker::{MemberPickerInterface, RoundRobinPicker};

use async_trait::async_trait;
use broker_types::{Category, FederationMember, Instance, ResourcesInfo, Token};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Debug, Error)]
pub enum FederationError {
	#[error("peer unreachable: {0}")]
	Unreachable(String),
	#[error("peer rejected request: {0}")]
	Rejected(String),
	#[error("transport error: {0}")]
	Transport(String),
}

/// Payload of a forwarded order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardRequest {
	pub order_id: String,
	pub categories: Vec<Category>,
	pub attributes: HashMap<String, String>,
	/// Token the peer may redeem on the requester's behalf.
	pub token: Token,
}

/// Outcome of one forward attempt, delivered asynchronously.
///
/// `Granted(None)` means the peer answered but could not satisfy the order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardOutcome {
	Granted(Option<String>),
	Failed(String),
}

/// Final answer for an order a peer donated to us.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServedOrderReply {
	pub order_id: String,
	/// Global instance id, or `None` when fulfillment failed.
	pub instance_id: Option<String>,
}

/// Peer RPC surface consumed by the broker core.
///
/// Delivery order across peers is not guaranteed and duplicate or late
/// replies must be tolerated by the consumer.
#[async_trait]
pub trait FederationTransport: Send + Sync {
	/// Forwards an order to `peer`. The returned receiver resolves with the
	/// peer's outcome; dropping the sender (peer never answers) is handled
	/// by the caller's timeout reconciliation.
	async fn forward_order(
		&self,
		peer: &str,
		request: ForwardRequest,
	) -> oneshot::Receiver<ForwardOutcome>;

	/// Best-effort notice that a forwarded order was removed by its owner.
	async fn cancel_order(&self, peer: &str, order_id: &str) -> Result<(), FederationError>;

	/// Reports the final outcome of a served order back to its origin.
	async fn reply_served_order(
		&self,
		peer: &str,
		reply: ServedOrderReply,
	) -> Result<(), FederationError>;

	/// Asks the requesting peer whether it still references the instance
	/// backing one of our served orders.
	async fn instance_in_use(
		&self,
		peer: &str,
		global_instance_id: &str,
		order_id: &str,
	) -> Result<bool, FederationError>;

	/// Fetches the remote view of an instance a peer is running for us.
	async fn remote_instance(
		&self,
		peer: &str,
		instance_id: &str,
	) -> Result<Instance, FederationError>;

	/// Tears down an instance a peer is running for us.
	async fn remove_remote_instance(
		&self,
		peer: &str,
		instance_id: &str,
	) -> Result<(), FederationError>;

	/// Remote per-user quota query.
	async fn member_quota(
		&self,
		peer: &str,
		token: &Token,
	) -> Result<ResourcesInfo, FederationError>;

	/// Signals the power-management sidecar that capacity is wanted.
	async fn wake_sleeping_hosts(&self, vcpu: u32, mem_mb: u32) -> Result<(), FederationError>;
}

/// A transport for deployments without any peers: forwards resolve to
/// `Granted(None)` immediately and every query fails as unreachable.
pub struct NoopTransport;

#[async_trait]
impl FederationTransport for NoopTransport {
	async fn forward_order(
		&self,
		_peer: &str,
		_request: ForwardRequest,
	) -> oneshot::Receiver<ForwardOutcome> {
		let (tx, rx) = oneshot::channel();
		let _ = tx.send(ForwardOutcome::Granted(None));
		rx
	}

	async fn cancel_order(&self, _peer: &str, _order_id: &str) -> Result<(), FederationError> {
		Ok(())
	}

	async fn reply_served_order(
		&self,
		_peer: &str,
		_reply: ServedOrderReply,
	) -> Result<(), FederationError> {
		Ok(())
	}

	async fn instance_in_use(
		&self,
		_peer: &str,
		_global_instance_id: &str,
		_order_id: &str,
	) -> Result<bool, FederationError> {
		Ok(false)
	}

	async fn remote_instance(
		&self,
		peer: &str,
		_instance_id: &str,
	) -> Result<Instance, FederationError> {
		Err(FederationError::Unreachable(peer.to_string()))
	}

	async fn remove_remote_instance(
		&self,
		_peer: &str,
		_instance_id: &str,
	) -> Result<(), FederationError> {
		Ok(())
	}

	async fn member_quota(
		&self,
		peer: &str,
		_token: &Token,
	) -> Result<ResourcesInfo, FederationError> {
		Err(FederationError::Unreachable(peer.to_string()))
	}

	async fn wake_sleeping_hosts(&self, _vcpu: u32, _mem_mb: u32) -> Result<(), FederationError> {
		Ok(())
	}
}

/// Convenience view over a member list that always includes the local site.
pub fn with_local_member(members: &[FederationMember], local_id: &str) -> Vec<FederationMember> {
	let mut members = members.to_vec();
	if !members.iter().any(|member| member.id == local_id) {
		members.push(FederationMember::new(local_id));
	}
	members
}
