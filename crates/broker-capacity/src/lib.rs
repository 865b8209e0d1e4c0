//! Donation capacity control and preemption policy.
//!
//! Two pluggable policies live here. The capacity controller decides how
//! many instances the local site is willing to donate to each peer, driven
//! by the pairwise fairness of past exchanges. The prioritization policy
//! decides which served order to preempt when a better-standing requester
//! arrives and local capacity is exhausted.

pub mod hill_climb;

pub mod implementations {
	pub mod fairness;
	pub mod nof;
}

pub use hill_climb::HillClimb;
pub use implementations::fairness::PairwiseFairnessController;
pub use implementations::nof::NofPrioritization;

use async_trait::async_trait;
use broker_types::{FederationMember, Millis, Order};

/// Per-peer donation quota, recomputed on every capacity tick.
#[async_trait]
pub trait CapacityControllerInterface: Send + Sync {
	/// Recomputes the quota for `member` using usage accrued up to `now`.
	///
	/// Panics if called twice with the same timestamp for the same member;
	/// overlapping ticks are a wiring bug, not a runtime condition.
	async fn update_capacity(&self, member: &FederationMember, now: Millis);

	/// Instances the local site will currently donate to `member`.
	async fn max_capacity(&self, member: &FederationMember) -> f64;

	async fn current_fairness(&self, member: &FederationMember) -> f64;

	async fn last_fairness(&self, member: &FederationMember) -> f64;
}

/// Chooses a served order to preempt on behalf of `new_order`, or `None`
/// when nobody currently deserves preemption.
#[async_trait]
pub trait PrioritizationInterface: Send + Sync {
	async fn take_from(&self, new_order: &Order, served_orders: &[Order]) -> Option<Order>;
}
