//! Pairwise fairness-driven capacity controller.
//!
//! Fairness toward a peer is the ratio of what this site consumed from the
//! peer to what it donated to the peer, computed from the accounting table.
//! Each peer gets an independent hill climber; the per-peer map is guarded
//! by one mutex so concurrent ticks for the same peer serialize.

use crate::{CapacityControllerInterface, HillClimb};
use async_trait::async_trait;
use broker_accounting::AccountingInterface;
use broker_types::{AccountingRecord, FederationMember, Millis};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

pub struct PairwiseFairnessController {
	local_member_id: String,
	accounting: Arc<dyn AccountingInterface>,
	delta: f64,
	minimum_threshold: f64,
	maximum_threshold: f64,
	maximum_capacity: f64,
	controllers: Mutex<HashMap<String, HillClimb>>,
}

impl PairwiseFairnessController {
	pub fn new(
		local_member_id: impl Into<String>,
		accounting: Arc<dyn AccountingInterface>,
		delta: f64,
		minimum_threshold: f64,
		maximum_threshold: f64,
		maximum_capacity: f64,
	) -> Self {
		Self {
			local_member_id: local_member_id.into(),
			accounting,
			delta,
			minimum_threshold,
			maximum_threshold,
			maximum_capacity,
			controllers: Mutex::new(HashMap::new()),
		}
	}

	fn donated_to(&self, member_id: &str, records: &[AccountingRecord]) -> f64 {
		records
			.iter()
			.filter(|record| {
				record.providing_member == self.local_member_id
					&& record.requesting_member == member_id
			})
			.map(|record| record.usage)
			.sum()
	}

	fn consumed_from(&self, member_id: &str, records: &[AccountingRecord]) -> f64 {
		records
			.iter()
			.filter(|record| {
				record.requesting_member == self.local_member_id
					&& record.providing_member == member_id
			})
			.map(|record| record.usage)
			.sum()
	}

	fn fairness(consumed: f64, donated: f64) -> f64 {
		if donated <= 0.0 {
			-1.0
		} else {
			consumed / donated
		}
	}
}

#[async_trait]
impl CapacityControllerInterface for PairwiseFairnessController {
	async fn update_capacity(&self, member: &FederationMember, now: Millis) {
		let records = self.accounting.accounting().await;
		let donated = self.donated_to(&member.id, &records);
		let consumed = self.consumed_from(&member.id, &records);
		let fairness = Self::fairness(consumed, donated);

		let mut controllers = self.controllers.lock().expect("capacity map poisoned");
		if let Some(climb) = controllers.get(&member.id) {
			if climb.last_updated() == Some(now) {
				panic!(
					"capacity controller for peer {} ticked twice at {}",
					member.id, now
				);
			}
		}
		let climb = controllers.entry(member.id.clone()).or_insert_with(|| {
			HillClimb::new(
				self.delta,
				self.minimum_threshold,
				self.maximum_threshold,
				self.maximum_capacity,
			)
		});
		climb.set_last_updated(now);
		climb.record_fairness(fairness);
		climb.update_capacity();
		debug!(
			peer = %member.id,
			fairness,
			capacity = climb.capacity(),
			"capacity updated"
		);
	}

	async fn max_capacity(&self, member: &FederationMember) -> f64 {
		let controllers = self.controllers.lock().expect("capacity map poisoned");
		controllers
			.get(&member.id)
			.map(|climb| climb.capacity())
			.unwrap_or(self.maximum_capacity)
	}

	async fn current_fairness(&self, member: &FederationMember) -> f64 {
		let controllers = self.controllers.lock().expect("capacity map poisoned");
		controllers
			.get(&member.id)
			.map(|climb| climb.current_fairness())
			.unwrap_or(-1.0)
	}

	async fn last_fairness(&self, member: &FederationMember) -> f64 {
		let controllers = self.controllers.lock().expect("capacity map poisoned");
		controllers
			.get(&member.id)
			.map(|climb| climb.last_fairness())
			.unwrap_or(-1.0)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use broker_accounting::SimpleAccounting;

	fn controller(accounting: Arc<SimpleAccounting>) -> PairwiseFairnessController {
		PairwiseFairnessController::new("local", accounting, 1.0, 0.8, 1.0, 10.0)
	}

	#[tokio::test]
	async fn unknown_peer_gets_maximum_capacity() {
		let controller = controller(Arc::new(SimpleAccounting::new()));
		let peer = FederationMember::new("site-a");
		assert_eq!(controller.max_capacity(&peer).await, 10.0);
		assert_eq!(controller.current_fairness(&peer).await, -1.0);
	}

	#[tokio::test]
	async fn unbalanced_exchange_shrinks_capacity() {
		let accounting = Arc::new(SimpleAccounting::new());
		// We donated 20 minutes, got 10 back: fairness 0.5.
		accounting.seed("user", "site-a", "local", 20.0);
		accounting.seed("user", "local", "site-a", 10.0);

		let controller = controller(accounting);
		let peer = FederationMember::new("site-a");
		controller.update_capacity(&peer, 1_000).await;

		assert_eq!(controller.current_fairness(&peer).await, 0.5);
		assert_eq!(controller.max_capacity(&peer).await, 9.0);
	}

	#[tokio::test]
	async fn no_donation_history_keeps_maximum() {
		let accounting = Arc::new(SimpleAccounting::new());
		accounting.seed("user", "local", "site-a", 10.0);

		let controller = controller(accounting);
		let peer = FederationMember::new("site-a");
		controller.update_capacity(&peer, 1_000).await;

		assert_eq!(controller.current_fairness(&peer).await, -1.0);
		assert_eq!(controller.max_capacity(&peer).await, 10.0);
	}

	#[tokio::test]
	#[should_panic(expected = "ticked twice")]
	async fn same_timestamp_tick_panics() {
		let controller = controller(Arc::new(SimpleAccounting::new()));
		let peer = FederationMember::new("site-a");
		controller.update_capacity(&peer, 1_000).await;
		controller.update_capacity(&peer, 1_000).await;
	}
}
