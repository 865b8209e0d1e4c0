//! Network-of-favors preemption policy.
//!
//! A peer's balance is what it has provided to this site minus what it has
//! consumed from it. A newly arrived order may preempt the served order of
//! the peer with the lowest balance, but only when that balance is strictly
//! below the requester's own. Local orders outrank every remote requester
//! when `prioritize_local` is set.

use crate::PrioritizationInterface;
use async_trait::async_trait;
use broker_accounting::AccountingInterface;
use broker_types::{AccountingRecord, Order, OrderState};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::debug;

pub struct NofPrioritization {
	local_member_id: String,
	prioritize_local: bool,
	accounting: Arc<dyn AccountingInterface>,
}

impl NofPrioritization {
	pub fn new(
		local_member_id: impl Into<String>,
		prioritize_local: bool,
		accounting: Arc<dyn AccountingInterface>,
	) -> Self {
		Self {
			local_member_id: local_member_id.into(),
			prioritize_local,
			accounting,
		}
	}

	fn balance(&self, member_id: &str, records: &[AccountingRecord]) -> f64 {
		let provided: f64 = records
			.iter()
			.filter(|record| {
				record.requesting_member == self.local_member_id
					&& record.providing_member == member_id
			})
			.map(|record| record.usage)
			.sum();
		let consumed: f64 = records
			.iter()
			.filter(|record| {
				record.providing_member == self.local_member_id
					&& record.requesting_member == member_id
			})
			.map(|record| record.usage)
			.sum();
		provided - consumed
	}
}

#[async_trait]
impl PrioritizationInterface for NofPrioritization {
	async fn take_from(&self, new_order: &Order, served_orders: &[Order]) -> Option<Order> {
		if served_orders.is_empty() {
			return None;
		}
		let records = self.accounting.accounting().await;
		let requester_balance = if new_order.is_local && self.prioritize_local {
			f64::INFINITY
		} else {
			self.balance(&new_order.requesting_member_id, &records)
		};

		let victim = served_orders
			.iter()
			.filter(|order| {
				!order.is_local
					&& order.instance_id.is_some()
					&& order
						.state
						.is_in(&[OrderState::Fulfilled, OrderState::Deleted])
			})
			.map(|order| (self.balance(&order.requesting_member_id, &records), order))
			.filter(|(balance, _)| *balance < requester_balance)
			.min_by(|(balance_a, order_a), (balance_b, order_b)| {
				balance_a
					.partial_cmp(balance_b)
					.unwrap_or(Ordering::Equal)
					// Equal balances: preempt the most recently fulfilled.
					.then_with(|| order_b.fulfilled_time.cmp(&order_a.fulfilled_time))
			})
			.map(|(_, order)| order.clone());

		if let Some(order) = &victim {
			debug!(
				new_order = %new_order.id,
				victim = %order.id,
				peer = %order.requesting_member_id,
				"preemption candidate selected"
			);
		}
		victim
	}
}
