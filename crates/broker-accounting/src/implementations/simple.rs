//! Wall-clock usage accruer.
//!
//! Each update charges every order that holds an instance for the minutes
//! elapsed since the previous update, keyed by (user, requesting site,
//! providing site). State lives in memory; the table is rebuilt from live
//! usage after a restart.

use crate::AccountingInterface;
use async_trait::async_trait;
use broker_types::{AccountingRecord, Millis, Order};
use dashmap::DashMap;
use std::sync::Mutex;
use tracing::debug;

const MILLIS_PER_MINUTE: f64 = 60_000.0;

pub struct SimpleAccounting {
	records: DashMap<(String, String, String), AccountingRecord>,
	last_update: Mutex<Option<Millis>>,
}

impl Default for SimpleAccounting {
	fn default() -> Self {
		Self::new()
	}
}

impl SimpleAccounting {
	pub fn new() -> Self {
		Self {
			records: DashMap::new(),
			last_update: Mutex::new(None),
		}
	}

	/// Seeds a usage figure directly. Test hook for fairness scenarios.
	pub fn seed(&self, user: &str, requesting: &str, providing: &str, usage: f64) {
		let key = (
			user.to_string(),
			requesting.to_string(),
			providing.to_string(),
		);
		let mut record = self
			.records
			.entry(key)
			.or_insert_with(|| AccountingRecord::new(user, requesting, providing));
		record.usage = usage;
	}
}

#[async_trait]
impl AccountingInterface for SimpleAccounting {
	async fn update(&self, orders_with_instances: &[Order], now: Millis) {
		let elapsed = {
			let mut last = self.last_update.lock().expect("accounting clock poisoned");
			let elapsed = last.map(|previous| now.saturating_sub(previous)).unwrap_or(0);
			*last = Some(now);
			elapsed
		};
		if elapsed == 0 {
			return;
		}
		let minutes = elapsed as f64 / MILLIS_PER_MINUTE;
		for order in orders_with_instances {
			if order.instance_id.is_none() {
				continue;
			}
			let providing = match order.providing_member_id.as_deref() {
				Some(providing) => providing,
				None => continue,
			};
			let key = (
				order.federation_token.user.clone(),
				order.requesting_member_id.clone(),
				providing.to_string(),
			);
			let mut record = self.records.entry(key).or_insert_with(|| {
				AccountingRecord::new(
					order.federation_token.user.clone(),
					order.requesting_member_id.clone(),
					providing,
				)
			});
			record.add_usage(minutes);
		}
		debug!(orders = orders_with_instances.len(), minutes, "accounting updated");
	}

	async fn accounting(&self) -> Vec<AccountingRecord> {
		self.records.iter().map(|entry| entry.clone()).collect()
	}

	async fn accounting_for(
		&self,
		user: &str,
		requesting_member: &str,
		providing_member: &str,
	) -> Option<AccountingRecord> {
		let key = (
			user.to_string(),
			requesting_member.to_string(),
			providing_member.to_string(),
		);
		self.records.get(&key).map(|entry| entry.clone())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use broker_types::{OrderState, Token};
	use std::collections::HashMap;

	fn fulfilled_order(user: &str, requesting: &str, providing: &str) -> Order {
		let mut order = Order::new(
			format!("order-{}", user),
			Token::new("access", user),
			Vec::new(),
			HashMap::new(),
			true,
			requesting,
		);
		order.instance_id = Some("i-1".to_string());
		order.providing_member_id = Some(providing.to_string());
		order.set_state(OrderState::Fulfilled, 0);
		order
	}

	#[tokio::test]
	async fn accrues_minutes_between_updates() {
		let accounting = SimpleAccounting::new();
		let orders = vec![fulfilled_order("alice", "site-a", "site-b")];

		// First update only establishes the clock.
		accounting.update(&orders, 0).await;
		assert!(accounting.accounting().await.is_empty());

		accounting.update(&orders, 120_000).await;
		let record = accounting
			.accounting_for("alice", "site-a", "site-b")
			.await
			.unwrap();
		assert!((record.usage - 2.0).abs() < f64::EPSILON);
	}

	#[tokio::test]
	async fn skips_orders_without_instances() {
		let accounting = SimpleAccounting::new();
		let mut order = fulfilled_order("bob", "site-a", "site-a");
		order.instance_id = None;

		accounting.update(std::slice::from_ref(&order), 0).await;
		accounting.update(std::slice::from_ref(&order), 60_000).await;
		assert!(accounting.accounting().await.is_empty());
	}
}
