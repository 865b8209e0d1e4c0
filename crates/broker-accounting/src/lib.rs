//! Usage accounting plugin contract and the wall-clock accruer.
//!
//! Accounting data drives the fairness controller and the preemption
//! policy, so the contract exposes both the full table and per-pair
//! queries.

use async_trait::async_trait;
use broker_types::{AccountingRecord, Millis, Order};

pub mod implementations {
	pub mod simple;
}

pub use implementations::simple::SimpleAccounting;

/// Periodic usage accrual over the orders that currently hold instances.
#[async_trait]
pub trait AccountingInterface: Send + Sync {
	/// Accrues usage for the given fulfilled orders up to `now`.
	async fn update(&self, orders_with_instances: &[Order], now: Millis);

	/// The whole accounting table.
	async fn accounting(&self) -> Vec<AccountingRecord>;

	/// Usage accrued for one (user, requesting site, providing site) triple.
	async fn accounting_for(
		&self,
		user: &str,
		requesting_member: &str,
		providing_member: &str,
	) -> Option<AccountingRecord>;
}
