//! Durable order snapshots.
//!
//! The broker keeps its working set in memory and mirrors every order
//! mutation into a snapshot store so a restart can recover in-flight
//! orders. The store holds one document per order; a full load happens
//! only at startup.

use async_trait::async_trait;
use broker_types::Order;
use thiserror::Error;

pub mod implementations {
	pub mod file;
}

pub use implementations::file::FileSnapshotStore;

#[derive(Debug, Error)]
pub enum StorageError {
	#[error("order not found")]
	NotFound,
	#[error("serialization error: {0}")]
	Serialization(String),
	#[error("storage backend error: {0}")]
	Backend(String),
}

/// Persistence contract for the order working set.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
	/// Loads every persisted order. Called once at startup.
	async fn load_orders(&self) -> Result<Vec<Order>, StorageError>;

	/// Writes or replaces the snapshot of one order.
	async fn upsert_order(&self, order: &Order) -> Result<(), StorageError>;

	/// Drops the snapshot of one order. Missing snapshots are fine.
	async fn delete_order(&self, order_id: &str) -> Result<(), StorageError>;
}
