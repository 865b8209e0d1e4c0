//! File-backed snapshot store.
//!
//! One JSON document per order under a base directory. Writes go to a temp
//! file first and are renamed into place so a crash mid-write never leaves
//! a truncated snapshot.

use crate::{SnapshotStore, StorageError};
use async_trait::async_trait;
use broker_types::Order;
use std::path::PathBuf;
use tokio::fs;
use tracing::warn;

pub struct FileSnapshotStore {
	base_path: PathBuf,
}

impl FileSnapshotStore {
	pub fn new(base_path: PathBuf) -> Self {
		Self { base_path }
	}

	fn order_path(&self, order_id: &str) -> PathBuf {
		// Order ids are uuids but remote ids may carry site separators.
		let safe_id = order_id.replace(['/', ':', '@'], "_");
		self.base_path.join(format!("{}.json", safe_id))
	}
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
	async fn load_orders(&self) -> Result<Vec<Order>, StorageError> {
		let mut entries = match fs::read_dir(&self.base_path).await {
			Ok(entries) => entries,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(e) => return Err(StorageError::Backend(e.to_string())),
		};

		let mut orders = Vec::new();
		while let Some(entry) = entries
			.next_entry()
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?
		{
			let path = entry.path();
			if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
				continue;
			}
			let bytes = fs::read(&path)
				.await
				.map_err(|e| StorageError::Backend(e.to_string()))?;
			match serde_json::from_slice::<Order>(&bytes) {
				Ok(order) => orders.push(order),
				// A bad snapshot should not block recovery of the rest.
				Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable order snapshot"),
			}
		}
		Ok(orders)
	}

	async fn upsert_order(&self, order: &Order) -> Result<(), StorageError> {
		fs::create_dir_all(&self.base_path)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;

		let bytes = serde_json::to_vec_pretty(order)
			.map_err(|e| StorageError::Serialization(e.to_string()))?;

		let path = self.order_path(&order.id);
		let temp_path = path.with_extension("tmp");
		fs::write(&temp_path, bytes)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;
		fs::rename(&temp_path, &path)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;
		Ok(())
	}

	async fn delete_order(&self, order_id: &str) -> Result<(), StorageError> {
		let path = self.order_path(order_id);
		match fs::remove_file(&path).await {
			Ok(_) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(StorageError::Backend(e.to_string())),
		}
	}
}
