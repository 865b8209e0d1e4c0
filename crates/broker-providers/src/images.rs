//! Image store plugin contract.

use async_trait::async_trait;
use broker_types::{ProviderError, Token};
use std::collections::HashMap;

/// Resolves a federation-wide image id to the local cloud's image id.
#[async_trait]
pub trait ImageStoreInterface: Send + Sync {
	async fn local_image_id(
		&self,
		token: &Token,
		global_image_id: &str,
	) -> Result<Option<String>, ProviderError>;
}

/// Image store backed by a fixed mapping. With an empty map the global id
/// is used as-is, which suits single-cloud deployments.
#[derive(Default)]
pub struct StaticImageStore {
	mapping: HashMap<String, String>,
}

impl StaticImageStore {
	pub fn new(mapping: HashMap<String, String>) -> Self {
		Self { mapping }
	}

	/// Pass global ids through untranslated.
	pub fn passthrough() -> Self {
		Self::default()
	}
}

#[async_trait]
impl ImageStoreInterface for StaticImageStore {
	async fn local_image_id(
		&self,
		_token: &Token,
		global_image_id: &str,
	) -> Result<Option<String>, ProviderError> {
		if self.mapping.is_empty() {
			return Ok(Some(global_image_id.to_string()));
		}
		Ok(self.mapping.get(global_image_id).cloned())
	}
}
