//! Identity and credential-mapping contracts.
//!
//! The identity plugin issues and resolves federation tokens; the mapper
//! plugin translates a caller (or a donated order) into the local cloud
//! credentials the providers understand. Token issuance internals are a
//! pluggable collaborator, so only the contracts live here together with a
//! static in-memory implementation used by tests and simple deployments.

use async_trait::async_trait;
use broker_types::{Order, Token};
use std::collections::HashMap;
use thiserror::Error;

pub mod implementations {
	pub mod static_map;
}

pub use implementations::static_map::{StaticIdentity, StaticMapper};

#[derive(Debug, Error)]
pub enum IdentityError {
	#[error("invalid credentials: {0}")]
	InvalidCredentials(String),
	#[error("unknown access id")]
	UnknownAccessId,
	#[error("token expired")]
	Expired,
	#[error("provider error: {0}")]
	Provider(String),
}

/// Token issuance and resolution.
#[async_trait]
pub trait IdentityInterface: Send + Sync {
	/// Issues a token for the given credential map.
	async fn create_token(
		&self,
		credentials: &HashMap<String, String>,
	) -> Result<Token, IdentityError>;

	/// Resolves a previously issued access id to its token.
	async fn get_token(&self, access_id: &str) -> Result<Token, IdentityError>;

	/// Checks an access id without returning the token.
	async fn is_valid(&self, access_id: &str) -> bool {
		self.get_token(access_id).await.is_ok()
	}

	/// Derives the token a peer may redeem on our behalf when an order is
	/// forwarded. The default keeps the caller's token as-is.
	async fn forwardable_token(&self, token: &Token) -> Result<Token, IdentityError> {
		Ok(token.clone())
	}
}

/// Maps callers and orders to local cloud credentials.
#[async_trait]
pub trait MapperInterface: Send + Sync {
	/// Credentials for a caller identified by federation access id.
	async fn local_credentials(
		&self,
		access_id: &str,
	) -> Result<HashMap<String, String>, IdentityError>;

	/// Credentials to use when fulfilling the given order with the site's
	/// federation-service identity.
	async fn credentials_for_order(
		&self,
		order: &Order,
	) -> Result<HashMap<String, String>, IdentityError>;

	/// Every distinct local credential set, keyed by profile name. The
	/// garbage collector enumerates instances under each of these.
	async fn all_local_credentials(&self) -> HashMap<String, HashMap<String, String>>;
}
