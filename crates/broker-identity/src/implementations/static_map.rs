//! Static identity and mapper implementations.
//!
//! Tokens are minted from the `username` entry of the credential map and
//! remembered so `get_token` can resolve them later. The mapper hands every
//! caller the same federation credential profile.

use crate::{IdentityError, IdentityInterface, MapperInterface};
use async_trait::async_trait;
use broker_types::{Order, Token};
use chrono::{Duration, Utc};
use dashmap::DashMap;
use std::collections::HashMap;

const USERNAME_KEY: &str = "username";

/// Identity plugin backed by an in-memory token table.
pub struct StaticIdentity {
	tokens: DashMap<String, Token>,
	token_lifetime: Duration,
}

impl Default for StaticIdentity {
	fn default() -> Self {
		Self::new()
	}
}

impl StaticIdentity {
	pub fn new() -> Self {
		Self {
			tokens: DashMap::new(),
			token_lifetime: Duration::hours(24),
		}
	}
}

#[async_trait]
impl IdentityInterface for StaticIdentity {
	async fn create_token(
		&self,
		credentials: &HashMap<String, String>,
	) -> Result<Token, IdentityError> {
		let user = credentials
			.get(USERNAME_KEY)
			.ok_or_else(|| IdentityError::InvalidCredentials("missing username".into()))?;
		let access_id = uuid::Uuid::new_v4().to_string();
		let token =
			Token::new(access_id.clone(), user.clone()).with_expiry(Utc::now() + self.token_lifetime);
		self.tokens.insert(access_id, token.clone());
		Ok(token)
	}

	async fn get_token(&self, access_id: &str) -> Result<Token, IdentityError> {
		let token = self
			.tokens
			.get(access_id)
			.map(|entry| entry.clone())
			.ok_or(IdentityError::UnknownAccessId)?;
		if token.is_expired(Utc::now()) {
			return Err(IdentityError::Expired);
		}
		Ok(token)
	}
}

/// Mapper plugin with one federation credential profile for everyone.
pub struct StaticMapper {
	profile_name: String,
	credentials: HashMap<String, String>,
}

impl StaticMapper {
	pub fn new(profile_name: impl Into<String>, credentials: HashMap<String, String>) -> Self {
		Self {
			profile_name: profile_name.into(),
			credentials,
		}
	}

	/// A mapper whose single profile logs in as the given user.
	pub fn for_user(user: impl Into<String>) -> Self {
		let mut credentials = HashMap::new();
		credentials.insert(USERNAME_KEY.to_string(), user.into());
		Self::new("federation", credentials)
	}
}

#[async_trait]
impl MapperInterface for StaticMapper {
	async fn local_credentials(
		&self,
		_access_id: &str,
	) -> Result<HashMap<String, String>, IdentityError> {
		Ok(self.credentials.clone())
	}

	async fn credentials_for_order(
		&self,
		_order: &Order,
	) -> Result<HashMap<String, String>, IdentityError> {
		Ok(self.credentials.clone())
	}

	async fn all_local_credentials(&self) -> HashMap<String, HashMap<String, String>> {
		let mut all = HashMap::new();
		all.insert(self.profile_name.clone(), self.credentials.clone());
		all
	}
}
