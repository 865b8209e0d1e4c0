//! Error taxonomy for the broker.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BrokerError>;

/// Errors signalled by resource provider plugins.
///
/// The scheduler reacts differently to each variant: quota exhaustion
/// triggers preemption, a missing valid host raises the wake-up signal,
/// everything else fails the attempt and leaves the order to retry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
	#[error("unauthorized")]
	Unauthorized,

	#[error("not found")]
	NotFound,

	#[error("quota exceeded")]
	QuotaExceeded,

	#[error("no valid host found")]
	NoValidHost,

	#[error("bad request: {0}")]
	BadRequest(String),

	#[error("provider error: {0}")]
	Other(String),
}

#[derive(Debug, Error)]
pub enum BrokerError {
	#[error("not found: {0}")]
	NotFound(String),

	#[error("unauthorized: {0}")]
	Unauthorized(String),

	#[error("forbidden: {0}")]
	Forbidden(String),

	#[error("bad request: {0}")]
	BadRequest(String),

	#[error(transparent)]
	Provider(#[from] ProviderError),

	#[error("transport error: {0}")]
	Transport(String),

	#[error("storage error: {0}")]
	Storage(String),

	#[error("configuration error: {0}")]
	Config(String),

	#[error(transparent)]
	Other(#[from] anyhow::Error),
}
