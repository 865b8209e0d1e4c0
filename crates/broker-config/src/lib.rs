//! Configuration loading for the broker service.
//!
//! Loads a TOML file, substitutes `${ENV_VAR}` references, and validates the
//! result before the rest of the system sees it.

mod types;

pub use types::{
	BrokerConfig, CapacityConfig, SiteConfig, SshConfig, StorageConfig, TimersConfig,
};

use std::env;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
	#[error("file not found: {0}")]
	FileNotFound(String),

	#[error("parse error: {0}")]
	ParseError(String),

	#[error("validation error: {0}")]
	ValidationError(String),

	#[error("environment variable not found: {0}")]
	EnvVarNotFound(String),

	#[error("io error: {0}")]
	IoError(#[from] std::io::Error),
}

/// Configuration loader with environment variable substitution.
#[derive(Default)]
pub struct ConfigLoader {
	file_path: Option<String>,
}

impl ConfigLoader {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
		self.file_path = Some(path.as_ref().to_string_lossy().to_string());
		self
	}

	pub async fn load(&self) -> Result<BrokerConfig, ConfigError> {
		let file_path = self
			.file_path
			.as_ref()
			.ok_or_else(|| ConfigError::FileNotFound("no configuration file specified".into()))?;

		let content = tokio::fs::read_to_string(file_path)
			.await
			.map_err(|_| ConfigError::FileNotFound(file_path.clone()))?;

		let substituted = substitute_env_vars(&content)?;
		let config: BrokerConfig =
			toml::from_str(&substituted).map_err(|e| ConfigError::ParseError(e.to_string()))?;
		validate(&config)?;
		Ok(config)
	}
}

/// Replaces `${NAME}` references with the value of the environment variable.
fn substitute_env_vars(content: &str) -> Result<String, ConfigError> {
	let mut result = content.to_string();

	let re = regex::Regex::new(r"\$\{([^}]+)\}").expect("valid substitution pattern");
	for cap in re.captures_iter(content) {
		let full_match = &cap[0];
		let var_name = &cap[1];

		let env_value =
			env::var(var_name).map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
		result = result.replace(full_match, &env_value);
	}

	Ok(result)
}

fn validate(config: &BrokerConfig) -> Result<(), ConfigError> {
	if config.site.member_id.trim().is_empty() {
		return Err(ConfigError::ValidationError(
			"site.member_id must not be empty".into(),
		));
	}
	let timers = &config.timers;
	for (name, value) in [
		("scheduler_period_ms", timers.scheduler_period_ms),
		("instance_monitor_period_ms", timers.instance_monitor_period_ms),
		(
			"served_order_monitor_period_ms",
			timers.served_order_monitor_period_ms,
		),
		(
			"garbage_collector_period_ms",
			timers.garbage_collector_period_ms,
		),
		("accounting_period_ms", timers.accounting_period_ms),
		("capacity_period_ms", timers.capacity_period_ms),
		("snapshot_sync_period_ms", timers.snapshot_sync_period_ms),
		("forward_timeout_ms", timers.forward_timeout_ms),
	] {
		if value == 0 {
			return Err(ConfigError::ValidationError(format!(
				"timers.{} must be greater than zero",
				name
			)));
		}
	}
	let capacity = &config.capacity;
	if capacity.delta <= 0.0 {
		return Err(ConfigError::ValidationError(
			"capacity.delta must be positive".into(),
		));
	}
	if capacity.minimum_threshold <= 0.0 || capacity.minimum_threshold > capacity.maximum_threshold
	{
		return Err(ConfigError::ValidationError(
			"capacity thresholds must satisfy 0 < minimum <= maximum".into(),
		));
	}
	if capacity.maximum_capacity <= 0.0 {
		return Err(ConfigError::ValidationError(
			"capacity.maximum_capacity must be positive".into(),
		));
	}
	Ok(())
}
