//! Configuration for the escrow trade coordinator.
//!
//! Configuration is TOML. String values may reference environment variables
//! as `${VAR}` or `${VAR:-default}`, and a file may pull in other files with
//! `include = ["networks.toml", ...]`. Every top-level section must be defined
//! in exactly one file.

#[cfg(feature = "testing")]
pub mod builders;
mod loader;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use trade_types::{networks::deserialize_networks, NetworksConfig, User};

#[cfg(feature = "testing")]
pub use builders::config::ConfigBuilder;

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	#[error("Configuration error: {0}")]
	Parse(String),
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// The default Display dumps the whole input.
		ConfigError::Parse(err.message().to_string())
	}
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	pub service: ServiceConfig,
	/// Escrow deployments and RPC endpoints per chain id.
	#[serde(deserialize_with = "deserialize_networks")]
	pub networks: NetworksConfig,
	pub storage: StorageConfig,
	pub delivery: DeliveryConfig,
	pub account: AccountConfig,
	pub auth: AuthConfig,
	#[serde(default)]
	pub watcher: WatcherConfig,
	#[serde(default)]
	pub propagation: PropagationConfig,
	/// Users seeded into the record store at startup.
	#[serde(default)]
	pub users: Vec<User>,
	pub api: Option<ApiConfig>,
}

/// Settings for this coordinator instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
	pub id: String,
	/// How long an unconfirmed reconciliation entry is kept before it is dropped.
	#[serde(default = "default_monitoring_timeout_minutes")]
	pub monitoring_timeout_minutes: u64,
	/// Interval between reconciliation sweeps.
	#[serde(default = "default_reconciliation_interval_seconds")]
	pub reconciliation_interval_seconds: u64,
	/// Seller confirmation window. When set, `confirm_deadline` is derived
	/// from `payment_sent_at` the first time an order reaches `payment_sent`.
	#[serde(default)]
	pub confirm_window_seconds: Option<u64>,
}

fn default_monitoring_timeout_minutes() -> u64 {
	30
}

fn default_reconciliation_interval_seconds() -> u64 {
	60
}

/// Record store backends.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
	pub primary: String,
	pub implementations: HashMap<String, toml::Value>,
	#[serde(default = "default_cleanup_interval_seconds")]
	pub cleanup_interval_seconds: u64,
}

fn default_cleanup_interval_seconds() -> u64 {
	3600
}

/// Escrow transaction driver backends.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeliveryConfig {
	pub implementations: HashMap<String, toml::Value>,
	#[serde(default = "default_confirmations")]
	pub min_confirmations: u64,
}

fn default_confirmations() -> u64 {
	1
}

/// Signer backends.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountConfig {
	pub primary: String,
	pub implementations: HashMap<String, toml::Value>,
}

/// Authentication provider backends.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
	pub primary: String,
	pub implementations: HashMap<String, toml::Value>,
}

/// On-chain escrow event watchers used for reconciliation.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WatcherConfig {
	#[serde(default)]
	pub implementations: HashMap<String, toml::Value>,
}

/// Change propagation settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PropagationConfig {
	/// A subscription that is not established within this time is reported disconnected.
	#[serde(default = "default_subscribe_timeout_seconds")]
	pub subscribe_timeout_seconds: u64,
	/// Snapshots buffered per subscriber.
	#[serde(default = "default_buffer_size")]
	pub buffer_size: usize,
}

impl Default for PropagationConfig {
	fn default() -> Self {
		Self {
			subscribe_timeout_seconds: default_subscribe_timeout_seconds(),
			buffer_size: default_buffer_size(),
		}
	}
}

fn default_subscribe_timeout_seconds() -> u64 {
	10
}

fn default_buffer_size() -> usize {
	64
}

/// HTTP API server.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
	#[serde(default)]
	pub enabled: bool,
	#[serde(default = "default_api_host")]
	pub host: String,
	#[serde(default = "default_api_port")]
	pub port: u16,
	#[serde(default = "default_api_timeout")]
	pub timeout_seconds: u64,
	#[serde(default = "default_max_request_size")]
	pub max_request_size: usize,
	pub cors: Option<CorsConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CorsConfig {
	pub allowed_origins: Vec<String>,
	pub allowed_headers: Vec<String>,
	pub allowed_methods: Vec<String>,
}

fn default_api_host() -> String {
	"127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
	3000
}

fn default_api_timeout() -> u64 {
	30
}

fn default_max_request_size() -> usize {
	1024 * 1024
}

/// Replaces `${VAR}` and `${VAR:-default}` with environment values.
///
/// Input is capped at 1MB to bound regex work.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	const MAX_INPUT_SIZE: usize = 1024 * 1024;
	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}")
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut result = String::with_capacity(input.len());
	let mut last = 0;
	for cap in re.captures_iter(input) {
		let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
			continue;
		};
		let value = match std::env::var(var_name.as_str()) {
			Ok(v) => v,
			Err(_) => match cap.get(2) {
				Some(default) => default.as_str().to_string(),
				None => {
					return Err(ConfigError::Validation(format!(
						"Environment variable '{}' not found",
						var_name.as_str()
					)))
				},
			},
		};
		result.push_str(&input[last..full_match.start()]);
		result.push_str(&value);
		last = full_match.end();
	}
	result.push_str(&input[last..]);

	Ok(result)
}

impl Config {
	/// Loads configuration from a file, following `include` directives.
	pub async fn from_file(path: &str) -> Result<Self, ConfigError> {
		let path_buf = Path::new(path);
		let base_dir = path_buf.parent().unwrap_or_else(|| Path::new("."));

		let mut loader = loader::ConfigLoader::new(base_dir);
		let file_name = path_buf
			.file_name()
			.ok_or_else(|| ConfigError::Validation(format!("Invalid path: {}", path)))?;
		loader.load_config(file_name).await
	}

	fn validate(&self) -> Result<(), ConfigError> {
		if self.service.id.trim().is_empty() {
			return Err(ConfigError::Validation("Service ID cannot be empty".into()));
		}
		if self.service.reconciliation_interval_seconds == 0 {
			return Err(ConfigError::Validation(
				"reconciliation_interval_seconds must be greater than 0".into(),
			));
		}

		if self.networks.is_empty() {
			return Err(ConfigError::Validation(
				"Networks configuration cannot be empty".into(),
			));
		}
		for (chain_id, network) in &self.networks {
			let url = network.rpc_url.trim();
			if !(url.starts_with("http://") || url.starts_with("https://")) {
				return Err(ConfigError::Validation(format!(
					"Network {} must have an http(s) rpc_url",
					chain_id
				)));
			}
		}

		validate_primary("storage", &self.storage.primary, &self.storage.implementations)?;
		if self.storage.cleanup_interval_seconds == 0
			|| self.storage.cleanup_interval_seconds > 86400
		{
			return Err(ConfigError::Validation(
				"Storage cleanup_interval_seconds must be between 1 and 86400".into(),
			));
		}

		if self.delivery.implementations.is_empty() {
			return Err(ConfigError::Validation(
				"At least one delivery implementation required".into(),
			));
		}
		if self.delivery.min_confirmations == 0 {
			return Err(ConfigError::Validation(
				"min_confirmations must be at least 1".into(),
			));
		}
		if self.delivery.min_confirmations > 100 {
			return Err(ConfigError::Validation(
				"min_confirmations cannot exceed 100".into(),
			));
		}

		validate_primary("account", &self.account.primary, &self.account.implementations)?;
		validate_primary("auth", &self.auth.primary, &self.auth.implementations)?;

		if self.propagation.subscribe_timeout_seconds == 0 || self.propagation.buffer_size == 0 {
			return Err(ConfigError::Validation(
				"propagation subscribe_timeout_seconds and buffer_size must be greater than 0"
					.into(),
			));
		}

		let mut ids = HashSet::new();
		let mut subjects = HashSet::new();
		for user in &self.users {
			if user.id.trim().is_empty() || user.subject.trim().is_empty() {
				return Err(ConfigError::Validation(
					"Users must have a non-empty id and subject".into(),
				));
			}
			if !ids.insert(user.id.as_str()) {
				return Err(ConfigError::Validation(format!(
					"Duplicate user id '{}'",
					user.id
				)));
			}
			if !subjects.insert(user.subject.as_str()) {
				return Err(ConfigError::Validation(format!(
					"Duplicate user subject '{}'",
					user.subject
				)));
			}
		}

		Ok(())
	}
}

fn validate_primary(
	section: &str,
	primary: &str,
	implementations: &HashMap<String, toml::Value>,
) -> Result<(), ConfigError> {
	if implementations.is_empty() {
		return Err(ConfigError::Validation(format!(
			"At least one {} implementation must be configured",
			section
		)));
	}
	if !implementations.contains_key(primary) {
		return Err(ConfigError::Validation(format!(
			"Primary {} '{}' not found in implementations",
			section, primary
		)));
	}
	Ok(())
}

/// Parses a TOML string, resolving environment variables and validating.
impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		let config: Config = toml::from_str(&resolved)?;
		config.validate()?;
		Ok(config)
	}
}
