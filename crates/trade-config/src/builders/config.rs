//! Fluent builder producing a valid [`Config`] without a file.

use crate::{
	AccountConfig, ApiConfig, AuthConfig, Config, DeliveryConfig, PropagationConfig,
	ServiceConfig, StorageConfig, WatcherConfig,
};
use std::collections::HashMap;
use trade_types::{NetworkConfig, NetworksConfig, User};

#[derive(Debug, Clone)]
pub struct ConfigBuilder {
	service_id: String,
	monitoring_timeout_minutes: u64,
	confirm_window_seconds: Option<u64>,
	min_confirmations: u64,
	networks: NetworksConfig,
	users: Vec<User>,
	subscribe_timeout_seconds: u64,
	api: Option<ApiConfig>,
}

impl Default for ConfigBuilder {
	fn default() -> Self {
		Self::new()
	}
}

impl ConfigBuilder {
	pub fn new() -> Self {
		Self {
			service_id: "test-coordinator".to_string(),
			monitoring_timeout_minutes: 1,
			confirm_window_seconds: None,
			min_confirmations: 1,
			networks: HashMap::new(),
			users: Vec::new(),
			subscribe_timeout_seconds: 1,
			api: None,
		}
	}

	pub fn service_id(mut self, id: impl Into<String>) -> Self {
		self.service_id = id.into();
		self
	}

	pub fn monitoring_timeout_minutes(mut self, minutes: u64) -> Self {
		self.monitoring_timeout_minutes = minutes;
		self
	}

	pub fn confirm_window_seconds(mut self, seconds: u64) -> Self {
		self.confirm_window_seconds = Some(seconds);
		self
	}

	pub fn min_confirmations(mut self, confirmations: u64) -> Self {
		self.min_confirmations = confirmations;
		self
	}

	/// Adds a chain. `escrow_address = None` models a chain without a deployment.
	pub fn network(mut self, chain_id: u64, escrow_address: Option<&str>) -> Self {
		self.networks.insert(
			chain_id,
			NetworkConfig {
				rpc_url: format!("http://localhost:{}", 8545 + self.networks.len()),
				escrow_address: escrow_address.map(str::to_string),
				block_time_seconds: Some(1),
			},
		);
		self
	}

	pub fn user(mut self, id: &str, subject: &str, address: Option<&str>) -> Self {
		self.users.push(User {
			id: id.to_string(),
			subject: subject.to_string(),
			address: address.map(trade_types::normalize_address),
		});
		self
	}

	pub fn subscribe_timeout_seconds(mut self, seconds: u64) -> Self {
		self.subscribe_timeout_seconds = seconds;
		self
	}

	pub fn api(mut self, api: ApiConfig) -> Self {
		self.api = Some(api);
		self
	}

	pub fn build(self) -> Config {
		let table = |name: &str| {
			HashMap::from([(name.to_string(), toml::Value::Table(toml::Table::new()))])
		};

		Config {
			service: ServiceConfig {
				id: self.service_id,
				monitoring_timeout_minutes: self.monitoring_timeout_minutes,
				reconciliation_interval_seconds: 60,
				confirm_window_seconds: self.confirm_window_seconds,
			},
			networks: self.networks,
			storage: StorageConfig {
				primary: "memory".to_string(),
				implementations: table("memory"),
				cleanup_interval_seconds: 60,
			},
			delivery: DeliveryConfig {
				implementations: table("evm_alloy"),
				min_confirmations: self.min_confirmations,
			},
			account: AccountConfig {
				primary: "local".to_string(),
				implementations: table("local"),
			},
			auth: AuthConfig {
				primary: "static".to_string(),
				implementations: table("static"),
			},
			watcher: WatcherConfig::default(),
			propagation: PropagationConfig {
				subscribe_timeout_seconds: self.subscribe_timeout_seconds,
				..PropagationConfig::default()
			},
			users: self.users,
			api: self.api,
		}
	}
}
