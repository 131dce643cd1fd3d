//! Builder composing a [`TradeEngine`] from configuration and factories.
//!
//! Every pluggable component (storage, account, auth, delivery, watcher) is
//! created through a factory looked up by the implementation name used in
//! the configuration.

use crate::engine::{event_bus::EventBus, TradeEngine};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use trade_account::{AccountError, AccountInterface, AccountService};
use trade_auth::{AuthError, AuthService, IdentityInterface};
use trade_config::Config;
use trade_delivery::{DeliveryError, DeliveryInterface, DeliveryService};
use trade_storage::{StorageError, StorageInterface, StorageService};
use trade_types::{NetworksConfig, SecretString};
use trade_watcher::{WatchError, WatchInterface, WatchService};

#[derive(Debug, Error)]
pub enum BuilderError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Missing required component: {0}")]
	MissingComponent(String),
}

pub struct TradeFactories<SF, AF, IF, DF, WF> {
	pub storage_factories: HashMap<String, SF>,
	pub account_factories: HashMap<String, AF>,
	pub auth_factories: HashMap<String, IF>,
	pub delivery_factories: HashMap<String, DF>,
	pub watcher_factories: HashMap<String, WF>,
}

pub struct TradeBuilder {
	config: Config,
}

/// Creates the primary implementation of a single-primary component.
fn build_primary<T: ?Sized, E: std::fmt::Display>(
	component: &str,
	primary: &str,
	implementations: &HashMap<String, toml::Value>,
	create: impl Fn(&str, &toml::Value) -> Option<Result<Box<T>, E>>,
) -> Result<Box<T>, BuilderError> {
	let mut loaded = HashMap::new();
	for (name, config) in implementations {
		match create(name, config) {
			Some(Ok(implementation)) => {
				let is_primary = primary == name;
				tracing::info!(component = component, implementation = %name, enabled = %is_primary, "Loaded");
				loaded.insert(name.clone(), implementation);
			},
			Some(Err(e)) => {
				tracing::error!(
					component = component,
					implementation = %name,
					error = %e,
					"Failed to create implementation"
				);
				return Err(BuilderError::Config(format!(
					"Failed to create {} implementation '{}': {}",
					component, name, e
				)));
			},
			None => {
				tracing::warn!(component = component, implementation = %name, "Unknown implementation, skipping");
			},
		}
	}

	if loaded.is_empty() {
		return Err(BuilderError::MissingComponent(component.to_string()));
	}

	loaded.remove(primary).ok_or_else(|| {
		BuilderError::Config(format!(
			"Primary {} '{}' failed to load or has invalid configuration",
			component, primary
		))
	})
}

impl TradeBuilder {
	pub fn new(config: Config) -> Self {
		Self { config }
	}

	pub async fn build<SF, AF, IF, DF, WF>(
		self,
		factories: TradeFactories<SF, AF, IF, DF, WF>,
	) -> Result<TradeEngine, BuilderError>
	where
		SF: Fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>,
		AF: Fn(&toml::Value) -> Result<Box<dyn AccountInterface>, AccountError>,
		IF: Fn(&toml::Value) -> Result<Box<dyn IdentityInterface>, AuthError>,
		DF: Fn(
			&toml::Value,
			&NetworksConfig,
			&[SecretString],
		) -> Result<Box<dyn DeliveryInterface>, DeliveryError>,
		WF: Fn(&toml::Value, &NetworksConfig) -> Result<Box<dyn WatchInterface>, WatchError>,
	{
		let config = &self.config;

		let storage_backend = build_primary(
			"storage",
			&config.storage.primary,
			&config.storage.implementations,
			|name, cfg| factories.storage_factories.get(name).map(|f| f(cfg)),
		)?;
		let storage = Arc::new(StorageService::new(storage_backend));

		let account_backend = build_primary(
			"account",
			&config.account.primary,
			&config.account.implementations,
			|name, cfg| factories.account_factories.get(name).map(|f| f(cfg)),
		)?;
		let account = Arc::new(AccountService::new(account_backend));

		let auth_backend = build_primary(
			"auth",
			&config.auth.primary,
			&config.auth.implementations,
			|name, cfg| factories.auth_factories.get(name).map(|f| f(cfg)),
		)?;
		let auth = Arc::new(AuthService::new(auth_backend));

		let signing_keys = account.signing_keys().await.map_err(|e| {
			tracing::error!(component = "account", error = %e, "Failed to load signing keys");
			BuilderError::Config(format!("Failed to load signing keys: {}", e))
		})?;

		let mut providers: HashMap<u64, Arc<dyn DeliveryInterface>> = HashMap::new();
		for (name, impl_config) in &config.delivery.implementations {
			let Some(factory) = factories.delivery_factories.get(name) else {
				continue;
			};
			let implementation: Arc<dyn DeliveryInterface> =
				match factory(impl_config, &config.networks, &signing_keys) {
					Ok(implementation) => implementation.into(),
					Err(e) => {
						tracing::error!(
							component = "delivery",
							implementation = %name,
							error = %e,
							"Failed to create delivery implementation"
						);
						return Err(BuilderError::Config(format!(
							"Failed to create delivery implementation '{}': {}",
							name, e
						)));
					},
				};

			for network_id in delivery_network_ids(impl_config, &config.networks) {
				providers.insert(network_id, implementation.clone());
				tracing::info!(component = "delivery", implementation = %name, network_id = %network_id, "Loaded");
			}
		}

		if providers.is_empty() {
			tracing::warn!("No delivery implementations available - escrow transitions will fail");
		}

		let delivery = Arc::new(DeliveryService::new(
			providers,
			account.clone(),
			config.networks.clone(),
			config.delivery.min_confirmations,
		));

		let mut watchers = Vec::new();
		for (name, impl_config) in &config.watcher.implementations {
			let Some(factory) = factories.watcher_factories.get(name) else {
				continue;
			};
			match factory(impl_config, &config.networks) {
				Ok(implementation) => {
					tracing::info!(component = "watcher", implementation = %name, "Loaded");
					watchers.push(implementation);
				},
				Err(e) => {
					tracing::error!(
						component = "watcher",
						implementation = %name,
						error = %e,
						"Failed to create watcher implementation"
					);
					return Err(BuilderError::Config(format!(
						"Failed to create watcher implementation '{}': {}",
						name, e
					)));
				},
			}
		}

		if watchers.is_empty() {
			tracing::info!("No escrow watchers configured - reconciliation relies on the sweep only");
		}

		let watcher = Arc::new(WatchService::new(watchers));
		let event_bus = EventBus::new(config.propagation.buffer_size.max(1000));

		Ok(TradeEngine::new(
			self.config,
			storage,
			auth,
			delivery,
			watcher,
			event_bus,
		))
	}
}

/// Chains a delivery implementation serves: its `network_ids`, else every
/// configured network.
fn delivery_network_ids(config: &toml::Value, networks: &NetworksConfig) -> Vec<u64> {
	match config.get("network_ids").and_then(|v| v.as_array()) {
		Some(ids) => ids
			.iter()
			.filter_map(|v| v.as_integer())
			.filter(|id| *id >= 0)
			.map(|id| id as u64)
			.collect(),
		None => networks.keys().copied().collect(),
	}
}
