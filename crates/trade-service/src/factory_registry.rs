//! Registry of every built-in implementation, keyed by configuration name.

use std::collections::HashMap;
use std::sync::OnceLock;
use trade_account::AccountFactory;
use trade_auth::AuthFactory;
use trade_config::Config;
use trade_core::{TradeBuilder, TradeEngine, TradeFactories};
use trade_delivery::DeliveryFactory;
use trade_storage::StorageFactory;
use trade_watcher::WatchFactory;

pub struct FactoryRegistry {
	pub storage: HashMap<String, StorageFactory>,
	pub account: HashMap<String, AccountFactory>,
	pub auth: HashMap<String, AuthFactory>,
	pub delivery: HashMap<String, DeliveryFactory>,
	pub watcher: HashMap<String, WatchFactory>,
}

fn collect<F>(implementations: Vec<(&'static str, F)>, kind: &str) -> HashMap<String, F> {
	implementations
		.into_iter()
		.map(|(name, factory)| {
			tracing::debug!("Registering {} implementation: {}", kind, name);
			(name.to_string(), factory)
		})
		.collect()
}

static REGISTRY: OnceLock<FactoryRegistry> = OnceLock::new();

pub fn get_registry() -> &'static FactoryRegistry {
	REGISTRY.get_or_init(|| FactoryRegistry {
		storage: collect(trade_storage::get_all_implementations(), "storage"),
		account: collect(trade_account::get_all_implementations(), "account"),
		auth: collect(trade_auth::get_all_implementations(), "auth"),
		delivery: collect(trade_delivery::get_all_implementations(), "delivery"),
		watcher: collect(trade_watcher::get_all_implementations(), "watcher"),
	})
}

/// Picks the factories `config` names, failing on names nobody registered.
macro_rules! build_factories {
	($registry:expr, $config_impls:expr, $registry_field:ident, $type_name:literal) => {{
		let mut factories = HashMap::new();
		for name in $config_impls.keys() {
			if let Some(factory) = $registry.$registry_field.get(name) {
				factories.insert(name.clone(), *factory);
			} else {
				let mut available: Vec<_> = $registry.$registry_field.keys().cloned().collect();
				available.sort();
				return Err(format!(
					"Unknown {} implementation '{}'. Available: [{}]",
					$type_name,
					name,
					available.join(", ")
				)
				.into());
			}
		}
		factories
	}};
}

pub async fn build_engine_from_config(
	config: Config,
) -> Result<TradeEngine, Box<dyn std::error::Error>> {
	let registry = get_registry();

	let factories = TradeFactories {
		storage_factories: build_factories!(registry, config.storage.implementations, storage, "storage"),
		account_factories: build_factories!(registry, config.account.implementations, account, "account"),
		auth_factories: build_factories!(registry, config.auth.implementations, auth, "auth"),
		delivery_factories: build_factories!(registry, config.delivery.implementations, delivery, "delivery"),
		watcher_factories: build_factories!(registry, config.watcher.implementations, watcher, "watcher"),
	};

	Ok(TradeBuilder::new(config).build(factories).await?)
}
