//! Startup and shutdown of the trade engine.

use super::{EngineError, TradeEngine};

impl TradeEngine {
	/// Seeds configured users and reconciles whatever a previous run left
	/// in flight.
	pub async fn initialize(&self) -> Result<(), EngineError> {
		tracing::info!(service_id = %self.config.service.id, "Initializing trade engine");

		for user in &self.config.users {
			self.repository
				.put_user(user)
				.await
				.map_err(|e| EngineError::Config(format!("Failed to seed user {}: {}", user.id, e)))?;
		}
		if !self.config.users.is_empty() {
			tracing::info!(users = self.config.users.len(), "Seeded users");
		}

		let report = self
			.recovery
			.sweep()
			.await
			.map_err(|e| EngineError::Service(e.to_string()))?;
		if report.pending > 0 {
			tracing::warn!(pending = report.pending, "Transactions still awaiting the chain after startup");
		}
		Ok(())
	}

	pub async fn shutdown(&self) -> Result<(), EngineError> {
		tracing::info!("Shutting down trade engine");
		self.watcher
			.stop_all()
			.await
			.map_err(|e| EngineError::Service(e.to_string()))
	}
}

#[cfg(test)]
mod tests {
	use crate::builder::{TradeBuilder, TradeFactories};
	use crate::testing::{CHAIN_ID, ESCROW, MAKER_KEY};
	use std::collections::HashMap;
	use trade_config::ConfigBuilder;
	use trade_storage::StorageFactory;
	use trade_types::{NetworksConfig, SecretString};

	#[tokio::test]
	async fn test_initialize_seeds_users() {
		let config = ConfigBuilder::new()
			.network(CHAIN_ID, Some(ESCROW))
			.user("maker", "sub-maker", Some("0xF39FD6E51AAD88F6F4CE6AB8827279CFFFB92266"))
			.build();

		let engine = TradeBuilder::new(config)
			.build(TradeFactories {
				storage_factories: HashMap::from([(
					"memory".to_string(),
					trade_storage::implementations::memory::create_storage as StorageFactory,
				)]),
				account_factories: HashMap::from([(
					"local".to_string(),
					|_: &toml::Value| {
						trade_account::implementations::local::LocalAccounts::new(vec![SecretString::from(MAKER_KEY)])
							.map(|a| Box::new(a) as Box<dyn trade_account::AccountInterface>)
					},
				)]),
				auth_factories: HashMap::from([(
					"static".to_string(),
					|_: &toml::Value| {
						Ok::<_, trade_auth::AuthError>(Box::new(
							trade_auth::implementations::static_tokens::StaticTokens::new(HashMap::new()),
						) as Box<dyn trade_auth::IdentityInterface>)
					},
				)]),
				delivery_factories: HashMap::from([(
					"evm_alloy".to_string(),
					|_: &toml::Value, _: &NetworksConfig, _: &[SecretString]| {
						Ok::<_, trade_delivery::DeliveryError>(
							Box::new(crate::testing::MockChain::new()) as Box<dyn trade_delivery::DeliveryInterface>
						)
					},
				)]),
				watcher_factories: trade_watcher::get_all_implementations()
					.into_iter()
					.map(|(name, factory)| (name.to_string(), factory))
					.collect(),
			})
			.await
			.unwrap();

		engine.initialize().await.unwrap();

		let user = engine
			.repository()
			.get_user_by_subject("sub-maker")
			.await
			.unwrap()
			.unwrap();
		assert_eq!(user.id, "maker");
		engine.shutdown().await.unwrap();
	}
}
