//! Alloy-backed EVM delivery.
//!
//! One HTTP provider per configured network. Every signing key the account
//! service holds is registered with each provider's wallet, so the `from`
//! address of a transaction selects the key that signs it.

use crate::{DeliveryError, DeliveryFactory, DeliveryInterface, DeliveryRegistry};
use alloy_network::EthereumWallet;
use alloy_primitives::{Address, Bytes, FixedBytes};
use alloy_provider::{Provider, ProviderBuilder};
use alloy_rpc_types::TransactionRequest;
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use alloy_transport_http::Http;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use trade_types::{
	truncate_id, ConfigSchema, Field, FieldType, ImplementationRegistry, NetworksConfig, Schema,
	SecretString, Transaction, TransactionHash, TransactionReceipt, ValidationError,
};

const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 7;
const DEFAULT_BLOCK_TIME_SECONDS: u64 = 12;
const MAX_CONFIRMATION_WAIT_SECONDS: u64 = 3600;

type HttpProvider = Arc<dyn Provider<Http<reqwest::Client>> + Send + Sync>;

struct ChainClient {
	provider: HttpProvider,
	block_time: Duration,
}

pub struct AlloyDelivery {
	chains: HashMap<u64, ChainClient>,
	poll_interval: Duration,
}

impl AlloyDelivery {
	/// Builds providers for `network_ids`, each with a wallet holding every
	/// key in `signers`.
	pub fn new(
		network_ids: Vec<u64>,
		networks: &NetworksConfig,
		signers: Vec<PrivateKeySigner>,
		poll_interval: Duration,
	) -> Result<Self, DeliveryError> {
		if network_ids.is_empty() {
			return Err(DeliveryError::Network(
				"At least one network must be configured".to_string(),
			));
		}

		let mut chains = HashMap::new();
		for network_id in network_ids {
			let network = networks.get(&network_id).ok_or_else(|| {
				DeliveryError::Network(format!("Network {} not found in configuration", network_id))
			})?;
			let url = network.rpc_url.parse().map_err(|e| {
				DeliveryError::Network(format!("Invalid RPC URL for network {}: {}", network_id, e))
			})?;

			let mut chain_signers = signers
				.iter()
				.cloned()
				.map(|signer| signer.with_chain_id(Some(network_id)));
			let provider: HttpProvider = match chain_signers.next() {
				Some(first) => {
					let mut wallet = EthereumWallet::from(first);
					for signer in chain_signers {
						wallet.register_signer(signer);
					}
					let provider = ProviderBuilder::new()
						.with_recommended_fillers()
						.wallet(wallet)
						.on_http(url);
					provider.client().set_poll_interval(poll_interval);
					Arc::new(provider)
				},
				None => {
					tracing::warn!(chain_id = network_id, "No signers configured, provider is read-only");
					let provider = ProviderBuilder::new().on_http(url);
					provider.client().set_poll_interval(poll_interval);
					Arc::new(provider)
				},
			};

			chains.insert(
				network_id,
				ChainClient {
					provider,
					block_time: Duration::from_secs(
						network
							.block_time_seconds
							.unwrap_or(DEFAULT_BLOCK_TIME_SECONDS),
					),
				},
			);
		}

		Ok(Self {
			chains,
			poll_interval,
		})
	}

	fn chain(&self, chain_id: u64) -> Result<&ChainClient, DeliveryError> {
		self.chains
			.get(&chain_id)
			.ok_or(DeliveryError::NoProviderAvailable(chain_id))
	}

	fn tx_hash(hash: &TransactionHash) -> Result<FixedBytes<32>, DeliveryError> {
		if hash.0.len() != 32 {
			return Err(DeliveryError::Network(format!(
				"Malformed transaction hash {}",
				hash
			)));
		}
		Ok(FixedBytes::<32>::from_slice(&hash.0))
	}

	fn request(tx: Transaction) -> Result<TransactionRequest, DeliveryError> {
		let from: Address = tx
			.from
			.parse()
			.map_err(|e| DeliveryError::SignerUnavailable(format!("{}: {}", tx.from, e)))?;
		let to: Address = tx
			.to
			.parse()
			.map_err(|_| DeliveryError::NotDeployedOnChain(tx.chain_id))?;
		Ok(TransactionRequest::default()
			.from(from)
			.to(to)
			.input(Bytes::from(tx.data).into()))
	}
}

#[async_trait]
impl DeliveryInterface for AlloyDelivery {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(AlloyDeliverySchema)
	}

	async fn submit(&self, tx: Transaction) -> Result<TransactionHash, DeliveryError> {
		let chain_id = tx.chain_id;
		let provider = &self.chain(chain_id)?.provider;
		let request = Self::request(tx)?;

		let pending = provider
			.send_transaction(request)
			.await
			.map_err(|e| DeliveryError::ChainCallFailed(format!("Failed to send transaction: {}", e)))?;

		let hash = TransactionHash(pending.tx_hash().0.to_vec());
		tracing::debug!(tx_hash = %truncate_id(&hash.to_hex()), chain_id, "Broadcast transaction");
		Ok(hash)
	}

	async fn wait_for_confirmation(
		&self,
		hash: &TransactionHash,
		chain_id: u64,
		confirmations: u64,
	) -> Result<TransactionReceipt, DeliveryError> {
		let chain = self.chain(chain_id)?;
		let tx_hash = Self::tx_hash(hash)?;

		// Room for the confirmations plus a few blocks of inclusion delay.
		let timeout_seconds = (chain.block_time.as_secs().max(1) * (confirmations + 5))
			.min(MAX_CONFIRMATION_WAIT_SECONDS);
		let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout_seconds);

		tracing::debug!(
			tx_hash = %truncate_id(&hash.to_hex()),
			chain_id,
			confirmations,
			timeout_seconds,
			"Waiting for confirmation"
		);

		loop {
			if tokio::time::Instant::now() >= deadline {
				return Err(DeliveryError::Network(format!(
					"Timeout waiting for {} confirmations after {} seconds",
					confirmations, timeout_seconds
				)));
			}

			let receipt = match chain.provider.get_transaction_receipt(tx_hash).await {
				Ok(Some(receipt)) => receipt,
				Ok(None) => {
					tokio::time::sleep(self.poll_interval).await;
					continue;
				},
				Err(e) => {
					return Err(DeliveryError::Network(format!(
						"Failed to get receipt: {}",
						e
					)));
				},
			};

			let tx_block = receipt.block_number.unwrap_or(0);
			let current_block = chain.provider.get_block_number().await.map_err(|e| {
				DeliveryError::Network(format!("Failed to get block number: {}", e))
			})?;

			// The inclusion block counts as the first confirmation.
			if current_block.saturating_sub(tx_block) + 1 >= confirmations {
				return Ok(TransactionReceipt {
					hash: hash.clone(),
					block_number: tx_block,
					success: receipt.status(),
				});
			}

			tokio::time::sleep(self.poll_interval).await;
		}
	}

	async fn get_receipt(
		&self,
		hash: &TransactionHash,
		chain_id: u64,
	) -> Result<Option<TransactionReceipt>, DeliveryError> {
		let provider = &self.chain(chain_id)?.provider;
		let tx_hash = Self::tx_hash(hash)?;

		match provider.get_transaction_receipt(tx_hash).await {
			Ok(Some(receipt)) => Ok(receipt.block_number.map(|block_number| TransactionReceipt {
				hash: hash.clone(),
				block_number,
				success: receipt.status(),
			})),
			Ok(None) => Ok(None),
			Err(e) => Err(DeliveryError::Network(format!(
				"Failed to get receipt on chain {}: {}",
				chain_id, e
			))),
		}
	}
}

pub struct AlloyDeliverySchema;

impl ConfigSchema for AlloyDeliverySchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::new(
			vec![],
			vec![
				Field::new(
					"network_ids",
					FieldType::Array(Box::new(FieldType::Integer {
						min: Some(1),
						max: None,
					})),
				),
				Field::new(
					"poll_interval_seconds",
					FieldType::Integer {
						min: Some(1),
						max: Some(60),
					},
				),
			],
		)
		.validate(config)
	}
}

/// Configuration:
/// - `network_ids`: networks to serve (default: every configured network)
/// - `poll_interval_seconds`: receipt polling interval (default: 7)
pub fn create_delivery(
	config: &toml::Value,
	networks: &NetworksConfig,
	keys: &[SecretString],
) -> Result<Box<dyn DeliveryInterface>, DeliveryError> {
	AlloyDeliverySchema
		.validate(config)
		.map_err(|e| DeliveryError::Network(format!("Invalid configuration: {}", e)))?;

	let mut network_ids: Vec<u64> = match config.get("network_ids").and_then(|v| v.as_array()) {
		Some(ids) => ids
			.iter()
			.filter_map(|v| v.as_integer())
			.map(|v| v as u64)
			.collect(),
		None => networks.keys().copied().collect(),
	};
	network_ids.sort_unstable();

	let poll_interval = Duration::from_secs(
		config
			.get("poll_interval_seconds")
			.and_then(|v| v.as_integer())
			.map(|v| v as u64)
			.unwrap_or(DEFAULT_POLL_INTERVAL_SECONDS),
	);

	let signers = keys
		.iter()
		.map(|key| {
			key.with_exposed(|k| k.parse::<PrivateKeySigner>())
				.map_err(|e| DeliveryError::SignerUnavailable(format!("Invalid signing key: {}", e)))
		})
		.collect::<Result<Vec<_>, _>>()?;

	Ok(Box::new(AlloyDelivery::new(
		network_ids,
		networks,
		signers,
		poll_interval,
	)?))
}

pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "evm_alloy";
	type Factory = DeliveryFactory;

	fn factory() -> Self::Factory {
		create_delivery
	}
}

impl DeliveryRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;
	use trade_types::NetworkConfig;

	const KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

	fn networks() -> NetworksConfig {
		NetworksConfig::from([(31337, NetworkConfig {
			rpc_url: "http://localhost:8545".into(),
			escrow_address: None,
			block_time_seconds: Some(2),
		})])
	}

	#[test]
	fn test_schema_rejects_zero_poll_interval() {
		let config: toml::Value = toml::from_str("poll_interval_seconds = 0").unwrap();
		assert!(AlloyDeliverySchema.validate(&config).is_err());
	}

	#[test]
	fn test_unknown_network_rejected() {
		let config: toml::Value = toml::from_str("network_ids = [5]").unwrap();
		let result = create_delivery(&config, &networks(), &[SecretString::from(KEY)]);
		assert!(matches!(result, Err(DeliveryError::Network(msg)) if msg.contains("not found")));
	}

	#[test]
	fn test_bad_key_is_signer_unavailable() {
		let config = toml::Value::Table(toml::map::Map::new());
		let result = create_delivery(&config, &networks(), &[SecretString::from("0x1234")]);
		assert!(matches!(result, Err(DeliveryError::SignerUnavailable(_))));
	}

	#[tokio::test]
	async fn test_builds_provider_for_every_network_by_default() {
		let config = toml::Value::Table(toml::map::Map::new());
		let delivery = AlloyDelivery::new(
			vec![31337],
			&networks(),
			vec![KEY.parse().unwrap()],
			Duration::from_secs(1),
		)
		.unwrap();
		assert!(delivery.chain(31337).is_ok());
		assert!(matches!(
			delivery.chain(1),
			Err(DeliveryError::NoProviderAvailable(1))
		));
		assert!(create_delivery(&config, &networks(), &[]).is_ok());
	}
}
