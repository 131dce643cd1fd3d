//! Escrow transaction driver.
//!
//! Submits exactly one escrow operation per call and waits for it to be
//! mined. The escrow deployment for a chain comes from the explicit network
//! configuration held by [`DeliveryService`]; a chain without a deployment is
//! rejected before any RPC traffic. Nothing here retries: a reverted or
//! unminable transaction is reported and left to the caller.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use trade_account::AccountService;
use trade_types::{
	normalize_address, truncate_id, ConfigSchema, EscrowOperation, ImplementationRegistry,
	NetworksConfig, SecretString, SignerContext, Transaction, TransactionHash, TransactionReceipt,
};

pub mod escrow;

pub mod implementations {
	pub mod evm {
		pub mod alloy;
	}
}

/// Errors that can occur while driving an escrow transaction.
#[derive(Debug, Error)]
pub enum DeliveryError {
	/// No escrow contract is configured for the chain, or its address is zero.
	#[error("Escrow not deployed on chain {0}")]
	NotDeployedOnChain(u64),
	#[error("No signer available for {0}")]
	SignerUnavailable(String),
	/// The transaction reverted, or was rejected at submission.
	#[error("Chain call failed: {0}")]
	ChainCallFailed(String),
	#[error("Invalid order id: {0}")]
	InvalidOrderId(String),
	/// RPC trouble after submission, including confirmation timeouts.
	#[error("Network error: {0}")]
	Network(String),
	#[error("No provider available for chain {0}")]
	NoProviderAvailable(u64),
}

/// Interface implemented by chain backends.
#[async_trait]
pub trait DeliveryInterface: Send + Sync {
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Signs with the key registered for `tx.from` and broadcasts.
	async fn submit(&self, tx: Transaction) -> Result<TransactionHash, DeliveryError>;

	/// Blocks until the transaction has `confirmations` confirmations or the
	/// backend's timeout elapses.
	async fn wait_for_confirmation(
		&self,
		hash: &TransactionHash,
		chain_id: u64,
		confirmations: u64,
	) -> Result<TransactionReceipt, DeliveryError>;

	/// Current receipt, `None` while the transaction is unknown or pending.
	async fn get_receipt(
		&self,
		hash: &TransactionHash,
		chain_id: u64,
	) -> Result<Option<TransactionReceipt>, DeliveryError>;
}

/// Builds a backend from its configuration, the network table and every
/// signing key the account service holds.
pub type DeliveryFactory = fn(
	&toml::Value,
	&NetworksConfig,
	&[SecretString],
) -> Result<Box<dyn DeliveryInterface>, DeliveryError>;

pub trait DeliveryRegistry: ImplementationRegistry<Factory = DeliveryFactory> {}

pub fn get_all_implementations() -> Vec<(&'static str, DeliveryFactory)> {
	use implementations::evm::alloy;

	vec![(alloy::Registry::NAME, alloy::Registry::factory())]
}

/// Drives escrow operations across chains.
pub struct DeliveryService {
	providers: HashMap<u64, Arc<dyn DeliveryInterface>>,
	account: Arc<AccountService>,
	networks: NetworksConfig,
	min_confirmations: u64,
	/// One submission at a time per signer address.
	signer_queues: DashMap<String, Arc<Mutex<()>>>,
}

impl DeliveryService {
	pub fn new(
		providers: HashMap<u64, Arc<dyn DeliveryInterface>>,
		account: Arc<AccountService>,
		networks: NetworksConfig,
		min_confirmations: u64,
	) -> Self {
		Self {
			providers,
			account,
			networks,
			min_confirmations,
			signer_queues: DashMap::new(),
		}
	}

	/// Escrow address for `chain_id`, or `NotDeployedOnChain`.
	pub fn escrow_address(&self, chain_id: u64) -> Result<String, DeliveryError> {
		self.networks
			.get(&chain_id)
			.and_then(|network| network.deployed_escrow())
			.map(normalize_address)
			.ok_or(DeliveryError::NotDeployedOnChain(chain_id))
	}

	/// Checks everything that can be checked without touching the chain:
	/// deployment, signer availability, order id encoding and provider.
	pub fn preflight(
		&self,
		operation: EscrowOperation,
		order_id: &str,
		signer: &SignerContext,
	) -> Result<Transaction, DeliveryError> {
		let escrow = self.escrow_address(signer.chain_id)?;
		if !self.account.has_signer(&signer.address) {
			return Err(DeliveryError::SignerUnavailable(signer.address.clone()));
		}
		if !self.providers.contains_key(&signer.chain_id) {
			return Err(DeliveryError::NoProviderAvailable(signer.chain_id));
		}
		Ok(Transaction {
			chain_id: signer.chain_id,
			from: normalize_address(&signer.address),
			to: escrow,
			data: escrow::encode_call(operation, order_id)?,
		})
	}

	/// Submits one escrow operation and returns its hash.
	///
	/// Submissions from the same signer are queued; the queue is released as
	/// soon as the transaction is broadcast, not when it is mined.
	pub async fn submit(
		&self,
		operation: EscrowOperation,
		order_id: &str,
		signer: &SignerContext,
	) -> Result<TransactionHash, DeliveryError> {
		let tx = self.preflight(operation, order_id, signer)?;
		let provider = self
			.providers
			.get(&tx.chain_id)
			.ok_or(DeliveryError::NoProviderAvailable(tx.chain_id))?;

		let queue = self
			.signer_queues
			.entry(tx.from.clone())
			.or_insert_with(|| Arc::new(Mutex::new(())))
			.clone();
		let _turn = queue.lock().await;

		let hash = provider.submit(tx).await.map_err(|e| match e {
			DeliveryError::ChainCallFailed(_) => e,
			other => DeliveryError::ChainCallFailed(other.to_string()),
		})?;

		tracing::info!(
			order_id = %truncate_id(order_id),
			operation = %operation,
			tx_hash = %truncate_id(&hash.to_hex()),
			chain_id = signer.chain_id,
			"Submitted escrow transaction"
		);
		Ok(hash)
	}

	/// Waits for the configured confirmations. A reverted transaction is
	/// `ChainCallFailed`; a wait that gives up is `Network`.
	pub async fn confirm(
		&self,
		hash: &TransactionHash,
		chain_id: u64,
	) -> Result<TransactionReceipt, DeliveryError> {
		let provider = self
			.providers
			.get(&chain_id)
			.ok_or(DeliveryError::NoProviderAvailable(chain_id))?;

		let receipt = provider
			.wait_for_confirmation(hash, chain_id, self.min_confirmations)
			.await?;
		if !receipt.success {
			return Err(DeliveryError::ChainCallFailed(format!(
				"transaction {} reverted in block {}",
				hash, receipt.block_number
			)));
		}
		Ok(receipt)
	}

	/// Current receipt without waiting.
	pub async fn receipt(
		&self,
		hash: &TransactionHash,
		chain_id: u64,
	) -> Result<Option<TransactionReceipt>, DeliveryError> {
		self.providers
			.get(&chain_id)
			.ok_or(DeliveryError::NoProviderAvailable(chain_id))?
			.get_receipt(hash, chain_id)
			.await
	}

	pub fn networks(&self) -> &NetworksConfig {
		&self.networks
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::time::Duration;
	use trade_account::implementations::local::LocalAccounts;
	use trade_types::{NetworkConfig, Schema, ValidationError};

	const KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
	const SIGNER: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";
	const ESCROW: &str = "0x5fbdb2315678afecb367f032d93f642f64180aa3";

	struct NoSchema;

	impl ConfigSchema for NoSchema {
		fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
			Schema::new(vec![], vec![]).validate(config)
		}
	}

	#[derive(Default)]
	struct CountingChain {
		submits: AtomicUsize,
		in_flight: AtomicUsize,
		max_in_flight: AtomicUsize,
		revert: bool,
	}

	#[async_trait]
	impl DeliveryInterface for CountingChain {
		fn config_schema(&self) -> Box<dyn ConfigSchema> {
			Box::new(NoSchema)
		}

		async fn submit(&self, _tx: Transaction) -> Result<TransactionHash, DeliveryError> {
			let n = self.submits.fetch_add(1, Ordering::SeqCst);
			let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
			self.max_in_flight.fetch_max(now, Ordering::SeqCst);
			tokio::time::sleep(Duration::from_millis(20)).await;
			self.in_flight.fetch_sub(1, Ordering::SeqCst);
			Ok(TransactionHash(vec![n as u8; 32]))
		}

		async fn wait_for_confirmation(
			&self,
			hash: &TransactionHash,
			_chain_id: u64,
			_confirmations: u64,
		) -> Result<TransactionReceipt, DeliveryError> {
			Ok(TransactionReceipt {
				hash: hash.clone(),
				block_number: 10,
				success: !self.revert,
			})
		}

		async fn get_receipt(
			&self,
			_hash: &TransactionHash,
			_chain_id: u64,
		) -> Result<Option<TransactionReceipt>, DeliveryError> {
			Ok(None)
		}
	}

	fn service(chain: Arc<CountingChain>) -> DeliveryService {
		let networks = NetworksConfig::from([
			(1, NetworkConfig {
				rpc_url: "http://localhost:8545".into(),
				escrow_address: Some(ESCROW.into()),
				block_time_seconds: None,
			}),
			(2, NetworkConfig {
				rpc_url: "http://localhost:8546".into(),
				escrow_address: Some("0x0000000000000000000000000000000000000000".into()),
				block_time_seconds: None,
			}),
		]);
		let accounts = LocalAccounts::new(vec![SecretString::from(KEY)]).unwrap();
		let providers: HashMap<u64, Arc<dyn DeliveryInterface>> =
			HashMap::from([(1, chain.clone() as Arc<dyn DeliveryInterface>), (2, chain)]);
		DeliveryService::new(
			providers,
			Arc::new(AccountService::new(Box::new(accounts))),
			networks,
			1,
		)
	}

	fn signer(chain_id: u64, address: &str) -> SignerContext {
		SignerContext {
			chain_id,
			address: address.to_string(),
		}
	}

	#[tokio::test]
	async fn test_zero_escrow_address_not_deployed() {
		let chain = Arc::new(CountingChain::default());
		let service = service(chain.clone());

		for chain_id in [2, 99] {
			let result = service
				.submit(EscrowOperation::RequestCancel, "1", &signer(chain_id, SIGNER))
				.await;
			assert!(matches!(result, Err(DeliveryError::NotDeployedOnChain(id)) if id == chain_id));
		}
		assert_eq!(chain.submits.load(Ordering::SeqCst), 0);
	}

	#[tokio::test]
	async fn test_unknown_signer_unavailable() {
		let chain = Arc::new(CountingChain::default());
		let service = service(chain.clone());

		let result = service
			.submit(
				EscrowOperation::MarkPaymentSent,
				"1",
				&signer(1, "0x0000000000000000000000000000000000000001"),
			)
			.await;
		assert!(matches!(result, Err(DeliveryError::SignerUnavailable(_))));
		assert_eq!(chain.submits.load(Ordering::SeqCst), 0);
	}

	#[tokio::test]
	async fn test_same_signer_submissions_are_serialized() {
		let chain = Arc::new(CountingChain::default());
		let service = Arc::new(service(chain.clone()));

		let handles: Vec<_> = (0..4)
			.map(|i| {
				let service = service.clone();
				tokio::spawn(async move {
					service
						.submit(
							EscrowOperation::MarkPaymentSent,
							&i.to_string(),
							&signer(1, SIGNER),
						)
						.await
				})
			})
			.collect();
		for handle in handles {
			handle.await.unwrap().unwrap();
		}

		assert_eq!(chain.submits.load(Ordering::SeqCst), 4);
		assert_eq!(chain.max_in_flight.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn test_reverted_receipt_is_chain_call_failed() {
		let chain = Arc::new(CountingChain {
			revert: true,
			..Default::default()
		});
		let service = service(chain);

		let result = service.confirm(&TransactionHash(vec![1; 32]), 1).await;
		assert!(matches!(result, Err(DeliveryError::ChainCallFailed(msg)) if msg.contains("reverted")));
	}
}
