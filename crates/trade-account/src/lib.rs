//! Signer management for escrow transactions.
//!
//! Each escrow call is signed by the acting party's chain address. This crate
//! answers two questions for the transaction driver: can we sign for this
//! address, and with which key.

use async_trait::async_trait;
use thiserror::Error;
use trade_types::{normalize_address, ConfigSchema, ImplementationRegistry, SecretString};

pub mod implementations {
	pub mod local;
}

/// Errors that can occur during account operations.
#[derive(Debug, Error)]
pub enum AccountError {
	#[error("Invalid key: {0}")]
	InvalidKey(String),
	#[error("No signer available for {0}")]
	SignerUnavailable(String),
	#[error("Implementation error: {0}")]
	Implementation(String),
}

/// Interface implemented by signer backends.
#[async_trait]
pub trait AccountInterface: Send + Sync {
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Lower-cased addresses this backend holds keys for.
	async fn addresses(&self) -> Result<Vec<String>, AccountError>;

	/// Private key for `address` with `0x` prefix, if held.
	fn signing_key(&self, address: &str) -> Option<SecretString>;
}

pub type AccountFactory = fn(&toml::Value) -> Result<Box<dyn AccountInterface>, AccountError>;

pub trait AccountRegistry: ImplementationRegistry<Factory = AccountFactory> {}

pub fn get_all_implementations() -> Vec<(&'static str, AccountFactory)> {
	use implementations::local;

	vec![(local::Registry::NAME, local::Registry::factory())]
}

/// Resolves signer contexts to keys.
pub struct AccountService {
	implementation: Box<dyn AccountInterface>,
}

impl AccountService {
	pub fn new(implementation: Box<dyn AccountInterface>) -> Self {
		Self { implementation }
	}

	/// True if a key is held for `address` (any case, with or without `0x`).
	pub fn has_signer(&self, address: &str) -> bool {
		self.implementation
			.signing_key(&normalize_address(address))
			.is_some()
	}

	/// Key for `address`, or `SignerUnavailable`.
	pub fn signing_key(&self, address: &str) -> Result<SecretString, AccountError> {
		let address = normalize_address(address);
		self.implementation
			.signing_key(&address)
			.ok_or(AccountError::SignerUnavailable(address))
	}

	/// Every key held, for registering with a wallet.
	pub async fn signing_keys(&self) -> Result<Vec<SecretString>, AccountError> {
		let addresses = self.implementation.addresses().await?;
		addresses
			.iter()
			.map(|address| self.signing_key(address))
			.collect()
	}

	pub async fn addresses(&self) -> Result<Vec<String>, AccountError> {
		self.implementation.addresses().await
	}
}
