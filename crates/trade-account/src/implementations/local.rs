//! Local private-key signers loaded from configuration.

use crate::{AccountError, AccountFactory, AccountInterface, AccountRegistry};
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use std::collections::HashMap;
use trade_types::{
	normalize_address, with_0x_prefix, ConfigSchema, Field, FieldType, ImplementationRegistry,
	Schema, SecretString, ValidationError,
};

/// Keys held in memory, indexed by the address they derive.
pub struct LocalAccounts {
	keys: HashMap<String, SecretString>,
}

impl LocalAccounts {
	/// Parses each key and indexes it by its derived address.
	pub fn new(private_keys: Vec<SecretString>) -> Result<Self, AccountError> {
		let mut keys = HashMap::with_capacity(private_keys.len());
		for (index, key) in private_keys.into_iter().enumerate() {
			let signer: PrivateKeySigner = key
				.with_exposed(|k| k.trim().parse())
				.map_err(|e| AccountError::InvalidKey(format!("private_keys[{}]: {}", index, e)))?;
			let address = normalize_address(&signer.address().to_string());
			let normalized = key.with_exposed(|k| SecretString::new(with_0x_prefix(k.trim())));
			if keys.insert(address.clone(), normalized).is_some() {
				tracing::warn!(address = %address, "Duplicate signer key configured");
			}
		}
		Ok(Self { keys })
	}
}

#[async_trait]
impl AccountInterface for LocalAccounts {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(LocalAccountsSchema)
	}

	async fn addresses(&self) -> Result<Vec<String>, AccountError> {
		let mut addresses: Vec<String> = self.keys.keys().cloned().collect();
		addresses.sort();
		Ok(addresses)
	}

	fn signing_key(&self, address: &str) -> Option<SecretString> {
		self.keys.get(address).cloned()
	}
}

pub struct LocalAccountsSchema;

impl ConfigSchema for LocalAccountsSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::new(
			vec![Field::new(
				"private_keys",
				FieldType::Array(Box::new(FieldType::String)),
			)],
			vec![],
		)
		.validate(config)
	}
}

/// Configuration: `private_keys = ["0x..", ...]`.
pub fn create_account(config: &toml::Value) -> Result<Box<dyn AccountInterface>, AccountError> {
	LocalAccountsSchema
		.validate(config)
		.map_err(|e| AccountError::Implementation(format!("Invalid configuration: {}", e)))?;

	let keys = config
		.get("private_keys")
		.and_then(|v| v.as_array())
		.map(|keys| {
			keys.iter()
				.filter_map(|k| k.as_str())
				.map(SecretString::from)
				.collect()
		})
		.unwrap_or_default();

	Ok(Box::new(LocalAccounts::new(keys)?))
}

pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "local";
	type Factory = AccountFactory;

	fn factory() -> Self::Factory {
		create_account
	}
}

impl AccountRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::AccountService;

	// Well-known development key.
	const KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
	const ADDRESS: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";

	#[tokio::test]
	async fn test_keys_indexed_by_derived_address() {
		let accounts = LocalAccounts::new(vec![SecretString::from(KEY)]).unwrap();
		assert_eq!(accounts.addresses().await.unwrap(), vec![ADDRESS.to_string()]);

		let service = AccountService::new(Box::new(accounts));
		assert!(service.has_signer("0xF39Fd6e51aad88F6F4ce6aB8827279cffFb92266"));
		assert_eq!(
			service.signing_key(ADDRESS).unwrap().expose_secret(),
			format!("0x{}", KEY)
		);
	}

	#[test]
	fn test_unknown_address_is_unavailable() {
		let service = AccountService::new(Box::new(LocalAccounts::new(vec![]).unwrap()));
		assert!(matches!(
			service.signing_key("0x0000000000000000000000000000000000000001"),
			Err(AccountError::SignerUnavailable(_))
		));
	}

	#[test]
	fn test_invalid_key_rejected() {
		let config: toml::Value = toml::from_str("private_keys = [\"0x1234\"]").unwrap();
		assert!(matches!(
			create_account(&config),
			Err(AccountError::InvalidKey(_))
		));
	}
}
