//! Record store for the escrow trade coordinator.
//!
//! A small key-value abstraction over pluggable backends. Keys are
//! `{namespace}:{id}` strings and values are JSON documents; single-key
//! writes are atomic, which is all the order repository needs to keep each
//! logical transition in one write.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use thiserror::Error;
use trade_types::{ConfigSchema, ImplementationRegistry};

pub mod implementations {
	pub mod file;
	pub mod memory;
}

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
	#[error("Not found")]
	NotFound,
	#[error("Serialization error: {0}")]
	Serialization(String),
	#[error("Backend error: {0}")]
	Backend(String),
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Low-level interface implemented by storage backends.
#[async_trait]
pub trait StorageInterface: Send + Sync {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError>;

	/// Stores `value` under `key`, replacing any previous value in one step.
	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError>;

	/// Deletes `key`. Deleting a missing key is not an error.
	async fn delete(&self, key: &str) -> Result<(), StorageError>;

	async fn exists(&self, key: &str) -> Result<bool, StorageError>;

	/// Lists live keys starting with `prefix`, in lexicographic order.
	async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Removes expired entries and returns how many were removed.
	async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		Ok(0)
	}
}

/// Factory building a backend from its configuration table.
pub type StorageFactory = fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>;

pub trait StorageRegistry: ImplementationRegistry<Factory = StorageFactory> {}

/// All built-in storage backends as `(name, factory)` pairs.
pub fn get_all_implementations() -> Vec<(&'static str, StorageFactory)> {
	use implementations::{file, memory};

	vec![
		(file::Registry::NAME, file::Registry::factory()),
		(memory::Registry::NAME, memory::Registry::factory()),
	]
}

/// Typed JSON storage on top of a backend.
pub struct StorageService {
	backend: Box<dyn StorageInterface>,
}

fn key_for(namespace: &str, id: &str) -> String {
	format!("{}:{}", namespace, id)
}

impl StorageService {
	pub fn new(backend: Box<dyn StorageInterface>) -> Self {
		Self { backend }
	}

	pub async fn store_with_ttl<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		let bytes =
			serde_json::to_vec(data).map_err(|e| StorageError::Serialization(e.to_string()))?;
		self.backend
			.set_bytes(&key_for(namespace, id), bytes, ttl)
			.await
	}

	/// Creates or overwrites a value.
	pub async fn store<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		self.store_with_ttl(namespace, id, data, None).await
	}

	pub async fn retrieve<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<T, StorageError> {
		let bytes = self.backend.get_bytes(&key_for(namespace, id)).await?;
		serde_json::from_slice(&bytes).map_err(|e| StorageError::Serialization(e.to_string()))
	}

	/// Like [`retrieve`](Self::retrieve) but maps `NotFound` to `None`.
	pub async fn find<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<Option<T>, StorageError> {
		match self.retrieve(namespace, id).await {
			Ok(value) => Ok(Some(value)),
			Err(StorageError::NotFound) => Ok(None),
			Err(e) => Err(e),
		}
	}

	pub async fn remove(&self, namespace: &str, id: &str) -> Result<(), StorageError> {
		self.backend.delete(&key_for(namespace, id)).await
	}

	/// Overwrites an existing value. Fails with `NotFound` if it does not exist.
	pub async fn update<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		let key = key_for(namespace, id);
		if !self.backend.exists(&key).await? {
			return Err(StorageError::NotFound);
		}
		let bytes =
			serde_json::to_vec(data).map_err(|e| StorageError::Serialization(e.to_string()))?;
		self.backend.set_bytes(&key, bytes, None).await
	}

	pub async fn exists(&self, namespace: &str, id: &str) -> Result<bool, StorageError> {
		self.backend.exists(&key_for(namespace, id)).await
	}

	/// Ids in `namespace` starting with `id_prefix`, in lexicographic order.
	pub async fn list_ids(
		&self,
		namespace: &str,
		id_prefix: &str,
	) -> Result<Vec<String>, StorageError> {
		let namespace_prefix = key_for(namespace, "");
		let keys = self
			.backend
			.list_keys(&key_for(namespace, id_prefix))
			.await?;
		Ok(keys
			.into_iter()
			.filter_map(|key| key.strip_prefix(&namespace_prefix).map(str::to_string))
			.collect())
	}

	/// Loads every value in `namespace` whose id starts with `id_prefix`.
	///
	/// Entries deleted between listing and reading are skipped.
	pub async fn retrieve_all<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id_prefix: &str,
	) -> Result<Vec<(String, T)>, StorageError> {
		let mut values = Vec::new();
		for id in self.list_ids(namespace, id_prefix).await? {
			if let Some(value) = self.find(namespace, &id).await? {
				values.push((id, value));
			}
		}
		Ok(values)
	}

	pub async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		self.backend.cleanup_expired().await
	}
}
