//! File-backed storage.
//!
//! One file per key under a base directory. Each file starts with a 64-byte
//! header carrying an optional expiry, and is replaced atomically by writing
//! a temporary file and renaming it over the old one. The directory is
//! locked exclusively so two processes never share it.

use crate::{StorageError, StorageFactory, StorageInterface, StorageRegistry};
use async_trait::async_trait;
use fs2::FileExt;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;
use trade_types::{
	current_timestamp, ConfigSchema, Field, FieldType, ImplementationRegistry, Schema, StorageKey,
	ValidationError,
};

/// Binary layout, 64 bytes:
/// - `[0..4]` magic `TRDS`
/// - `[4..6]` version, u16 little-endian
/// - `[6..14]` expiry, u64 little-endian Unix seconds, 0 for never
/// - `[14..64]` reserved, zero
#[derive(Debug, Clone, Copy)]
struct FileHeader {
	expires_at: u64,
}

impl FileHeader {
	const MAGIC: &'static [u8; 4] = b"TRDS";
	const VERSION: u16 = 1;
	const SIZE: usize = 64;

	fn new(ttl: Duration) -> Self {
		let expires_at = if ttl.is_zero() {
			0
		} else {
			current_timestamp().saturating_add(ttl.as_secs())
		};
		Self { expires_at }
	}

	fn serialize(&self) -> [u8; Self::SIZE] {
		let mut bytes = [0u8; Self::SIZE];
		bytes[0..4].copy_from_slice(Self::MAGIC);
		bytes[4..6].copy_from_slice(&Self::VERSION.to_le_bytes());
		bytes[6..14].copy_from_slice(&self.expires_at.to_le_bytes());
		bytes
	}

	fn deserialize(bytes: &[u8]) -> Result<Self, StorageError> {
		if bytes.len() < Self::SIZE || &bytes[0..4] != Self::MAGIC {
			return Err(StorageError::Backend("Missing storage header".into()));
		}
		let version = u16::from_le_bytes([bytes[4], bytes[5]]);
		if version > Self::VERSION {
			return Err(StorageError::Backend(format!(
				"Unsupported file version: {}",
				version
			)));
		}
		let mut expires = [0u8; 8];
		expires.copy_from_slice(&bytes[6..14]);
		Ok(Self {
			expires_at: u64::from_le_bytes(expires),
		})
	}

	fn is_expired(&self) -> bool {
		self.expires_at != 0 && current_timestamp() >= self.expires_at
	}
}

/// Default TTL per expiring namespace, configured as `ttl_<namespace>` in seconds.
#[derive(Debug, Clone, Default)]
pub struct TtlConfig {
	ttls: HashMap<StorageKey, Duration>,
}

impl TtlConfig {
	fn from_config(config: &toml::Value) -> Self {
		let ttls = StorageKey::all()
			.filter(StorageKey::may_expire)
			.filter_map(|key| {
				config
					.get(format!("ttl_{}", key.as_str()))
					.and_then(|v| v.as_integer())
					.map(|secs| (key, Duration::from_secs(secs.max(0) as u64)))
			})
			.collect();
		Self { ttls }
	}

	/// Lifetime for a write to `key`. Permanent namespaces ignore any TTL.
	fn ttl_for_key(&self, key: &str, requested: Option<Duration>) -> Duration {
		let namespace = key
			.split(':')
			.next()
			.and_then(|namespace| namespace.parse::<StorageKey>().ok());
		match namespace {
			Some(namespace) if !namespace.may_expire() => Duration::ZERO,
			Some(namespace) => requested
				.or_else(|| self.ttls.get(&namespace).copied())
				.unwrap_or(Duration::ZERO),
			None => requested.unwrap_or(Duration::ZERO),
		}
	}
}

/// Escapes a key into a file name and back. Only `%`, `/`, `:` and `\` are
/// escaped so names stay readable.
fn encode_key(key: &str) -> String {
	let mut out = String::with_capacity(key.len());
	for c in key.chars() {
		match c {
			'%' => out.push_str("%25"),
			'/' => out.push_str("%2F"),
			':' => out.push_str("%3A"),
			'\\' => out.push_str("%5C"),
			c => out.push(c),
		}
	}
	out
}

fn decode_key(name: &str) -> String {
	name.replace("%3A", ":")
		.replace("%2F", "/")
		.replace("%5C", "\\")
		.replace("%25", "%")
}

pub struct FileStorage {
	base_path: PathBuf,
	ttl_config: TtlConfig,
	/// Held for the lifetime of the backend; dropping it releases the lock.
	_lock: std::fs::File,
}

impl FileStorage {
	/// Opens (creating if needed) the storage directory and locks it.
	pub fn open(base_path: PathBuf, ttl_config: TtlConfig) -> Result<Self, StorageError> {
		std::fs::create_dir_all(&base_path).map_err(|e| {
			StorageError::Backend(format!("Cannot create {}: {}", base_path.display(), e))
		})?;
		let lock = std::fs::OpenOptions::new()
			.create(true)
			.truncate(false)
			.write(true)
			.open(base_path.join(".lock"))
			.map_err(|e| StorageError::Backend(e.to_string()))?;
		lock.try_lock_exclusive().map_err(|e| {
			StorageError::Backend(format!(
				"Storage directory {} is in use by another process: {}",
				base_path.display(),
				e
			))
		})?;

		Ok(Self {
			base_path,
			ttl_config,
			_lock: lock,
		})
	}

	fn file_path(&self, key: &str) -> PathBuf {
		self.base_path.join(format!("{}.bin", encode_key(key)))
	}

	/// Reads a file, returning `None` when it is missing or expired.
	async fn read_live(&self, path: &PathBuf) -> Result<Option<Vec<u8>>, StorageError> {
		let data = match fs::read(path).await {
			Ok(data) => data,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
			Err(e) => return Err(StorageError::Backend(e.to_string())),
		};
		let header = FileHeader::deserialize(&data)?;
		if header.is_expired() {
			return Ok(None);
		}
		Ok(Some(data[FileHeader::SIZE..].to_vec()))
	}

	/// Iterates `(key, path)` for every stored file.
	async fn entries(&self) -> Result<Vec<(String, PathBuf)>, StorageError> {
		let mut entries = Vec::new();
		let mut dir = fs::read_dir(&self.base_path)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;
		while let Some(entry) = dir
			.next_entry()
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?
		{
			let path = entry.path();
			let Some(name) = path
				.file_name()
				.and_then(|n| n.to_str())
				.and_then(|n| n.strip_suffix(".bin"))
			else {
				continue;
			};
			entries.push((decode_key(name), path.clone()));
		}
		Ok(entries)
	}
}

#[async_trait]
impl StorageInterface for FileStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		self.read_live(&self.file_path(key))
			.await?
			.ok_or(StorageError::NotFound)
	}

	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		let path = self.file_path(key);
		let ttl = self.ttl_config.ttl_for_key(key, ttl);

		let mut file_data = Vec::with_capacity(FileHeader::SIZE + value.len());
		file_data.extend_from_slice(&FileHeader::new(ttl).serialize());
		file_data.extend_from_slice(&value);

		let temp_path = path.with_extension("tmp");
		fs::write(&temp_path, file_data)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;
		fs::rename(&temp_path, &path)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		match fs::remove_file(self.file_path(key)).await {
			Ok(_) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(StorageError::Backend(e.to_string())),
		}
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		Ok(self.read_live(&self.file_path(key)).await?.is_some())
	}

	async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
		let mut keys = Vec::new();
		for (key, path) in self.entries().await? {
			if key.starts_with(prefix) && self.read_live(&path).await?.is_some() {
				keys.push(key);
			}
		}
		keys.sort();
		Ok(keys)
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(FileStorageSchema)
	}

	async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		let mut removed = 0;
		for (key, path) in self.entries().await? {
			let expired = match fs::read(&path).await {
				Ok(data) => FileHeader::deserialize(&data)
					.map(|h| h.is_expired())
					.unwrap_or(false),
				Err(e) => {
					tracing::debug!(key = %key, error = %e, "Skipping unreadable storage file");
					false
				},
			};
			if !expired {
				continue;
			}
			match fs::remove_file(&path).await {
				Ok(_) => removed += 1,
				Err(e) => tracing::warn!(key = %key, error = %e, "Failed to remove expired entry"),
			}
		}
		Ok(removed)
	}
}

pub struct FileStorageSchema;

impl ConfigSchema for FileStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		for key in StorageKey::all().filter(|key| !key.may_expire()) {
			let field = format!("ttl_{}", key.as_str());
			if config.get(&field).is_some() {
				return Err(ValidationError::InvalidValue {
					field,
					message: format!("{} are never expired", key.as_str()),
				});
			}
		}

		let mut optional = vec![Field::new("storage_path", FieldType::String)];
		optional.extend(StorageKey::all().filter(StorageKey::may_expire).map(|key| {
			Field::new(format!("ttl_{}", key.as_str()), FieldType::Integer {
				min: Some(0),
				max: None,
			})
		}));
		Schema::new(vec![], optional).validate(config)
	}
}

/// Configuration:
/// - `storage_path`: base directory, default `./data/storage`
/// - `ttl_reconciliation`: default TTL in seconds for reconciliation entries,
///   0 for none. Other namespaces do not expire.
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	FileStorageSchema
		.validate(config)
		.map_err(|e| StorageError::Configuration(e.to_string()))?;

	let storage_path = config
		.get("storage_path")
		.and_then(|v| v.as_str())
		.unwrap_or("./data/storage");

	Ok(Box::new(FileStorage::open(
		PathBuf::from(storage_path),
		TtlConfig::from_config(config),
	)?))
}

pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "file";
	type Factory = StorageFactory;

	fn factory() -> Self::Factory {
		create_storage
	}
}

impl StorageRegistry for Registry {}
