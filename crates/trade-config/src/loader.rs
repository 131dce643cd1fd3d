//! Multi-file configuration loading.
//!
//! A root file may list other files under `include`. Included files are
//! merged at the top level; a section defined in two files is an error, as
//! is a file included twice.

use crate::{resolve_env_vars, Config, ConfigError};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

pub struct ConfigLoader {
	/// Directory relative includes are resolved against.
	base_path: PathBuf,
	loaded_files: HashSet<PathBuf>,
	/// Section name to the file that defined it, for error messages.
	section_sources: HashMap<String, PathBuf>,
}

impl ConfigLoader {
	pub fn new(base_path: impl AsRef<Path>) -> Self {
		Self {
			base_path: base_path.as_ref().to_path_buf(),
			loaded_files: HashSet::new(),
			section_sources: HashMap::new(),
		}
	}

	/// Loads a configuration file and everything it includes, then validates.
	pub async fn load_config(
		&mut self,
		config_path: impl AsRef<Path>,
	) -> Result<Config, ConfigError> {
		let config_path = self.resolve_path(config_path)?;
		let main_content = self.load_file(&config_path).await?;
		let mut main_toml: toml::Value = toml::from_str(&main_content)?;

		let includes = extract_includes(&main_toml)?;
		if includes.is_empty() {
			return main_content.parse();
		}

		if let Some(table) = main_toml.as_table_mut() {
			table.remove("include");
			for key in table.keys() {
				self.section_sources.insert(key.clone(), config_path.clone());
			}
		}

		for include_path in includes {
			let resolved_path = self.resolve_path(&include_path)?;
			let include_content = self.load_file(&resolved_path).await?;
			let include_toml: toml::Value = toml::from_str(&include_content)?;
			self.merge(&mut main_toml, include_toml, &resolved_path)?;
		}

		let combined = toml::to_string(&main_toml).map_err(|e| {
			ConfigError::Parse(format!("Failed to serialize combined config: {}", e))
		})?;
		combined.parse()
	}

	fn merge(
		&mut self,
		main_toml: &mut toml::Value,
		include_toml: toml::Value,
		source: &Path,
	) -> Result<(), ConfigError> {
		let toml::Value::Table(include_table) = include_toml else {
			return Ok(());
		};
		let Some(main_table) = main_toml.as_table_mut() else {
			return Ok(());
		};

		for (key, value) in include_table {
			if let Some(existing_source) = self.section_sources.get(&key) {
				return Err(ConfigError::Validation(format!(
					"Duplicate section '{}' found in {} and {}. \
					Each top-level section must be unique across all configuration files.",
					key,
					existing_source.display(),
					source.display()
				)));
			}
			self.section_sources.insert(key.clone(), source.to_path_buf());
			main_table.insert(key, value);
		}
		Ok(())
	}

	/// Reads a file once, resolving environment variables.
	async fn load_file(&mut self, path: &Path) -> Result<String, ConfigError> {
		let canonical_path = tokio::fs::canonicalize(path).await.map_err(|e| {
			ConfigError::Io(std::io::Error::new(
				std::io::ErrorKind::NotFound,
				format!("Cannot resolve path {}: {}", path.display(), e),
			))
		})?;

		if !self.loaded_files.insert(canonical_path.clone()) {
			return Err(ConfigError::Validation(format!(
				"Circular include detected: {} was already loaded",
				canonical_path.display()
			)));
		}

		let content = tokio::fs::read_to_string(path).await?;
		resolve_env_vars(&content)
	}

	fn resolve_path(&self, path: impl AsRef<Path>) -> Result<PathBuf, ConfigError> {
		let path = path.as_ref();
		let resolved = if path.is_absolute() {
			path.to_path_buf()
		} else {
			self.base_path.join(path)
		};

		if !resolved.exists() {
			return Err(ConfigError::Io(std::io::Error::new(
				std::io::ErrorKind::NotFound,
				format!("Configuration file not found: {}", resolved.display()),
			)));
		}
		Ok(resolved)
	}
}

fn extract_includes(toml: &toml::Value) -> Result<Vec<PathBuf>, ConfigError> {
	match toml.get("include") {
		None => Ok(Vec::new()),
		Some(toml::Value::String(path)) => Ok(vec![PathBuf::from(path)]),
		Some(toml::Value::Array(items)) => items
			.iter()
			.map(|item| {
				item.as_str().map(PathBuf::from).ok_or_else(|| {
					ConfigError::Validation("Include array must contain only strings".into())
				})
			})
			.collect(),
		Some(_) => Err(ConfigError::Validation(
			"Include must be a string or array of strings".into(),
		)),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs;
	use tempfile::TempDir;

	const NETWORKS: &str = r#"
[networks.8453]
rpc_url = "http://localhost:8545"
escrow_address = "0x5fbdb2315678afecb367f032d93f642f64180aa3"
"#;

	const CORE: &str = r#"
[service]
id = "coordinator-test"

[storage]
primary = "memory"
[storage.implementations.memory]

[delivery]
[delivery.implementations.evm_alloy]

[account]
primary = "local"
[account.implementations.local]
private_keys = []

[auth]
primary = "static"
[auth.implementations.static]
tokens = {}
"#;

	#[tokio::test]
	async fn test_single_file_config() {
		let temp_dir = TempDir::new().unwrap();
		let config_path = temp_dir.path().join("config.toml");
		fs::write(&config_path, format!("{}{}", CORE, NETWORKS)).unwrap();

		let mut loader = ConfigLoader::new(temp_dir.path());
		let config = loader.load_config("config.toml").await.unwrap();
		assert_eq!(config.service.id, "coordinator-test");
		assert_eq!(config.networks.len(), 1);
	}

	#[tokio::test]
	async fn test_config_with_includes() {
		let temp_dir = TempDir::new().unwrap();
		fs::write(
			temp_dir.path().join("main.toml"),
			format!("include = [\"networks.toml\"]\n{}", CORE),
		)
		.unwrap();
		fs::write(temp_dir.path().join("networks.toml"), NETWORKS).unwrap();

		let config = Config::from_file(temp_dir.path().join("main.toml").to_str().unwrap())
			.await
			.unwrap();
		assert!(config.networks[&8453].deployed_escrow().is_some());
	}

	#[tokio::test]
	async fn test_duplicate_section_error() {
		let temp_dir = TempDir::new().unwrap();
		fs::write(
			temp_dir.path().join("main.toml"),
			format!("include = [\"extra.toml\"]\n{}{}", CORE, NETWORKS),
		)
		.unwrap();
		fs::write(
			temp_dir.path().join("extra.toml"),
			"[service]\nid = \"duplicate\"\n",
		)
		.unwrap();

		let mut loader = ConfigLoader::new(temp_dir.path());
		let err = loader.load_config("main.toml").await.unwrap_err();
		assert!(err.to_string().contains("Duplicate section 'service'"));
	}

	#[tokio::test]
	async fn test_self_include_detection() {
		let temp_dir = TempDir::new().unwrap();
		fs::write(
			temp_dir.path().join("main.toml"),
			format!("include = [\"main.toml\"]\n{}{}", CORE, NETWORKS),
		)
		.unwrap();

		let mut loader = ConfigLoader::new(temp_dir.path());
		let err = loader.load_config("main.toml").await.unwrap_err();
		assert!(err.to_string().contains("Circular include"));
	}
}
