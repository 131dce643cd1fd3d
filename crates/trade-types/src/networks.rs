//! Per-chain network configuration.
//!
//! The escrow deployment for each chain is an explicit configuration value
//! passed to the components that need it. There is no ambient "current chain".

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// Configuration for one chain.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct NetworkConfig {
	pub rpc_url: String,
	/// Deployed escrow contract. Missing or zero means not deployed on this chain.
	#[serde(default)]
	pub escrow_address: Option<String>,
	/// Seconds between blocks, used to bound confirmation waits.
	#[serde(default)]
	pub block_time_seconds: Option<u64>,
}

impl NetworkConfig {
	/// Returns the escrow address if one is configured and it is not the zero address.
	pub fn deployed_escrow(&self) -> Option<&str> {
		let address = self.escrow_address.as_deref()?.trim();
		let digits = crate::without_0x_prefix(address);
		if digits.is_empty() || digits.chars().all(|c| c == '0') {
			None
		} else {
			Some(address)
		}
	}
}

/// Chain id to network configuration.
pub type NetworksConfig = HashMap<u64, NetworkConfig>;

/// Deserializes networks keyed by chain id strings (TOML tables cannot have
/// integer keys).
pub fn deserialize_networks<'de, D>(deserializer: D) -> Result<NetworksConfig, D::Error>
where
	D: Deserializer<'de>,
{
	let string_map: HashMap<String, NetworkConfig> = HashMap::deserialize(deserializer)?;
	string_map
		.into_iter()
		.map(|(key, value)| {
			key.parse::<u64>()
				.map(|chain_id| (chain_id, value))
				.map_err(|e| {
					serde::de::Error::custom(format!("Invalid chain_id '{}': {}", key, e))
				})
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	fn network(escrow: Option<&str>) -> NetworkConfig {
		NetworkConfig {
			rpc_url: "http://localhost:8545".to_string(),
			escrow_address: escrow.map(str::to_string),
			block_time_seconds: None,
		}
	}

	#[test]
	fn test_deployed_escrow() {
		assert_eq!(
			network(Some("0x5FbDB2315678afecb367f032d93F642f64180aa3")).deployed_escrow(),
			Some("0x5FbDB2315678afecb367f032d93F642f64180aa3")
		);
		assert_eq!(network(None).deployed_escrow(), None);
		assert_eq!(network(Some("")).deployed_escrow(), None);
		assert_eq!(
			network(Some("0x0000000000000000000000000000000000000000")).deployed_escrow(),
			None
		);
	}
}
