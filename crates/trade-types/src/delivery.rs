//! Transaction submission types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Blockchain transaction hash as raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionHash(pub Vec<u8>);

impl TransactionHash {
	/// Parses a hex hash with or without `0x` prefix.
	pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
		hex::decode(crate::without_0x_prefix(s)).map(TransactionHash)
	}

	/// Lower-case `0x`-prefixed hex form, also used as the storage key.
	pub fn to_hex(&self) -> String {
		format!("0x{}", hex::encode(&self.0))
	}
}

impl fmt::Display for TransactionHash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.to_hex())
	}
}

/// Receipt of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
	pub hash: TransactionHash,
	pub block_number: u64,
	/// False when the transaction was mined but reverted.
	pub success: bool,
}

/// Who signs an escrow call: the acting party's chain address on a given chain.
///
/// Threaded explicitly through every driver call instead of being looked up
/// from ambient wallet state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerContext {
	pub chain_id: u64,
	/// Lower-cased `0x` address.
	pub address: String,
}

/// An unsigned contract call ready for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
	pub chain_id: u64,
	pub from: String,
	pub to: String,
	pub data: Vec<u8>,
}
