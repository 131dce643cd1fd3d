//! Persistent queue of escrow transactions whose mirror is not yet written.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use trade_storage::{StorageError, StorageService};
use trade_types::{current_timestamp, EscrowOperation, StorageKey};

/// Why an entry is queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueueReason {
	/// Submitted; confirmation or mirroring has not finished yet.
	InFlight,
	/// Confirmed on chain but the record-store write failed.
	MirrorFailed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationEntry {
	pub order_id: String,
	pub chain_id: u64,
	/// `0x` hex, also the storage id.
	pub tx_hash: String,
	pub operation: EscrowOperation,
	pub reason: QueueReason,
	pub attempts: u32,
	pub queued_at: u64,
	#[serde(default)]
	pub confirmed_at: Option<u64>,
}

impl ReconciliationEntry {
	pub fn in_flight(
		order_id: impl Into<String>,
		chain_id: u64,
		tx_hash: impl Into<String>,
		operation: EscrowOperation,
	) -> Self {
		Self {
			order_id: order_id.into(),
			chain_id,
			tx_hash: tx_hash.into(),
			operation,
			reason: QueueReason::InFlight,
			attempts: 0,
			queued_at: current_timestamp(),
			confirmed_at: None,
		}
	}

	pub fn mirror_failed(mut self, error: impl Into<String>) -> Self {
		self.reason = QueueReason::MirrorFailed {
			error: error.into(),
		};
		self.attempts += 1;
		self.confirmed_at.get_or_insert_with(current_timestamp);
		self
	}
}

pub struct ReconciliationQueue {
	storage: Arc<StorageService>,
}

impl ReconciliationQueue {
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self { storage }
	}

	pub async fn put(&self, entry: &ReconciliationEntry) -> Result<(), StorageError> {
		self.storage
			.store(StorageKey::Reconciliation.as_str(), &entry.tx_hash, entry)
			.await
	}

	pub async fn get(&self, tx_hash: &str) -> Result<Option<ReconciliationEntry>, StorageError> {
		self.storage
			.find(StorageKey::Reconciliation.as_str(), tx_hash)
			.await
	}

	/// Removes an entry; removing a missing entry is not an error.
	pub async fn remove(&self, tx_hash: &str) -> Result<(), StorageError> {
		self.storage
			.remove(StorageKey::Reconciliation.as_str(), tx_hash)
			.await
	}

	/// Every entry, oldest first.
	pub async fn list(&self) -> Result<Vec<ReconciliationEntry>, StorageError> {
		let mut entries: Vec<ReconciliationEntry> = self
			.storage
			.retrieve_all(StorageKey::Reconciliation.as_str(), "")
			.await?
			.into_iter()
			.map(|(_, entry)| entry)
			.collect();
		entries.sort_by(|a, b| {
			a.queued_at
				.cmp(&b.queued_at)
				.then_with(|| a.tx_hash.cmp(&b.tx_hash))
		});
		Ok(entries)
	}

	pub async fn for_order(&self, order_id: &str) -> Result<Vec<ReconciliationEntry>, StorageError> {
		Ok(self
			.list()
			.await?
			.into_iter()
			.filter(|entry| entry.order_id == order_id)
			.collect())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use trade_storage::implementations::memory::MemoryStorage;

	#[tokio::test]
	async fn test_entries_round_trip_through_storage() {
		let queue = ReconciliationQueue::new(Arc::new(StorageService::new(Box::new(
			MemoryStorage::new(),
		))));

		let mut older = ReconciliationEntry::in_flight("1", 1, "0xaa", EscrowOperation::MarkPaymentSent);
		older.queued_at = 10;
		let newer = ReconciliationEntry::in_flight("2", 1, "0xbb", EscrowOperation::RequestCancel)
			.mirror_failed("disk full");

		queue.put(&newer).await.unwrap();
		queue.put(&older).await.unwrap();

		let entries = queue.list().await.unwrap();
		assert_eq!(entries, vec![older.clone(), newer.clone()]);
		assert_eq!(newer.attempts, 1);
		assert!(newer.confirmed_at.is_some());
		assert_eq!(queue.for_order("2").await.unwrap(), vec![newer]);

		queue.remove("0xaa").await.unwrap();
		queue.remove("0xaa").await.unwrap();
		assert_eq!(queue.get("0xaa").await.unwrap(), None);
	}
}
