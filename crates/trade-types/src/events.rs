//! Event types carried by the engine's event bus.
//!
//! Row-level change notifications from the order repository, transaction
//! progress from the lifecycle coordinator, and reconciliation bookkeeping
//! all flow through one broadcast bus. Subscribers filter what they need.

use crate::{EscrowOperation, OrderStatus, TransactionHash, TransactionReceipt};
use serde::{Deserialize, Serialize};

/// Top-level bus event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TradeEvent {
	/// A row in the record store changed.
	Row(ChangeEvent),
	/// Escrow transaction progress.
	Delivery(DeliveryEvent),
	/// Reconciliation queue changes.
	Reconciliation(ReconciliationEvent),
}

/// Kind of row-level change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
	Insert,
	Update,
	Delete,
}

/// A raw row-level change notification.
///
/// `record` and `old_record` are the store's wire rows, not the canonical
/// model; consumers normalize them. `order_id` is the public identifier the
/// feed filters on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
	pub kind: ChangeKind,
	pub table: String,
	pub order_id: String,
	#[serde(default)]
	pub record: Option<serde_json::Value>,
	#[serde(default)]
	pub old_record: Option<serde_json::Value>,
	pub commit_timestamp: u64,
}

/// Progress of an escrow transaction submitted by the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DeliveryEvent {
	TransactionPending {
		order_id: String,
		tx_hash: TransactionHash,
		operation: EscrowOperation,
		chain_id: u64,
	},
	TransactionConfirmed {
		order_id: String,
		tx_hash: TransactionHash,
		operation: EscrowOperation,
		receipt: TransactionReceipt,
	},
	TransactionFailed {
		order_id: String,
		tx_hash: TransactionHash,
		operation: EscrowOperation,
		error: String,
	},
}

/// Changes to the reconciliation queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ReconciliationEvent {
	/// The record lags the chain and an entry was queued.
	Queued {
		order_id: String,
		tx_hash: TransactionHash,
		reason: String,
	},
	/// The record was brought in line with the chain.
	Resolved {
		order_id: String,
		tx_hash: TransactionHash,
		status: OrderStatus,
	},
	/// The entry was discarded without mirroring.
	Dropped {
		order_id: String,
		tx_hash: TransactionHash,
		reason: String,
	},
}

/// Escrow contract events observed on chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscrowEventKind {
	CancelRequested,
	PaymentMarkedSent,
	PaymentReleased,
	OrderCancelled,
}

impl EscrowEventKind {
	/// Status the order has reached on chain when this event is emitted.
	pub fn status(&self) -> OrderStatus {
		match self {
			EscrowEventKind::CancelRequested => OrderStatus::CancelRequested,
			EscrowEventKind::PaymentMarkedSent => OrderStatus::PaymentSent,
			EscrowEventKind::PaymentReleased => OrderStatus::Completed,
			EscrowEventKind::OrderCancelled => OrderStatus::Cancelled,
		}
	}
}

/// An escrow event decoded from a chain log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowEvent {
	pub chain_id: u64,
	pub order_id: String,
	pub kind: EscrowEventKind,
	pub tx_hash: TransactionHash,
	pub block_number: u64,
	/// Position of the log within its block.
	#[serde(default)]
	pub log_index: u64,
	/// Block timestamp when known, else observation time.
	pub timestamp: u64,
}
