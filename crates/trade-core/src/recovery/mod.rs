//! Reconciliation of the record store with the chain.
//!
//! The chain is authoritative. When a mirror write fails, or the coordinator
//! stops before it could confirm, the transaction stays in the
//! [`ReconciliationQueue`] and [`RecoveryService::sweep`] finishes the job
//! later. Escrow events seen by the watcher are applied the same way.

pub mod queue;

pub use queue::{QueueReason, ReconciliationEntry, ReconciliationQueue};

use crate::engine::event_bus::EventBus;
use crate::engine::locks::KeyedLocks;
use crate::state::{OrderRepository, OrderStateError, Transition};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;
use trade_delivery::DeliveryService;
use trade_types::{
	current_timestamp, truncate_id, EscrowEvent, Order, ReconciliationEvent, TradeEvent,
	TransactionHash,
};

#[derive(Debug, Error)]
pub enum RecoveryError {
	#[error("Storage error: {0}")]
	Storage(String),
	#[error("State error: {0}")]
	State(String),
}

/// Outcome of one sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconciliationReport {
	pub examined: usize,
	/// Mirrored and removed.
	pub resolved: usize,
	/// Removed without mirroring (reverted, expired, disputed, malformed).
	pub dropped: usize,
	/// Still waiting on the chain or on storage.
	pub pending: usize,
	/// Left alone because a transition on the order is in progress.
	pub skipped: usize,
}

enum EntryOutcome {
	Resolved,
	Dropped,
	Pending,
}

pub struct RecoveryService {
	repository: Arc<OrderRepository>,
	delivery: Arc<DeliveryService>,
	queue: Arc<ReconciliationQueue>,
	order_locks: Arc<KeyedLocks>,
	event_bus: EventBus,
	monitoring_timeout: Duration,
}

impl RecoveryService {
	pub fn new(
		repository: Arc<OrderRepository>,
		delivery: Arc<DeliveryService>,
		queue: Arc<ReconciliationQueue>,
		order_locks: Arc<KeyedLocks>,
		event_bus: EventBus,
		monitoring_timeout_minutes: u64,
	) -> Self {
		Self {
			repository,
			delivery,
			queue,
			order_locks,
			event_bus,
			monitoring_timeout: Duration::from_secs(monitoring_timeout_minutes * 60),
		}
	}

	/// Walks the queue once, mirroring what the chain has confirmed.
	#[instrument(skip_all)]
	pub async fn sweep(&self) -> Result<ReconciliationReport, RecoveryError> {
		let entries = self
			.queue
			.list()
			.await
			.map_err(|e| RecoveryError::Storage(e.to_string()))?;

		let mut report = ReconciliationReport {
			examined: entries.len(),
			..Default::default()
		};

		for entry in entries {
			// A held lock means the coordinator still owns this order.
			let Some(_order) = self.order_locks.try_lock(&entry.order_id) else {
				report.skipped += 1;
				continue;
			};

			match self.reconcile_entry(entry).await {
				EntryOutcome::Resolved => report.resolved += 1,
				EntryOutcome::Dropped => report.dropped += 1,
				EntryOutcome::Pending => report.pending += 1,
			}
		}

		if report.examined > 0 {
			tracing::info!(
				examined = report.examined,
				resolved = report.resolved,
				dropped = report.dropped,
				pending = report.pending,
				skipped = report.skipped,
				"Reconciliation sweep complete"
			);
		}
		Ok(report)
	}

	async fn reconcile_entry(&self, mut entry: ReconciliationEntry) -> EntryOutcome {
		let order_id = truncate_id(&entry.order_id);
		let hash = match TransactionHash::from_hex(&entry.tx_hash) {
			Ok(hash) => hash,
			Err(e) => {
				tracing::error!(order_id = %order_id, tx_hash = %entry.tx_hash, "Malformed queued hash: {}", e);
				return self.drop_entry(&entry, format!("malformed hash: {}", e)).await;
			},
		};

		let receipt = match self.delivery.receipt(&hash, entry.chain_id).await {
			Ok(receipt) => receipt,
			Err(e) => {
				tracing::warn!(order_id = %order_id, tx_hash = %truncate_id(&entry.tx_hash), "Receipt lookup failed: {}", e);
				return EntryOutcome::Pending;
			},
		};

		match receipt {
			Some(receipt) if receipt.success => {
				let at = entry.confirmed_at.unwrap_or_else(current_timestamp);
				match self
					.repository
					.catch_up(&entry.order_id, entry.operation.target_status(), at)
					.await
				{
					Ok(transition) => {
						self.resolve(&entry, hash, transition.into_order()).await;
						EntryOutcome::Resolved
					},
					Err(e @ OrderStateError::Unresolvable { .. })
					| Err(e @ OrderStateError::OrderNotFound(_)) => {
						tracing::error!(order_id = %order_id, operation = %entry.operation, "Cannot mirror confirmed transaction: {}", e);
						self.drop_entry(&entry, e.to_string()).await
					},
					Err(e) => {
						tracing::warn!(order_id = %order_id, attempts = entry.attempts + 1, "Mirror retry failed: {}", e);
						entry = entry.mirror_failed(e.to_string());
						if let Err(e) = self.queue.put(&entry).await {
							tracing::warn!(order_id = %order_id, "Failed to update queue entry: {}", e);
						}
						EntryOutcome::Pending
					},
				}
			},
			Some(receipt) => {
				tracing::warn!(
					order_id = %order_id,
					operation = %entry.operation,
					block = receipt.block_number,
					"Queued transaction reverted"
				);
				self.drop_entry(&entry, "reverted".to_string()).await
			},
			None => {
				let age = current_timestamp().saturating_sub(entry.queued_at);
				if age > self.monitoring_timeout.as_secs() {
					tracing::error!(
						order_id = %order_id,
						tx_hash = %entry.tx_hash,
						age_seconds = age,
						"Transaction never confirmed, giving up"
					);
					self.drop_entry(&entry, "confirmation timeout".to_string())
						.await
				} else {
					EntryOutcome::Pending
				}
			},
		}
	}

	async fn resolve(&self, entry: &ReconciliationEntry, tx_hash: TransactionHash, order: Order) {
		if let Err(e) = self.queue.remove(&entry.tx_hash).await {
			tracing::warn!(order_id = %truncate_id(&entry.order_id), "Failed to remove queue entry: {}", e);
		}
		tracing::info!(
			order_id = %truncate_id(&entry.order_id),
			status = %order.status,
			"Reconciled order with chain"
		);
		self.event_bus
			.publish(TradeEvent::Reconciliation(ReconciliationEvent::Resolved {
				order_id: entry.order_id.clone(),
				tx_hash,
				status: order.status,
			}))
			.ok();
	}

	async fn drop_entry(&self, entry: &ReconciliationEntry, reason: String) -> EntryOutcome {
		if let Err(e) = self.queue.remove(&entry.tx_hash).await {
			tracing::warn!(order_id = %truncate_id(&entry.order_id), "Failed to remove queue entry: {}", e);
			return EntryOutcome::Pending;
		}
		self.event_bus
			.publish(TradeEvent::Reconciliation(ReconciliationEvent::Dropped {
				order_id: entry.order_id.clone(),
				tx_hash: TransactionHash::from_hex(&entry.tx_hash).unwrap_or(TransactionHash(vec![])),
				reason,
			}))
			.ok();
		EntryOutcome::Dropped
	}

	/// Follows an escrow event observed on chain.
	///
	/// Returns the order when the record moved. Orders not mirrored yet and
	/// disputed paths are logged and skipped.
	#[instrument(skip_all, fields(order_id = %truncate_id(&event.order_id), kind = ?event.kind))]
	pub async fn apply_chain_event(&self, event: EscrowEvent) -> Result<Option<Order>, RecoveryError> {
		let target = event.kind.status();
		let transition = match self
			.repository
			.catch_up(&event.order_id, target, event.timestamp)
			.await
		{
			Ok(transition) => transition,
			Err(OrderStateError::OrderNotFound(_)) => {
				tracing::debug!("Escrow event for an order that is not mirrored");
				return Ok(None);
			},
			Err(e @ OrderStateError::Unresolvable { .. }) => {
				tracing::warn!("Escrow event left for arbitration: {}", e);
				return Ok(None);
			},
			Err(e) => return Err(RecoveryError::State(e.to_string())),
		};

		let tx_hash = event.tx_hash.to_hex();
		if let Ok(Some(entry)) = self.queue.get(&tx_hash).await {
			self.resolve(&entry, event.tx_hash.clone(), transition.order().clone())
				.await;
		}

		match transition {
			Transition::Applied(order) => {
				tracing::info!(status = %order.status, "Mirrored escrow event");
				Ok(Some(order))
			},
			Transition::Unchanged(_) => Ok(None),
		}
	}

	/// Applies a batch of escrow events in chain order, returning how many
	/// moved a record.
	pub async fn apply_chain_events(&self, mut events: Vec<EscrowEvent>) -> usize {
		events.sort_by_key(|e| (e.chain_id, e.block_number, e.log_index));
		let mut applied = 0;
		for event in events {
			match self.apply_chain_event(event).await {
				Ok(Some(_)) => applied += 1,
				Ok(None) => {},
				Err(e) => tracing::warn!("Failed to apply escrow event: {}", e),
			}
		}
		applied
	}

	pub fn queue(&self) -> &Arc<ReconciliationQueue> {
		&self.queue
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{Fixture, CHAIN_ID};
	use trade_types::{EscrowEventKind, EscrowOperation, OrderStatus};

	fn event(kind: EscrowEventKind, tx: u8) -> EscrowEvent {
		EscrowEvent {
			chain_id: CHAIN_ID,
			order_id: "1".into(),
			kind,
			tx_hash: TransactionHash(vec![tx; 32]),
			block_number: 7,
			log_index: 0,
			timestamp: 2_000,
		}
	}

	#[tokio::test]
	async fn test_chain_event_mirrors_once() {
		let fixture = Fixture::new().await;

		let order = fixture
			.recovery
			.apply_chain_event(event(EscrowEventKind::PaymentMarkedSent, 1))
			.await
			.unwrap()
			.unwrap();
		assert_eq!(order.status, OrderStatus::PaymentSent);
		assert_eq!(order.payment_sent_at, Some(2_000));

		let again = fixture
			.recovery
			.apply_chain_event(event(EscrowEventKind::PaymentMarkedSent, 1))
			.await
			.unwrap();
		assert!(again.is_none());
	}

	#[tokio::test]
	async fn test_chain_events_apply_in_block_order() {
		let fixture = Fixture::new().await;
		let cancel = EscrowEvent {
			block_number: 11,
			timestamp: 2_100,
			..event(EscrowEventKind::CancelRequested, 2)
		};
		let payment = EscrowEvent {
			block_number: 10,
			timestamp: 2_000,
			..event(EscrowEventKind::PaymentMarkedSent, 1)
		};

		let applied = fixture.recovery.apply_chain_events(vec![cancel, payment]).await;

		assert_eq!(applied, 2);
		let order = fixture.order("1").await;
		assert_eq!(order.status, OrderStatus::CancelRequested);
		assert_eq!(order.payment_sent_at, Some(2_000));
		assert_eq!(order.cancel_requested_at, Some(2_100));
	}

	#[tokio::test]
	async fn test_chain_events_in_one_block_follow_log_index() {
		let fixture = Fixture::new().await;
		let release = EscrowEvent {
			log_index: 4,
			..event(EscrowEventKind::PaymentReleased, 2)
		};
		let payment = EscrowEvent {
			log_index: 1,
			..event(EscrowEventKind::PaymentMarkedSent, 1)
		};

		fixture.recovery.apply_chain_events(vec![release, payment]).await;

		let order = fixture.order("1").await;
		assert_eq!(order.status, OrderStatus::Completed);
		assert_eq!(order.payment_sent_at, Some(2_000));
	}

	#[tokio::test]
	async fn test_chain_event_catches_up_several_steps() {
		let fixture = Fixture::new().await;

		let order = fixture
			.recovery
			.apply_chain_event(event(EscrowEventKind::OrderCancelled, 2))
			.await
			.unwrap()
			.unwrap();
		assert_eq!(order.status, OrderStatus::Cancelled);
		assert_eq!(order.cancel_requested_at, Some(2_000));
	}

	#[tokio::test]
	async fn test_disputed_chain_event_is_left_alone() {
		let fixture = Fixture::new().await;
		fixture
			.repository
			.set_cancel_requested("1", 1_500)
			.await
			.unwrap();

		let outcome = fixture
			.recovery
			.apply_chain_event(event(EscrowEventKind::PaymentReleased, 3))
			.await
			.unwrap();
		assert!(outcome.is_none());
		assert_eq!(fixture.order("1").await.status, OrderStatus::CancelRequested);
	}

	#[tokio::test]
	async fn test_chain_event_resolves_queued_entry() {
		let fixture = Fixture::new().await;
		let hash = TransactionHash(vec![4; 32]);
		fixture
			.queue
			.put(&ReconciliationEntry::in_flight("1", CHAIN_ID, hash.to_hex(), EscrowOperation::MarkPaymentSent))
			.await
			.unwrap();

		fixture
			.recovery
			.apply_chain_event(event(EscrowEventKind::PaymentMarkedSent, 4))
			.await
			.unwrap();
		assert!(fixture.queue.get(&hash.to_hex()).await.unwrap().is_none());
	}

	#[tokio::test]
	async fn test_unknown_order_event_is_ignored() {
		let fixture = Fixture::new().await;
		let mut unknown = event(EscrowEventKind::PaymentMarkedSent, 5);
		unknown.order_id = "999".into();
		assert!(fixture
			.recovery
			.apply_chain_event(unknown)
			.await
			.unwrap()
			.is_none());
	}

	#[tokio::test]
	async fn test_sweep_skips_orders_in_transition() {
		let fixture = Fixture::new().await;
		let hash = TransactionHash(vec![6; 32]);
		fixture.chain.set_receipt(&hash, true);
		fixture
			.queue
			.put(&ReconciliationEntry::in_flight("1", CHAIN_ID, hash.to_hex(), EscrowOperation::MarkPaymentSent))
			.await
			.unwrap();

		let held = fixture.order_locks.lock("1").await;
		let report = fixture.recovery.sweep().await.unwrap();
		assert_eq!(report.skipped, 1);
		assert_eq!(fixture.order("1").await.status, OrderStatus::Open);

		drop(held);
		let report = fixture.recovery.sweep().await.unwrap();
		assert_eq!(report.resolved, 1);
		assert_eq!(fixture.order("1").await.status, OrderStatus::PaymentSent);
	}

	#[tokio::test]
	async fn test_sweep_drops_reverted_and_expired_entries() {
		let fixture = Fixture::new().await;
		let reverted = TransactionHash(vec![7; 32]);
		fixture.chain.set_receipt(&reverted, false);
		fixture
			.queue
			.put(&ReconciliationEntry::in_flight("1", CHAIN_ID, reverted.to_hex(), EscrowOperation::RequestCancel))
			.await
			.unwrap();

		let mut expired = ReconciliationEntry::in_flight(
			"1",
			CHAIN_ID,
			TransactionHash(vec![8; 32]).to_hex(),
			EscrowOperation::MarkPaymentSent,
		);
		expired.queued_at = 0;
		fixture.queue.put(&expired).await.unwrap();

		let report = fixture.recovery.sweep().await.unwrap();
		assert_eq!(report.examined, 2);
		assert_eq!(report.dropped, 2);
		assert!(fixture.queue.list().await.unwrap().is_empty());
		assert_eq!(fixture.order("1").await.status, OrderStatus::Open);
	}
}
