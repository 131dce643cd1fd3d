//! The trade engine: owns every service and runs the background loop.
//!
//! Requests reach the engine through its handlers. The loop itself only
//! follows the chain: escrow events from the watchers, the periodic
//! reconciliation sweep, storage cleanup and lock pruning.

pub mod event_bus;
pub mod lifecycle;
pub mod locks;

use crate::chat::ChatService;
use crate::guard::AccessGuard;
use crate::handlers::{OrderHandler, TransitionHandler};
use crate::propagation::{BusChangeFeed, ChangePropagator};
use crate::recovery::{ReconciliationQueue, RecoveryService};
use crate::state::OrderRepository;
use locks::KeyedLocks;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use trade_auth::AuthService;
use trade_config::Config;
use trade_delivery::DeliveryService;
use trade_storage::StorageService;
use trade_types::EscrowEvent;
use trade_watcher::WatchService;

#[derive(Debug, Error)]
pub enum EngineError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Service error: {0}")]
	Service(String),
	#[error("Handler error: {0}")]
	Handler(String),
}

#[derive(Clone)]
pub struct TradeEngine {
	pub(crate) config: Config,
	pub(crate) storage: Arc<StorageService>,
	pub(crate) repository: Arc<OrderRepository>,
	pub(crate) delivery: Arc<DeliveryService>,
	pub(crate) watcher: Arc<WatchService>,
	pub(crate) event_bus: event_bus::EventBus,
	pub(crate) order_locks: Arc<KeyedLocks>,
	pub(crate) recovery: Arc<RecoveryService>,
	pub(crate) transitions: Arc<TransitionHandler>,
	pub(crate) orders: Arc<OrderHandler>,
	pub(crate) chat: Arc<ChatService>,
}

impl TradeEngine {
	pub fn new(
		config: Config,
		storage: Arc<StorageService>,
		auth: Arc<AuthService>,
		delivery: Arc<DeliveryService>,
		watcher: Arc<WatchService>,
		event_bus: event_bus::EventBus,
	) -> Self {
		let repository = Arc::new(
			OrderRepository::new(storage.clone(), event_bus.clone())
				.with_confirm_window(config.service.confirm_window_seconds),
		);
		let guard = Arc::new(AccessGuard::new(repository.clone()));
		let queue = Arc::new(ReconciliationQueue::new(storage.clone()));
		let order_locks = Arc::new(KeyedLocks::new());

		let recovery = Arc::new(RecoveryService::new(
			repository.clone(),
			delivery.clone(),
			queue.clone(),
			order_locks.clone(),
			event_bus.clone(),
			config.service.monitoring_timeout_minutes,
		));

		let response_timeout = config
			.api
			.as_ref()
			.filter(|api| api.enabled)
			.map(|api| Duration::from_secs(api.timeout_seconds));
		let transitions = Arc::new(
			TransitionHandler::new(
				auth.clone(),
				guard.clone(),
				repository.clone(),
				delivery.clone(),
				queue,
				order_locks.clone(),
				event_bus.clone(),
			)
			.with_response_timeout(response_timeout),
		);

		let propagator = Arc::new(ChangePropagator::new(
			Arc::new(BusChangeFeed::new(event_bus.clone())),
			Duration::from_secs(config.propagation.subscribe_timeout_seconds),
			config.propagation.buffer_size,
		));

		let orders = Arc::new(OrderHandler::new(
			auth.clone(),
			guard.clone(),
			repository.clone(),
			propagator,
		));

		let chat = Arc::new(ChatService::new(
			auth,
			guard,
			storage.clone(),
			event_bus.clone(),
		));

		Self {
			config,
			storage,
			repository,
			delivery,
			watcher,
			event_bus,
			order_locks,
			recovery,
			transitions,
			orders,
			chat,
		}
	}

	/// Runs until Ctrl-C.
	pub async fn run(&self) -> Result<(), EngineError> {
		let (event_tx, event_rx) = mpsc::unbounded_channel();
		self.watcher
			.start_all(event_tx)
			.await
			.map_err(|e| EngineError::Service(e.to_string()))?;

		let applier_handle = tokio::spawn(apply_escrow_events(self.recovery.clone(), event_rx));

		let storage = self.storage.clone();
		let locks = self.order_locks.clone();
		let cleanup_period = Duration::from_secs(self.config.storage.cleanup_interval_seconds.max(1));
		let cleanup_handle = tokio::spawn(async move {
			let mut interval = tokio::time::interval(cleanup_period);
			loop {
				interval.tick().await;
				match storage.cleanup_expired().await {
					Ok(count) if count > 0 => {
						tracing::debug!("Storage cleanup: removed {} expired entries", count);
					},
					Err(e) => {
						tracing::warn!("Storage cleanup failed: {}", e);
					},
					_ => {},
				}
				let pruned = locks.prune();
				if pruned > 0 {
					tracing::debug!("Pruned {} idle order locks", pruned);
				}
			}
		});

		let mut sweep_interval = tokio::time::interval(Duration::from_secs(
			self.config.service.reconciliation_interval_seconds.max(1),
		));
		sweep_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
		// The startup sweep already ran in initialize.
		sweep_interval.tick().await;

		loop {
			tokio::select! {
				_ = sweep_interval.tick() => {
					if let Err(e) = self.recovery.sweep().await {
						tracing::warn!("Reconciliation sweep failed: {}", e);
					}
				}

				_ = tokio::signal::ctrl_c() => {
					tracing::info!("Shutdown signal received");
					break;
				}
			}
		}

		cleanup_handle.abort();
		applier_handle.abort();
		self.shutdown().await
	}

	pub fn event_bus(&self) -> &event_bus::EventBus {
		&self.event_bus
	}

	pub fn config(&self) -> &Config {
		&self.config
	}

	pub fn storage(&self) -> &Arc<StorageService> {
		&self.storage
	}

	pub fn repository(&self) -> &Arc<OrderRepository> {
		&self.repository
	}

	pub fn delivery(&self) -> &Arc<DeliveryService> {
		&self.delivery
	}

	pub fn watcher(&self) -> &Arc<WatchService> {
		&self.watcher
	}

	pub fn recovery(&self) -> &Arc<RecoveryService> {
		&self.recovery
	}

	pub fn transitions(&self) -> &Arc<TransitionHandler> {
		&self.transitions
	}

	pub fn orders(&self) -> &Arc<OrderHandler> {
		&self.orders
	}

	pub fn chat(&self) -> &Arc<ChatService> {
		&self.chat
	}
}

/// Applies watcher events one batch at a time, each batch in chain order,
/// so an order never skips a state it passed through on chain.
async fn apply_escrow_events(
	recovery: Arc<RecoveryService>,
	mut events: mpsc::UnboundedReceiver<EscrowEvent>,
) {
	while let Some(first) = events.recv().await {
		let mut batch = vec![first];
		while let Ok(event) = events.try_recv() {
			batch.push(event);
		}
		recovery.apply_chain_events(batch).await;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{Fixture, CHAIN_ID};
	use trade_types::{EscrowEventKind, OrderStatus, TransactionHash};

	fn escrow_event(kind: EscrowEventKind, block_number: u64, timestamp: u64) -> EscrowEvent {
		EscrowEvent {
			chain_id: CHAIN_ID,
			order_id: "1".into(),
			kind,
			tx_hash: TransactionHash(vec![block_number as u8; 32]),
			block_number,
			log_index: 0,
			timestamp,
		}
	}

	#[tokio::test]
	async fn test_watcher_events_keep_chain_order() {
		let fixture = Fixture::new().await;
		let (tx, rx) = mpsc::unbounded_channel();
		tx.send(escrow_event(EscrowEventKind::CancelRequested, 11, 2_100))
			.unwrap();
		tx.send(escrow_event(EscrowEventKind::PaymentMarkedSent, 10, 2_000))
			.unwrap();
		drop(tx);

		apply_escrow_events(fixture.recovery.clone(), rx).await;

		let order = fixture.order("1").await;
		assert_eq!(order.status, OrderStatus::CancelRequested);
		assert_eq!(order.payment_sent_at, Some(2_000));
	}
}
