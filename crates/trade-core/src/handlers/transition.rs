//! Lifecycle coordinator for user-initiated escrow transitions.
//!
//! Each transition authenticates, authorizes, validates against the current
//! row, submits one escrow call, waits for it, and mirrors the result. The
//! chain step is irreversible: once a transaction is submitted the caller is
//! never told the action failed unless the chain itself rejected it, and a
//! failed mirror write is queued for reconciliation instead of surfaced.

use crate::engine::event_bus::EventBus;
use crate::engine::locks::KeyedLocks;
use crate::guard::{AccessGuard, GuardError};
use crate::recovery::{ReconciliationEntry, ReconciliationQueue};
use crate::state::{is_valid_transition, OrderRepository, OrderStateError};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::instrument;
use trade_auth::{AuthError, AuthService};
use trade_delivery::{DeliveryError, DeliveryService};
use trade_types::{
	current_timestamp, truncate_id, DeliveryEvent, EscrowOperation, OrderStatus,
	ReconciliationEvent, SecretString, SignerContext, TradeEvent, TransactionHash,
};

#[derive(Debug, Error)]
pub enum TransitionError {
	#[error("Not authenticated")]
	NotAuthenticated,
	#[error("Invalid token")]
	InvalidToken,
	#[error("Not found: {0}")]
	NotFound(String),
	#[error("Not a party to order {0}")]
	Unauthorized(String),
	#[error("Invalid transition: {0}")]
	InvalidTransition(String),
	#[error("Order already exists: {0}")]
	AlreadyExists(String),
	#[error("Escrow not deployed on chain {0}")]
	NotDeployedOnChain(u64),
	#[error("No signer available for {0}")]
	SignerUnavailable(String),
	#[error("Chain call failed: {0}")]
	ChainCallFailed(String),
	#[error("Validation error: {0}")]
	Validation(String),
	#[error("Storage error: {0}")]
	Storage(String),
	#[error("Internal error: {0}")]
	Internal(String),
}

impl From<AuthError> for TransitionError {
	fn from(e: AuthError) -> Self {
		match e {
			AuthError::NotAuthenticated => TransitionError::NotAuthenticated,
			AuthError::InvalidToken => TransitionError::InvalidToken,
			AuthError::Implementation(msg) => TransitionError::Internal(msg),
		}
	}
}

impl From<GuardError> for TransitionError {
	fn from(e: GuardError) -> Self {
		match e {
			GuardError::NotFound(what) => TransitionError::NotFound(what),
			GuardError::Unauthorized { order_id, .. } => TransitionError::Unauthorized(order_id),
			GuardError::Storage(msg) => TransitionError::Storage(msg),
		}
	}
}

impl From<OrderStateError> for TransitionError {
	fn from(e: OrderStateError) -> Self {
		match e {
			OrderStateError::OrderNotFound(id) => TransitionError::NotFound(format!("order {}", id)),
			OrderStateError::AlreadyExists(id) => TransitionError::AlreadyExists(id),
			OrderStateError::SelfTrade(id) => {
				TransitionError::Validation(format!("order {} has the same maker and taker", id))
			},
			e @ (OrderStateError::StaleTransition { .. } | OrderStateError::Unresolvable { .. }) => {
				TransitionError::InvalidTransition(e.to_string())
			},
			OrderStateError::Storage(msg) => TransitionError::Storage(msg),
		}
	}
}

impl From<DeliveryError> for TransitionError {
	fn from(e: DeliveryError) -> Self {
		match e {
			DeliveryError::NotDeployedOnChain(chain_id) => TransitionError::NotDeployedOnChain(chain_id),
			DeliveryError::SignerUnavailable(address) => TransitionError::SignerUnavailable(address),
			DeliveryError::ChainCallFailed(reason) => TransitionError::ChainCallFailed(reason),
			DeliveryError::InvalidOrderId(msg) => TransitionError::Validation(msg),
			DeliveryError::Network(msg) => TransitionError::ChainCallFailed(msg),
			e @ DeliveryError::NoProviderAvailable(_) => TransitionError::Internal(e.to_string()),
		}
	}
}

/// Whether the record store reflects the confirmed transition yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MirrorStatus {
	Mirrored,
	/// Queued for reconciliation; the chain already has the new state.
	Pending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionOutcome {
	pub order_id: String,
	pub operation: EscrowOperation,
	pub status: OrderStatus,
	pub tx_hash: String,
	pub mirror: MirrorStatus,
}

#[derive(Clone)]
pub struct TransitionHandler {
	auth: Arc<AuthService>,
	guard: Arc<AccessGuard>,
	repository: Arc<OrderRepository>,
	delivery: Arc<DeliveryService>,
	queue: Arc<ReconciliationQueue>,
	order_locks: Arc<KeyedLocks>,
	event_bus: EventBus,
	/// How long a caller waits for confirmation before getting a pending outcome.
	response_timeout: Option<Duration>,
}

impl TransitionHandler {
	pub fn new(
		auth: Arc<AuthService>,
		guard: Arc<AccessGuard>,
		repository: Arc<OrderRepository>,
		delivery: Arc<DeliveryService>,
		queue: Arc<ReconciliationQueue>,
		order_locks: Arc<KeyedLocks>,
		event_bus: EventBus,
	) -> Self {
		Self {
			auth,
			guard,
			repository,
			delivery,
			queue,
			order_locks,
			event_bus,
			response_timeout: None,
		}
	}

	pub fn with_response_timeout(mut self, timeout: Option<Duration>) -> Self {
		self.response_timeout = timeout;
		self
	}

	pub async fn request_cancel(
		&self,
		token: Option<&SecretString>,
		order_id: &str,
	) -> Result<TransitionOutcome, TransitionError> {
		self.execute(token, order_id, EscrowOperation::RequestCancel)
			.await
	}

	pub async fn mark_payment_sent(
		&self,
		token: Option<&SecretString>,
		order_id: &str,
	) -> Result<TransitionOutcome, TransitionError> {
		self.execute(token, order_id, EscrowOperation::MarkPaymentSent)
			.await
	}

	pub async fn confirm_and_release(
		&self,
		token: Option<&SecretString>,
		order_id: &str,
	) -> Result<TransitionOutcome, TransitionError> {
		self.execute(token, order_id, EscrowOperation::ConfirmPaymentAndRelease)
			.await
	}

	#[instrument(skip_all, fields(order_id = %truncate_id(order_id), operation = %operation))]
	async fn execute(
		&self,
		token: Option<&SecretString>,
		order_id: &str,
		operation: EscrowOperation,
	) -> Result<TransitionOutcome, TransitionError> {
		let identity = self.auth.authenticate(token).await?;
		let authorization = self.guard.authorize(&identity, order_id).await?;
		let signer = SignerContext {
			chain_id: authorization.order.chain_id,
			address: authorization.party_address().to_string(),
		};

		let order_guard = self.order_locks.lock(order_id).await;
		let current = self.repository.get_order(order_id).await?;
		let target = operation.target_status();
		if !is_valid_transition(current.status, target) {
			return Err(TransitionError::InvalidTransition(format!(
				"cannot {} an order in status {}",
				operation, current.status
			)));
		}

		// The task owns the order lock and keeps going if the caller goes away.
		let handler = self.clone();
		let task_order_id = order_id.to_string();
		let (submitted_tx, submitted_rx) = oneshot::channel();
		let mut task = tokio::spawn(async move {
			let _order_guard = order_guard;
			handler
				.drive(task_order_id, operation, signer, submitted_tx)
				.await
		});

		let Some(deadline) = self.response_timeout else {
			return join_transition(task).await;
		};
		tokio::select! {
			result = &mut task => flatten_join(result),
			_ = tokio::time::sleep(deadline) => {
				if task.is_finished() {
					return join_transition(task).await;
				}
				// Past the deadline a submitted call is reported pending, never failed.
				match submitted_rx.await {
					Ok(tx_hash) => {
						tracing::info!(
							tx_hash = %truncate_id(&tx_hash.to_hex()),
							"Confirmation still outstanding, reporting pending"
						);
						Ok(TransitionOutcome {
							order_id: order_id.to_string(),
							operation,
							status: target,
							tx_hash: tx_hash.to_hex(),
							mirror: MirrorStatus::Pending,
						})
					},
					// Dropped before submission: the task has its own answer.
					Err(_) => join_transition(task).await,
				}
			}
		}
	}

	/// Submit, confirm, mirror. Runs while holding the order lock.
	async fn drive(
		&self,
		order_id: String,
		operation: EscrowOperation,
		signer: SignerContext,
		submitted: oneshot::Sender<TransactionHash>,
	) -> Result<TransitionOutcome, TransitionError> {
		let chain_id = signer.chain_id;
		let tx_hash = self.delivery.submit(operation, &order_id, &signer).await?;
		submitted.send(tx_hash.clone()).ok();
		self.publish(TradeEvent::Delivery(DeliveryEvent::TransactionPending {
			order_id: order_id.clone(),
			tx_hash: tx_hash.clone(),
			operation,
			chain_id,
		}));

		let entry = ReconciliationEntry::in_flight(&order_id, chain_id, tx_hash.to_hex(), operation);
		if let Err(e) = self.queue.put(&entry).await {
			tracing::warn!(tx_hash = %truncate_id(&entry.tx_hash), "Failed to queue in-flight transaction: {}", e);
		}

		let outcome = |mirror| TransitionOutcome {
			order_id: order_id.clone(),
			operation,
			status: operation.target_status(),
			tx_hash: tx_hash.to_hex(),
			mirror,
		};

		let receipt = match self.delivery.confirm(&tx_hash, chain_id).await {
			Ok(receipt) => receipt,
			Err(DeliveryError::ChainCallFailed(reason)) => {
				tracing::warn!(tx_hash = %truncate_id(&entry.tx_hash), "Escrow call failed: {}", reason);
				self.publish(TradeEvent::Delivery(DeliveryEvent::TransactionFailed {
					order_id: order_id.clone(),
					tx_hash: tx_hash.clone(),
					operation,
					error: reason.clone(),
				}));
				if let Err(e) = self.queue.remove(&entry.tx_hash).await {
					tracing::warn!("Failed to dequeue failed transaction: {}", e);
				}
				return Err(TransitionError::ChainCallFailed(reason));
			},
			Err(e) => {
				// Submitted but unconfirmed: the chain decides, the sweep follows.
				tracing::warn!(tx_hash = %truncate_id(&entry.tx_hash), "Could not confirm transaction: {}", e);
				self.publish_queued(&order_id, &tx_hash, e.to_string());
				return Ok(outcome(MirrorStatus::Pending));
			},
		};

		self.publish(TradeEvent::Delivery(DeliveryEvent::TransactionConfirmed {
			order_id: order_id.clone(),
			tx_hash: tx_hash.clone(),
			operation,
			receipt,
		}));

		match self
			.repository
			.apply_transition(&order_id, operation.target_status(), current_timestamp())
			.await
		{
			Ok(_) => {
				if let Err(e) = self.queue.remove(&entry.tx_hash).await {
					tracing::warn!("Failed to dequeue mirrored transaction: {}", e);
				}
				Ok(outcome(MirrorStatus::Mirrored))
			},
			Err(e) => {
				tracing::error!(
					tx_hash = %entry.tx_hash,
					error = %e,
					"Mirror write failed, queued for reconciliation"
				);
				let entry = entry.mirror_failed(e.to_string());
				if let Err(e) = self.queue.put(&entry).await {
					tracing::error!(tx_hash = %entry.tx_hash, "Failed to queue mirror failure: {}", e);
				}
				self.publish_queued(&order_id, &tx_hash, e.to_string());
				Ok(outcome(MirrorStatus::Pending))
			},
		}
	}

	fn publish_queued(&self, order_id: &str, tx_hash: &TransactionHash, reason: String) {
		self.publish(TradeEvent::Reconciliation(ReconciliationEvent::Queued {
			order_id: order_id.to_string(),
			tx_hash: tx_hash.clone(),
			reason,
		}));
	}

	fn publish(&self, event: TradeEvent) {
		self.event_bus.publish(event).ok();
	}
}

async fn join_transition(
	task: tokio::task::JoinHandle<Result<TransitionOutcome, TransitionError>>,
) -> Result<TransitionOutcome, TransitionError> {
	flatten_join(task.await)
}

fn flatten_join(
	result: Result<Result<TransitionOutcome, TransitionError>, tokio::task::JoinError>,
) -> Result<TransitionOutcome, TransitionError> {
	result.map_err(|e| TransitionError::Internal(format!("transition task failed: {}", e)))?
}
