//! Order rows and the forward-only status machine.
//!
//! `open -> payment_sent -> completed` is the happy path,
//! `open -> cancel_requested -> cancelled` the cancellation path, and
//! `payment_sent -> cancel_requested` the disputed edge. Nothing leaves a
//! terminal state.

use crate::engine::event_bus::EventBus;
use crate::engine::locks::KeyedLocks;
use crate::propagation::wire;
use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use trade_storage::{StorageError, StorageService};
use trade_types::{
	current_timestamp, truncate_id, ChangeEvent, ChangeKind, Order, OrderStatus, StorageKey,
	TradeEvent,
};

#[derive(Debug, Error)]
pub enum OrderStateError {
	#[error("Storage error: {0}")]
	Storage(String),
	#[error("Order not found: {0}")]
	OrderNotFound(String),
	#[error("Order already exists: {0}")]
	AlreadyExists(String),
	#[error("Maker and taker are the same user: {0}")]
	SelfTrade(String),
	/// The stored status does not allow moving to the requested one.
	#[error("Stale transition from {from} to {to}")]
	StaleTransition { from: OrderStatus, to: OrderStatus },
	/// No forward path leads from the stored status to the requested one.
	#[error("No forward path from {from} to {to}")]
	Unresolvable { from: OrderStatus, to: OrderStatus },
}

impl From<StorageError> for OrderStateError {
	fn from(e: StorageError) -> Self {
		OrderStateError::Storage(e.to_string())
	}
}

/// Result of a status write.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
	/// The row moved; carries the new row.
	Applied(Order),
	/// The row was already at the target; nothing was written.
	Unchanged(Order),
}

impl Transition {
	pub fn order(&self) -> &Order {
		match self {
			Transition::Applied(order) | Transition::Unchanged(order) => order,
		}
	}

	pub fn into_order(self) -> Order {
		match self {
			Transition::Applied(order) | Transition::Unchanged(order) => order,
		}
	}

	pub fn is_applied(&self) -> bool {
		matches!(self, Transition::Applied(_))
	}
}

static TRANSITIONS: Lazy<HashMap<OrderStatus, HashSet<OrderStatus>>> = Lazy::new(|| {
	HashMap::from([
		(
			OrderStatus::Open,
			HashSet::from([OrderStatus::PaymentSent, OrderStatus::CancelRequested]),
		),
		(
			OrderStatus::PaymentSent,
			HashSet::from([OrderStatus::Completed, OrderStatus::CancelRequested]),
		),
		(
			OrderStatus::CancelRequested,
			HashSet::from([OrderStatus::Cancelled]),
		),
		(OrderStatus::Completed, HashSet::new()),
		(OrderStatus::Cancelled, HashSet::new()),
	])
});

/// True if `to` is a single forward step from `from`.
pub fn is_valid_transition(from: OrderStatus, to: OrderStatus) -> bool {
	TRANSITIONS.get(&from).is_some_and(|next| next.contains(&to))
}

/// Shortest forward path from `from` to `to`, excluding `from`.
fn forward_path(from: OrderStatus, to: OrderStatus) -> Option<Vec<OrderStatus>> {
	let mut previous: HashMap<OrderStatus, OrderStatus> = HashMap::new();
	let mut queue = VecDeque::from([from]);
	while let Some(status) = queue.pop_front() {
		if status == to {
			let mut path = vec![to];
			let mut cursor = to;
			while let Some(&prev) = previous.get(&cursor) {
				if prev == from {
					break;
				}
				path.push(prev);
				cursor = prev;
			}
			path.reverse();
			return Some(path);
		}
		// Iterate in a fixed order so equal-length paths resolve the same way.
		let mut next: Vec<_> = TRANSITIONS
			.get(&status)
			.map(|set| set.iter().copied().collect())
			.unwrap_or_default();
		next.sort_by_key(|s| s.as_str());
		for candidate in next {
			if candidate != from && !previous.contains_key(&candidate) {
				previous.insert(candidate, status);
				queue.push_back(candidate);
			}
		}
	}
	None
}

/// Sets `status` and the timestamps that belong to it. Timestamps already
/// present are kept.
fn apply_status(order: &mut Order, status: OrderStatus, at: u64, confirm_window: Option<u64>) {
	order.status = status;
	match status {
		OrderStatus::PaymentSent => {
			let sent_at = *order.payment_sent_at.get_or_insert(at);
			if let (None, Some(window)) = (order.confirm_deadline, confirm_window) {
				order.confirm_deadline = Some(sent_at.saturating_add(window));
			}
		},
		OrderStatus::CancelRequested => {
			order.cancel_requested_at.get_or_insert(at);
		},
		OrderStatus::Open | OrderStatus::Completed | OrderStatus::Cancelled => {},
	}
}

/// Atomic single-row reads and writes of cached orders, keyed by the public
/// order id.
pub struct OrderRepository {
	pub(crate) storage: Arc<StorageService>,
	pub(crate) event_bus: EventBus,
	row_locks: KeyedLocks,
	confirm_window: Option<u64>,
}

impl OrderRepository {
	pub fn new(storage: Arc<StorageService>, event_bus: EventBus) -> Self {
		Self {
			storage,
			event_bus,
			row_locks: KeyedLocks::new(),
			confirm_window: None,
		}
	}

	/// Derive `confirm_deadline` from `payment_sent_at` plus `seconds`.
	pub fn with_confirm_window(mut self, seconds: Option<u64>) -> Self {
		self.confirm_window = seconds;
		self
	}

	/// Stores a freshly opened order.
	pub async fn create_order(&self, mut order: Order) -> Result<Order, OrderStateError> {
		if order.maker_id == order.taker_id {
			return Err(OrderStateError::SelfTrade(order.order_id));
		}

		let _row = self.row_locks.lock(&order.order_id).await;
		if self
			.storage
			.exists(StorageKey::Orders.as_str(), &order.order_id)
			.await?
		{
			return Err(OrderStateError::AlreadyExists(order.order_id));
		}

		order.maker_address = trade_types::normalize_address(&order.maker_address);
		order.taker_address = trade_types::normalize_address(&order.taker_address);
		order.status = OrderStatus::Open;
		order.payment_sent_at = None;
		order.cancel_requested_at = None;

		self.storage
			.store(StorageKey::Orders.as_str(), &order.order_id, &order)
			.await?;
		self.publish_change(ChangeKind::Insert, &order, None);

		tracing::info!(order_id = %truncate_id(&order.order_id), "Order opened");
		Ok(order)
	}

	pub async fn get_order(&self, order_id: &str) -> Result<Order, OrderStateError> {
		self.storage
			.find(StorageKey::Orders.as_str(), order_id)
			.await?
			.ok_or_else(|| OrderStateError::OrderNotFound(order_id.to_string()))
	}

	pub async fn set_status(
		&self,
		order_id: &str,
		status: OrderStatus,
	) -> Result<Transition, OrderStateError> {
		self.apply_transition(order_id, status, current_timestamp())
			.await
	}

	/// Moves to `payment_sent` and stamps `payment_sent_at` in one write.
	pub async fn mark_payment_sent(
		&self,
		order_id: &str,
		at: u64,
	) -> Result<Transition, OrderStateError> {
		self.apply_transition(order_id, OrderStatus::PaymentSent, at)
			.await
	}

	/// Moves to `cancel_requested` and stamps `cancel_requested_at` in one write.
	pub async fn set_cancel_requested(
		&self,
		order_id: &str,
		at: u64,
	) -> Result<Transition, OrderStateError> {
		self.apply_transition(order_id, OrderStatus::CancelRequested, at)
			.await
	}

	/// Applies one forward step under the row lock.
	///
	/// Already at `target` is `Unchanged`. Anything other than a single
	/// forward step from the stored status is `StaleTransition`, so delayed
	/// or repeated mirrors never move a row backwards.
	pub async fn apply_transition(
		&self,
		order_id: &str,
		target: OrderStatus,
		at: u64,
	) -> Result<Transition, OrderStateError> {
		let _row = self.row_locks.lock(order_id).await;
		let current = self.get_order(order_id).await?;

		if current.status == target {
			return Ok(Transition::Unchanged(current));
		}
		if !is_valid_transition(current.status, target) {
			return Err(OrderStateError::StaleTransition {
				from: current.status,
				to: target,
			});
		}

		let mut next = current.clone();
		apply_status(&mut next, target, at, self.confirm_window);
		next.updated_at = current_timestamp().max(current.updated_at);

		self.storage
			.update(StorageKey::Orders.as_str(), order_id, &next)
			.await?;
		self.publish_change(ChangeKind::Update, &next, Some(&current));

		tracing::info!(
			order_id = %truncate_id(order_id),
			from = %current.status,
			to = %target,
			"Order status updated"
		);
		Ok(Transition::Applied(next))
	}

	/// Walks the shortest forward path to `target`, one write per step.
	///
	/// Used to follow chain truth when the record lags by more than one step.
	/// A target behind the stored status is `Unchanged`; a target on another
	/// branch (the disputed `cancel_requested` vs `completed`) is
	/// `Unresolvable` and is left for arbitration.
	pub async fn catch_up(
		&self,
		order_id: &str,
		target: OrderStatus,
		at: u64,
	) -> Result<Transition, OrderStateError> {
		let current = self.get_order(order_id).await?;
		if current.status == target || forward_path(target, current.status).is_some() {
			return Ok(Transition::Unchanged(current));
		}

		let path = forward_path(current.status, target).ok_or(OrderStateError::Unresolvable {
			from: current.status,
			to: target,
		})?;

		let mut outcome = Transition::Unchanged(current);
		for step in path {
			outcome = match self.apply_transition(order_id, step, at).await? {
				Transition::Unchanged(order) if outcome.is_applied() => Transition::Applied(order),
				other => other,
			};
		}
		Ok(outcome)
	}

	fn publish_change(&self, kind: ChangeKind, order: &Order, old: Option<&Order>) {
		let event = ChangeEvent {
			kind,
			table: StorageKey::Orders.as_str().to_string(),
			order_id: order.order_id.clone(),
			record: Some(wire::encode(order)),
			old_record: old.map(wire::encode),
			commit_timestamp: current_timestamp(),
		};
		// No subscribers is not an error.
		self.event_bus.publish(TradeEvent::Row(event)).ok();
	}
}
