//! Change propagator: live order snapshots for subscribed clients.
//!
//! A subscription moves through `connecting → subscribed → disconnected` and
//! never reconnects by itself. Callers observe the state on a watch channel
//! and decide whether to subscribe again.

pub mod wire;

use crate::engine::event_bus::EventBus;
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use trade_types::{truncate_id, ChangeEvent, ChangeKind, Order, TradeEvent};

#[derive(Debug, Error)]
pub enum PropagationError {
	#[error("Subscribe timed out after {0:?}")]
	Timeout(Duration),
	#[error("Feed error: {0}")]
	Feed(String),
	#[error("Subscriber lagged, {0} changes lost")]
	Lagged(u64),
	#[error("Feed closed")]
	Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
	Connecting,
	Subscribed,
	Disconnected,
}

/// Source of row changes filtered on one table and order id.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
	async fn open(
		&self,
		table: &str,
		order_id: &str,
	) -> Result<BoxStream<'static, Result<ChangeEvent, PropagationError>>, PropagationError>;
}

/// Change feed over the engine's event bus.
pub struct BusChangeFeed {
	event_bus: EventBus,
}

impl BusChangeFeed {
	pub fn new(event_bus: EventBus) -> Self {
		Self { event_bus }
	}
}

#[async_trait]
impl ChangeFeed for BusChangeFeed {
	async fn open(
		&self,
		table: &str,
		order_id: &str,
	) -> Result<BoxStream<'static, Result<ChangeEvent, PropagationError>>, PropagationError> {
		let table = table.to_string();
		let order_id = order_id.to_string();
		let stream = BroadcastStream::new(self.event_bus.subscribe()).filter_map(move |item| {
			let item = match item {
				Ok(TradeEvent::Row(change)) if change.table == table && change.order_id == order_id => {
					Some(Ok(change))
				},
				Ok(_) => None,
				Err(BroadcastStreamRecvError::Lagged(n)) => Some(Err(PropagationError::Lagged(n))),
			};
			futures::future::ready(item)
		});
		Ok(stream.boxed())
	}
}

pub struct ChangePropagator {
	feed: std::sync::Arc<dyn ChangeFeed>,
	subscribe_timeout: Duration,
	buffer_size: usize,
}

impl ChangePropagator {
	pub fn new(
		feed: std::sync::Arc<dyn ChangeFeed>,
		subscribe_timeout: Duration,
		buffer_size: usize,
	) -> Self {
		Self {
			feed,
			subscribe_timeout,
			buffer_size: buffer_size.max(1),
		}
	}

	/// Opens a live subscription to one order's row.
	///
	/// Returns immediately in `Connecting`; the feed is opened in the
	/// background.
	pub fn subscribe(&self, order_id: &str) -> OrderSubscription {
		let (snapshot_tx, snapshots) = mpsc::channel(self.buffer_size);
		let (status_tx, status) = watch::channel(ConnectionStatus::Connecting);
		let (cancel_tx, cancel_rx) = oneshot::channel();

		let feed = self.feed.clone();
		let timeout = self.subscribe_timeout;
		let id = order_id.to_string();
		tokio::spawn(async move {
			pump(feed, id, timeout, snapshot_tx, status_tx, cancel_rx).await;
		});

		OrderSubscription {
			order_id: order_id.to_string(),
			snapshots,
			status,
			cancel: Some(cancel_tx),
		}
	}
}

async fn pump(
	feed: std::sync::Arc<dyn ChangeFeed>,
	order_id: String,
	timeout: Duration,
	snapshots: mpsc::Sender<Order>,
	status: watch::Sender<ConnectionStatus>,
	mut cancel: oneshot::Receiver<()>,
) {
	let short_id = truncate_id(&order_id);
	let mut stream = match tokio::time::timeout(timeout, feed.open("orders", &order_id)).await {
		Ok(Ok(stream)) => stream,
		Ok(Err(e)) => {
			tracing::warn!(order_id = %short_id, "Order subscription failed: {}", e);
			status.send_replace(ConnectionStatus::Disconnected);
			return;
		},
		Err(_) => {
			tracing::warn!(order_id = %short_id, "{}", PropagationError::Timeout(timeout));
			status.send_replace(ConnectionStatus::Disconnected);
			return;
		},
	};

	status.send_replace(ConnectionStatus::Subscribed);
	tracing::debug!(order_id = %short_id, "Order subscription established");

	loop {
		tokio::select! {
			_ = &mut cancel => break,
			item = stream.next() => {
				let change = match item {
					Some(Ok(change)) => change,
					Some(Err(e)) => {
						tracing::warn!(order_id = %short_id, "Order subscription dropped: {}", e);
						break;
					},
					None => {
						tracing::debug!(order_id = %short_id, "{}", PropagationError::Closed);
						break;
					},
				};
				let Some(order) = snapshot(&change) else {
					continue;
				};
				if snapshots.send(order).await.is_err() {
					break;
				}
			}
		}
	}

	status.send_replace(ConnectionStatus::Disconnected);
}

/// Canonical order carried by a change, if it should be forwarded.
fn snapshot(change: &ChangeEvent) -> Option<Order> {
	match change.kind {
		ChangeKind::Delete => {
			tracing::info!(order_id = %truncate_id(&change.order_id), "Order row deleted");
			None
		},
		ChangeKind::Insert | ChangeKind::Update => {
			let record = change.record.as_ref()?;
			match wire::decode(record) {
				Ok(order) if !order.order_id.is_empty() => Some(order),
				Ok(_) => {
					tracing::debug!("Skipping change without order id");
					None
				},
				Err(e) => {
					tracing::warn!(order_id = %truncate_id(&change.order_id), "Malformed order row: {}", e);
					None
				},
			}
		},
	}
}

/// A live view of one order. Dropping it unsubscribes.
pub struct OrderSubscription {
	order_id: String,
	snapshots: mpsc::Receiver<Order>,
	status: watch::Receiver<ConnectionStatus>,
	cancel: Option<oneshot::Sender<()>>,
}

impl OrderSubscription {
	pub fn order_id(&self) -> &str {
		&self.order_id
	}

	/// Next snapshot, or `None` once disconnected.
	pub async fn next(&mut self) -> Option<Order> {
		self.snapshots.recv().await
	}

	pub fn status(&self) -> ConnectionStatus {
		*self.status.borrow()
	}

	pub fn status_watch(&self) -> watch::Receiver<ConnectionStatus> {
		self.status.clone()
	}

	pub fn is_connected(&self) -> bool {
		self.status() == ConnectionStatus::Subscribed
	}

	pub fn unsubscribe(&mut self) {
		if let Some(cancel) = self.cancel.take() {
			cancel.send(()).ok();
		}
	}
}

impl Drop for OrderSubscription {
	fn drop(&mut self) {
		self.unsubscribe();
	}
}
