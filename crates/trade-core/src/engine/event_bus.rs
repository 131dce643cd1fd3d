//! In-process broadcast bus for trade events.
//!
//! Every subscriber receives every event; filtering is the subscriber's job.
//! Slow subscribers lag and lose events rather than stalling publishers.

use tokio::sync::broadcast;
use trade_types::TradeEvent;

#[derive(Clone)]
pub struct EventBus {
	sender: broadcast::Sender<TradeEvent>,
}

impl EventBus {
	/// Creates a bus retaining up to `capacity` undelivered events per subscriber.
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self { sender }
	}

	pub fn subscribe(&self) -> broadcast::Receiver<TradeEvent> {
		self.sender.subscribe()
	}

	/// Publishes to current subscribers. Fails only when there are none.
	pub fn publish(
		&self,
		event: TradeEvent,
	) -> Result<(), broadcast::error::SendError<TradeEvent>> {
		self.sender.send(event).map(|_| ())
	}

	pub fn subscriber_count(&self) -> usize {
		self.sender.receiver_count()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use trade_types::{ReconciliationEvent, TransactionHash};

	fn queued() -> TradeEvent {
		TradeEvent::Reconciliation(ReconciliationEvent::Queued {
			order_id: "1".into(),
			tx_hash: TransactionHash(vec![1; 32]),
			reason: "test".into(),
		})
	}

	#[tokio::test]
	async fn test_publish_without_subscribers_fails() {
		let bus = EventBus::new(4);
		assert!(bus.publish(queued()).is_err());
	}

	#[tokio::test]
	async fn test_every_subscriber_receives() {
		let bus = EventBus::new(4);
		let mut a = bus.subscribe();
		let mut b = bus.subscribe();
		bus.publish(queued()).unwrap();

		assert!(matches!(a.recv().await.unwrap(), TradeEvent::Reconciliation(_)));
		assert!(matches!(b.recv().await.unwrap(), TradeEvent::Reconciliation(_)));
		assert_eq!(bus.subscriber_count(), 2);
	}
}
