//! Server-sent events for one order.
//!
//! The stream carries `order` events with the latest snapshot and `status`
//! events with the subscription state. A dropped subscription is opened
//! again with exponential backoff for as long as the client stays connected.

use super::{bearer_token, error::ApiError};
use crate::server::AppState;
use axum::{
	extract::{Path, State},
	http::HeaderMap,
	response::sse::{Event, KeepAlive, Sse},
};
use backoff::{backoff::Backoff, ExponentialBackoff};
use futures::Stream;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use trade_core::{ConnectionStatus, OrderSubscription, TradeEngine};
use trade_types::{truncate_id, Order, SecretString};

fn status_event(status: ConnectionStatus) -> Event {
	let name = match status {
		ConnectionStatus::Connecting => "connecting",
		ConnectionStatus::Subscribed => "subscribed",
		ConnectionStatus::Disconnected => "disconnected",
	};
	Event::default().event("status").data(name)
}

fn order_event(order: &Order) -> Option<Event> {
	Event::default().event("order").json_data(order).ok()
}

fn resubscribe_backoff() -> ExponentialBackoff {
	ExponentialBackoff {
		initial_interval: Duration::from_millis(500),
		max_interval: Duration::from_secs(30),
		max_elapsed_time: None,
		..ExponentialBackoff::default()
	}
}

/// GET /api/orders/{id}/events
pub async fn order_events(
	State(state): State<AppState>,
	Path(order_id): Path<String>,
	headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
	let token = bearer_token(&headers);
	// Authorization failures are answered as plain HTTP errors.
	let first = state
		.engine
		.orders()
		.subscribe(token.as_ref(), &order_id)
		.await?;

	let stream = session(state.engine.clone(), token, order_id, first);
	Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn session(
	engine: Arc<TradeEngine>,
	token: Option<SecretString>,
	order_id: String,
	first: OrderSubscription,
) -> impl Stream<Item = Result<Event, Infallible>> {
	async_stream::stream! {
		let mut backoff = resubscribe_backoff();
		let mut next = Some(first);

		loop {
			let mut subscription = match next.take() {
				Some(subscription) => subscription,
				None => match engine.orders().subscribe(token.as_ref(), &order_id).await {
					Ok(subscription) => subscription,
					Err(e) => {
						tracing::warn!(order_id = %truncate_id(&order_id), "Resubscribe refused: {}", e);
						yield Ok(status_event(ConnectionStatus::Disconnected));
						break;
					},
				},
			};

			yield Ok(status_event(ConnectionStatus::Connecting));
			let mut status = subscription.status_watch();
			let _ = status.wait_for(|s| *s != ConnectionStatus::Connecting).await;
			let current = subscription.status();
			yield Ok(status_event(current));

			if current == ConnectionStatus::Subscribed {
				backoff.reset();
				while let Some(order) = subscription.next().await {
					if let Some(event) = order_event(&order) {
						yield Ok(event);
					}
				}
				yield Ok(status_event(ConnectionStatus::Disconnected));
			}

			let Some(delay) = backoff.next_backoff() else {
				break;
			};
			tracing::debug!(order_id = %truncate_id(&order_id), delay_ms = delay.as_millis() as u64, "Resubscribing");
			tokio::time::sleep(delay).await;
		}
	}
}
