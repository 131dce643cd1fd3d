//! Read and subscribe entry points, and mirroring of upstream-opened orders.

use super::transition::TransitionError;
use crate::guard::AccessGuard;
use crate::propagation::{ChangePropagator, OrderSubscription};
use crate::state::OrderRepository;
use std::sync::Arc;
use tracing::instrument;
use trade_auth::AuthService;
use trade_delivery::escrow::parse_order_id;
use trade_types::{current_timestamp, truncate_id, NewOrder, Order, SecretString};

pub struct OrderHandler {
	auth: Arc<AuthService>,
	guard: Arc<AccessGuard>,
	repository: Arc<OrderRepository>,
	propagator: Arc<ChangePropagator>,
}

impl OrderHandler {
	pub fn new(
		auth: Arc<AuthService>,
		guard: Arc<AccessGuard>,
		repository: Arc<OrderRepository>,
		propagator: Arc<ChangePropagator>,
	) -> Self {
		Self {
			auth,
			guard,
			repository,
			propagator,
		}
	}

	pub async fn get_order(
		&self,
		token: Option<&SecretString>,
		order_id: &str,
	) -> Result<Order, TransitionError> {
		let identity = self.auth.authenticate(token).await?;
		let authorization = self.guard.authorize(&identity, order_id).await?;
		Ok(authorization.order)
	}

	/// Mirrors an order whose `open` the escrow already confirmed.
	#[instrument(skip_all, fields(order_id = %truncate_id(&new.order_id)))]
	pub async fn record_opened_order(
		&self,
		token: Option<&SecretString>,
		new: NewOrder,
	) -> Result<Order, TransitionError> {
		let identity = self.auth.authenticate(token).await?;
		let user = self
			.repository
			.get_user_by_subject(&identity.subject)
			.await?
			.ok_or_else(|| TransitionError::NotFound(format!("user for subject {}", identity.subject)))?;

		if new.order_id.trim().is_empty() {
			return Err(TransitionError::Validation("order_id is required".into()));
		}
		// Later escrow calls encode the id as uint256.
		parse_order_id(&new.order_id)?;
		if new.tx_hash.as_deref().is_none_or(|h| h.trim().is_empty()) {
			return Err(TransitionError::Validation(
				"tx_hash of the open transaction is required".into(),
			));
		}
		if user.id != new.maker_id && user.id != new.taker_id {
			tracing::warn!(user_id = %user.id, "Refusing to record an order for other users");
			return Err(TransitionError::Unauthorized(new.order_id));
		}

		let order = self
			.repository
			.create_order(Order::open(new, current_timestamp()))
			.await?;
		tracing::info!(chain_id = order.chain_id, "Recorded opened order");
		Ok(order)
	}

	/// Live snapshots of an order, authorized once at subscribe time.
	pub async fn subscribe(
		&self,
		token: Option<&SecretString>,
		order_id: &str,
	) -> Result<OrderSubscription, TransitionError> {
		let identity = self.auth.authenticate(token).await?;
		self.guard.authorize(&identity, order_id).await?;
		Ok(self.propagator.subscribe(order_id))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::propagation::ConnectionStatus;
	use crate::state::order::tests::new_order;
	use crate::testing::Fixture;
	use std::time::Duration;
	use trade_types::OrderStatus;

	#[tokio::test]
	async fn test_parties_read_the_order() {
		let fixture = Fixture::new().await;

		let order = fixture
			.orders
			.get_order(Some(&fixture.maker_token()), "1")
			.await
			.unwrap();
		assert_eq!(order.status, OrderStatus::Open);

		let err = fixture
			.orders
			.get_order(Some(&fixture.eve_token()), "1")
			.await
			.unwrap_err();
		assert!(matches!(err, TransitionError::Unauthorized(_)));
	}

	#[tokio::test]
	async fn test_record_opened_order() {
		let fixture = Fixture::new().await;

		let order = fixture
			.orders
			.record_opened_order(Some(&fixture.taker_token()), new_order("2"))
			.await
			.unwrap();
		assert_eq!(order.status, OrderStatus::Open);
		assert!(order.opened_at.is_some());

		let err = fixture
			.orders
			.record_opened_order(Some(&fixture.taker_token()), new_order("2"))
			.await
			.unwrap_err();
		assert!(matches!(err, TransitionError::AlreadyExists(_)));
	}

	#[tokio::test]
	async fn test_record_opened_order_validation() {
		let fixture = Fixture::new().await;

		let mut missing_hash = new_order("3");
		missing_hash.tx_hash = None;
		let err = fixture
			.orders
			.record_opened_order(Some(&fixture.maker_token()), missing_hash)
			.await
			.unwrap_err();
		assert!(matches!(err, TransitionError::Validation(_)));

		let err = fixture
			.orders
			.record_opened_order(Some(&fixture.eve_token()), new_order("3"))
			.await
			.unwrap_err();
		assert!(matches!(err, TransitionError::Unauthorized(_)));
	}

	#[tokio::test]
	async fn test_record_rejects_ids_the_escrow_cannot_address() {
		let fixture = Fixture::new().await;

		for bad in ["abc", "0xzz", "-1", "1.5"] {
			let err = fixture
				.orders
				.record_opened_order(Some(&fixture.maker_token()), new_order(bad))
				.await
				.unwrap_err();
			assert!(matches!(err, TransitionError::Validation(_)), "{}: {:?}", bad, err);
			assert!(fixture.repository.get_order(bad).await.is_err());
		}

		let order = fixture
			.orders
			.record_opened_order(Some(&fixture.maker_token()), new_order("0x2a"))
			.await
			.unwrap();
		assert_eq!(order.status, OrderStatus::Open);
	}

	#[tokio::test]
	async fn test_subscriber_sees_transition() {
		let fixture = Fixture::new().await;
		let mut subscription = fixture
			.orders
			.subscribe(Some(&fixture.maker_token()), "1")
			.await
			.unwrap();
		let mut status = subscription.status_watch();
		tokio::time::timeout(
			Duration::from_secs(1),
			status.wait_for(|s| *s == ConnectionStatus::Subscribed),
		)
		.await
		.unwrap()
		.unwrap();

		fixture
			.transitions
			.mark_payment_sent(Some(&fixture.taker_token()), "1")
			.await
			.unwrap();

		let snapshot = tokio::time::timeout(Duration::from_secs(1), subscription.next())
			.await
			.unwrap()
			.unwrap();
		assert_eq!(snapshot.status, OrderStatus::PaymentSent);
		assert!(snapshot.payment_sent_at.is_some());
	}

	#[tokio::test]
	async fn test_third_party_cannot_subscribe() {
		let fixture = Fixture::new().await;
		let err = fixture
			.orders
			.subscribe(Some(&fixture.eve_token()), "1")
			.await
			.err()
			.unwrap();
		assert!(matches!(err, TransitionError::Unauthorized(_)));
	}
}
