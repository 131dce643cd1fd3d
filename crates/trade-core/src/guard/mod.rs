//! Access guard: only the two counterparties may read or act on an order.
//!
//! A pure read. It runs on every call and nothing it returns is cached.

use crate::state::{OrderRepository, OrderStateError};
use std::sync::Arc;
use thiserror::Error;
use trade_types::{truncate_id, Identity, Order, User};

#[derive(Debug, Error)]
pub enum GuardError {
	#[error("Not found: {0}")]
	NotFound(String),
	#[error("User {user_id} is not a party to order {order_id}")]
	Unauthorized { order_id: String, user_id: String },
	#[error("Storage error: {0}")]
	Storage(String),
}

impl From<OrderStateError> for GuardError {
	fn from(e: OrderStateError) -> Self {
		match e {
			OrderStateError::OrderNotFound(id) => GuardError::NotFound(format!("order {}", id)),
			other => GuardError::Storage(other.to_string()),
		}
	}
}

/// A caller cleared to act on an order.
#[derive(Debug, Clone)]
pub struct Authorization {
	pub order: Order,
	pub user: User,
	pub is_maker: bool,
	pub is_taker: bool,
}

impl Authorization {
	/// The caller's chain address on this order.
	pub fn party_address(&self) -> &str {
		if self.is_maker {
			&self.order.maker_address
		} else {
			&self.order.taker_address
		}
	}
}

pub struct AccessGuard {
	repository: Arc<OrderRepository>,
}

impl AccessGuard {
	pub fn new(repository: Arc<OrderRepository>) -> Self {
		Self { repository }
	}

	/// Resolves `identity` to a user and checks it against the order's parties.
	pub async fn authorize(
		&self,
		identity: &Identity,
		order_id: &str,
	) -> Result<Authorization, GuardError> {
		let user = self
			.repository
			.get_user_by_subject(&identity.subject)
			.await?
			.ok_or_else(|| GuardError::NotFound(format!("user for subject {}", identity.subject)))?;

		let order = self.repository.get_order(order_id).await?;

		let is_maker = order.maker_id == user.id;
		let is_taker = order.taker_id == user.id;
		if !is_maker && !is_taker {
			tracing::warn!(
				order_id = %truncate_id(order_id),
				user_id = %user.id,
				subject = %identity.subject,
				status = %order.status,
				"Access denied to non-party"
			);
			return Err(GuardError::Unauthorized {
				order_id: order_id.to_string(),
				user_id: user.id,
			});
		}

		Ok(Authorization {
			order,
			user,
			is_maker,
			is_taker,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::engine::event_bus::EventBus;
	use crate::state::order::tests::new_order;
	use trade_storage::{implementations::memory::MemoryStorage, StorageService};
	use trade_types::OrderStatus;

	async fn guard() -> (AccessGuard, Arc<OrderRepository>) {
		let repo = Arc::new(OrderRepository::new(
			Arc::new(StorageService::new(Box::new(MemoryStorage::new()))),
			EventBus::new(8),
		));
		for (id, subject) in [("maker", "sub-maker"), ("taker", "sub-taker"), ("eve", "sub-eve")] {
			repo.put_user(&User {
				id: id.into(),
				subject: subject.into(),
				address: None,
			})
			.await
			.unwrap();
		}
		repo.create_order(Order::open(new_order("1"), 1_000))
			.await
			.unwrap();
		(AccessGuard::new(repo.clone()), repo)
	}

	#[tokio::test]
	async fn test_parties_are_authorized() {
		let (guard, _) = guard().await;

		let maker = guard.authorize(&Identity::new("sub-maker"), "1").await.unwrap();
		assert!(maker.is_maker && !maker.is_taker);
		assert_eq!(maker.party_address(), maker.order.maker_address);

		let taker = guard.authorize(&Identity::new("sub-taker"), "1").await.unwrap();
		assert!(taker.is_taker && !taker.is_maker);
		assert_eq!(taker.party_address(), "0x70997970c51812dc3a010c7d01b50e0d17dc79c8");
	}

	#[tokio::test]
	async fn test_third_party_unauthorized_even_when_terminal() {
		let (guard, repo) = guard().await;
		let eve = Identity::new("sub-eve");

		assert!(matches!(
			guard.authorize(&eve, "1").await,
			Err(GuardError::Unauthorized { .. })
		));

		repo.set_status("1", OrderStatus::CancelRequested).await.unwrap();
		repo.set_status("1", OrderStatus::Cancelled).await.unwrap();
		assert!(matches!(
			guard.authorize(&eve, "1").await,
			Err(GuardError::Unauthorized { .. })
		));
	}

	#[tokio::test]
	async fn test_unknown_user_or_order_not_found() {
		let (guard, _) = guard().await;
		assert!(matches!(
			guard.authorize(&Identity::new("nobody"), "1").await,
			Err(GuardError::NotFound(_))
		));
		assert!(matches!(
			guard.authorize(&Identity::new("sub-maker"), "404").await,
			Err(GuardError::NotFound(_))
		));
	}
}
