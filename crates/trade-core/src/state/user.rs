//! Record-store users, looked up by authentication subject.

use super::order::{OrderRepository, OrderStateError};
use trade_types::{StorageKey, User};

/// Users live under their id; a second key maps the subject to that id.
fn subject_key(subject: &str) -> String {
	format!("subject/{}", subject)
}

impl OrderRepository {
	/// Creates or replaces a user and its subject mapping.
	pub async fn put_user(&self, user: &User) -> Result<(), OrderStateError> {
		let users = StorageKey::Users.as_str();
		if let Some(previous) = self.storage.find::<User>(users, &user.id).await? {
			if previous.subject != user.subject {
				self.storage
					.remove(users, &subject_key(&previous.subject))
					.await?;
			}
		}
		self.storage.store(users, &user.id, user).await?;
		self.storage
			.store(users, &subject_key(&user.subject), &user.id)
			.await?;
		Ok(())
	}

	pub async fn get_user_by_subject(&self, subject: &str) -> Result<Option<User>, OrderStateError> {
		let users = StorageKey::Users.as_str();
		let Some(user_id) = self
			.storage
			.find::<String>(users, &subject_key(subject))
			.await?
		else {
			return Ok(None);
		};
		Ok(self
			.storage
			.find::<User>(users, &user_id)
			.await?
			.filter(|user| user.subject == subject))
	}
}

#[cfg(test)]
mod tests {
	use crate::engine::event_bus::EventBus;
	use crate::state::OrderRepository;
	use std::sync::Arc;
	use trade_storage::{implementations::memory::MemoryStorage, StorageService};
	use trade_types::User;

	fn user(id: &str, subject: &str) -> User {
		User {
			id: id.to_string(),
			subject: subject.to_string(),
			address: None,
		}
	}

	#[tokio::test]
	async fn test_lookup_by_subject_follows_updates() {
		let repo = OrderRepository::new(
			Arc::new(StorageService::new(Box::new(MemoryStorage::new()))),
			EventBus::new(8),
		);

		repo.put_user(&user("u1", "alice")).await.unwrap();
		assert_eq!(
			repo.get_user_by_subject("alice").await.unwrap(),
			Some(user("u1", "alice"))
		);

		repo.put_user(&user("u1", "alice@new")).await.unwrap();
		assert_eq!(repo.get_user_by_subject("alice").await.unwrap(), None);
		assert_eq!(
			repo.get_user_by_subject("alice@new").await.unwrap().unwrap().id,
			"u1"
		);
		assert_eq!(repo.get_user_by_subject("bob").await.unwrap(), None);
	}
}
