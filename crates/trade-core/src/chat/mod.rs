//! Order chat between the two counterparties.
//!
//! Messages are immutable. They are stored under
//! `messages:<order_id>/<created_at>-<id>` so a prefix listing returns them
//! in order.

use crate::engine::event_bus::EventBus;
use crate::guard::{AccessGuard, GuardError};
use std::sync::Arc;
use thiserror::Error;
use trade_auth::{AuthError, AuthService};
use trade_storage::{StorageError, StorageService};
use trade_types::{
	current_timestamp, truncate_id, ChangeEvent, ChangeKind, ChatMessage, SecretString, StorageKey,
	TradeEvent,
};

pub const MAX_MESSAGE_CHARS: usize = 4000;

#[derive(Debug, Error)]
pub enum ChatError {
	#[error("Message body is empty")]
	EmptyBody,
	#[error("Message body exceeds {MAX_MESSAGE_CHARS} characters")]
	BodyTooLong,
	#[error(transparent)]
	Auth(#[from] AuthError),
	#[error(transparent)]
	Guard(#[from] GuardError),
	#[error("Storage error: {0}")]
	Storage(String),
}

impl From<StorageError> for ChatError {
	fn from(e: StorageError) -> Self {
		ChatError::Storage(e.to_string())
	}
}

pub struct ChatService {
	auth: Arc<AuthService>,
	guard: Arc<AccessGuard>,
	storage: Arc<StorageService>,
	event_bus: EventBus,
}

impl ChatService {
	pub fn new(
		auth: Arc<AuthService>,
		guard: Arc<AccessGuard>,
		storage: Arc<StorageService>,
		event_bus: EventBus,
	) -> Self {
		Self {
			auth,
			guard,
			storage,
			event_bus,
		}
	}

	pub async fn post_message(
		&self,
		token: Option<&SecretString>,
		order_id: &str,
		body: &str,
	) -> Result<ChatMessage, ChatError> {
		let identity = self.auth.authenticate(token).await?;
		let authorization = self.guard.authorize(&identity, order_id).await?;

		let body = body.trim();
		if body.is_empty() {
			return Err(ChatError::EmptyBody);
		}
		if body.chars().count() > MAX_MESSAGE_CHARS {
			return Err(ChatError::BodyTooLong);
		}

		let message = ChatMessage {
			id: uuid::Uuid::new_v4().to_string(),
			order_id: order_id.to_string(),
			sender_id: authorization.user.id,
			body: body.to_string(),
			created_at: current_timestamp(),
		};
		self.storage
			.store(
				StorageKey::Messages.as_str(),
				&message_key(&message),
				&message,
			)
			.await?;

		tracing::debug!(order_id = %truncate_id(order_id), message_id = %message.id, "Message posted");
		self.event_bus
			.publish(TradeEvent::Row(ChangeEvent {
				kind: ChangeKind::Insert,
				table: StorageKey::Messages.as_str().to_string(),
				order_id: order_id.to_string(),
				record: serde_json::to_value(&message).ok(),
				old_record: None,
				commit_timestamp: message.created_at,
			}))
			.ok();
		Ok(message)
	}

	/// All messages on the order, oldest first.
	pub async fn list_messages(
		&self,
		token: Option<&SecretString>,
		order_id: &str,
	) -> Result<Vec<ChatMessage>, ChatError> {
		let identity = self.auth.authenticate(token).await?;
		self.guard.authorize(&identity, order_id).await?;

		let mut messages: Vec<ChatMessage> = self
			.storage
			.retrieve_all(StorageKey::Messages.as_str(), &format!("{}/", order_id))
			.await?
			.into_iter()
			.map(|(_, message)| message)
			.collect();
		messages.sort_by(|a, b| {
			a.created_at
				.cmp(&b.created_at)
				.then_with(|| a.id.cmp(&b.id))
		});
		Ok(messages)
	}
}

fn message_key(message: &ChatMessage) -> String {
	format!(
		"{}/{:020}-{}",
		message.order_id, message.created_at, message.id
	)
}
