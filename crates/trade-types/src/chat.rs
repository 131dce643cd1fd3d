//! Chat messages exchanged between the two parties of an order.

use serde::{Deserialize, Serialize};

/// An immutable chat message belonging to exactly one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
	pub id: String,
	pub order_id: String,
	pub sender_id: String,
	pub body: String,
	pub created_at: u64,
}
