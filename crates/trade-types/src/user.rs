//! Record-store identities.

use serde::{Deserialize, Serialize};

/// An identity resolved by the authentication provider.
///
/// `subject` is the stable identifier the provider vouches for. It is not yet
/// a record-store user; the access guard resolves it to a [`User`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
	pub subject: String,
}

impl Identity {
	pub fn new(subject: impl Into<String>) -> Self {
		Self {
			subject: subject.into(),
		}
	}
}

/// A user row in the record store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
	/// Record-store identity referenced by `Order::maker_id` / `Order::taker_id`.
	pub id: String,
	/// Authentication subject this user is bound to.
	pub subject: String,
	/// Chain address the user signs with, lower-cased.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub address: Option<String>,
}
