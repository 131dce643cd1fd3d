//! Storage namespaces.

use std::str::FromStr;

/// Namespaces of the record store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
	/// Order rows keyed by public order id.
	Orders,
	/// Users keyed by authentication subject.
	Users,
	/// Chat messages keyed by `{order_id}:{created_at}:{message_id}`.
	Messages,
	/// Reconciliation entries keyed by transaction hash.
	Reconciliation,
}

impl StorageKey {
	pub fn as_str(&self) -> &'static str {
		match self {
			StorageKey::Orders => "orders",
			StorageKey::Users => "users",
			StorageKey::Messages => "messages",
			StorageKey::Reconciliation => "reconciliation",
		}
	}

	/// Only reconciliation entries may expire. Orders, users and messages
	/// are never hard-deleted.
	pub fn may_expire(&self) -> bool {
		matches!(self, StorageKey::Reconciliation)
	}

	pub fn all() -> impl Iterator<Item = Self> {
		[
			Self::Orders,
			Self::Users,
			Self::Messages,
			Self::Reconciliation,
		]
		.into_iter()
	}
}

impl FromStr for StorageKey {
	type Err = ();

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"orders" => Ok(Self::Orders),
			"users" => Ok(Self::Users),
			"messages" => Ok(Self::Messages),
			"reconciliation" => Ok(Self::Reconciliation),
			_ => Err(()),
		}
	}
}

impl From<StorageKey> for &'static str {
	fn from(key: StorageKey) -> Self {
		key.as_str()
	}
}
