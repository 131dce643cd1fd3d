//! Keyed async mutexes.
//!
//! Serializes work per key (an order id) without a global lock. Entries are
//! created on demand and pruned once nobody holds or waits on them.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
pub struct KeyedLocks {
	locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyedLocks {
	pub fn new() -> Self {
		Self::default()
	}

	fn slot(&self, key: &str) -> Arc<Mutex<()>> {
		self.locks
			.entry(key.to_string())
			.or_insert_with(|| Arc::new(Mutex::new(())))
			.clone()
	}

	/// Waits for exclusive access to `key`. The guard is owned so it can move
	/// into a spawned task.
	pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
		self.slot(key).lock_owned().await
	}

	/// Exclusive access to `key` if nobody holds it right now.
	pub fn try_lock(&self, key: &str) -> Option<OwnedMutexGuard<()>> {
		self.slot(key).try_lock_owned().ok()
	}

	/// Drops idle entries and returns how many were removed.
	pub fn prune(&self) -> usize {
		let before = self.locks.len();
		self.locks.retain(|_, slot| Arc::strong_count(slot) > 1);
		before.saturating_sub(self.locks.len())
	}

	pub fn len(&self) -> usize {
		self.locks.len()
	}

	pub fn is_empty(&self) -> bool {
		self.locks.is_empty()
	}
}
