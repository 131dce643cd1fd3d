//! Registry trait for self-registering implementations.
//!
//! Every pluggable backend (storage, account, auth, delivery, watcher)
//! exposes a `Registry` unit struct implementing this trait so the builder
//! can map configuration names to factory functions.

/// Base trait for implementation registries.
pub trait ImplementationRegistry {
	/// Name of the implementation table in configuration, for example
	/// `memory` in `storage.implementations.memory`.
	const NAME: &'static str;

	/// Factory function type of the owning module.
	type Factory;

	/// Returns the factory that builds this implementation from its TOML table.
	fn factory() -> Self::Factory;
}
