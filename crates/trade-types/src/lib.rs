//! Common types for the escrow trade coordinator.
//!
//! Shared data model used by every crate in the workspace: the cached order
//! row and its state machine vocabulary, escrow operations, transaction
//! receipts, bus events, storage namespaces and configuration schemas.

/// Chat messages attached to an order.
pub mod chat;
/// Transaction submission and receipt types.
pub mod delivery;
/// Event types carried by the engine's event bus.
pub mod events;
/// Per-chain network configuration.
pub mod networks;
/// The cached order row, its status and the escrow operations that move it.
pub mod order;
/// Registry trait for pluggable implementations.
pub mod registry;
/// Redacting wrapper for sensitive configuration values.
pub mod secret_string;
/// Storage namespaces.
pub mod storage;
/// Record-store user identities.
pub mod user;
/// Formatting and time helpers.
pub mod utils;
/// Configuration validation framework.
pub mod validation;

pub use chat::*;
pub use delivery::*;
pub use events::*;
pub use networks::{NetworkConfig, NetworksConfig};
pub use order::*;
pub use registry::ImplementationRegistry;
pub use secret_string::SecretString;
pub use storage::*;
pub use user::*;
pub use utils::{
	current_timestamp, format_timestamp, normalize_address, parse_timestamp, truncate_id,
	with_0x_prefix, without_0x_prefix,
};
pub use validation::*;
