//! Order lifecycle coordination for the P2P escrow trade service.
//!
//! The chain is the system of record for an order's escrow state; the
//! record store keeps a mirror that clients read and subscribe to. This
//! crate ties the two together: it authorizes callers against the order's
//! parties, drives escrow transactions, mirrors their outcome, reconciles
//! the mirror when a write is lost, and streams row changes to subscribers.

pub mod builder;
pub mod chat;
pub mod engine;
pub mod guard;
pub mod handlers;
pub mod propagation;
pub mod recovery;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use builder::{BuilderError, TradeBuilder, TradeFactories};
pub use chat::{ChatError, ChatService};
pub use engine::{event_bus::EventBus, EngineError, TradeEngine};
pub use guard::{AccessGuard, Authorization, GuardError};
pub use handlers::{MirrorStatus, OrderHandler, TransitionError, TransitionHandler, TransitionOutcome};
pub use propagation::{ConnectionStatus, OrderSubscription, PropagationError};
pub use recovery::{ReconciliationReport, RecoveryService};
pub use state::{OrderRepository, OrderStateError};
