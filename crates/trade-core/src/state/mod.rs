//! The order record repository.
//!
//! Single-row, whole-row writes over the record store. Every accepted write
//! is announced on the event bus as a row-level change.

pub mod order;
pub mod user;

pub use order::{is_valid_transition, OrderRepository, OrderStateError, Transition};
