//! Entry points that act on orders on behalf of an authenticated caller.

pub mod order;
pub mod transition;

pub use order::OrderHandler;
pub use transition::{MirrorStatus, TransitionError, TransitionHandler, TransitionOutcome};
