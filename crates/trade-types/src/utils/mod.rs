//! Formatting and time helpers shared across crates.

pub mod formatting;
pub mod helpers;

pub use formatting::{normalize_address, truncate_id, with_0x_prefix, without_0x_prefix};
pub use helpers::{current_timestamp, format_timestamp, parse_timestamp};
