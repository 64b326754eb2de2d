//! Cooperative cancellation.
//!
//! A `CancellationToken` is the abort handle used by retry loops and
//! polling sessions.

mod token;

pub use token::{CancelCallback, CancellationToken};
