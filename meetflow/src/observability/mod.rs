//! Observability utilities.
//!
//! This module provides:
//! - Subscriber installation for the `tracing` macros used across the crate
//! - A timer for measuring operation durations

mod logging;
mod timer;

pub use logging::{env_filter, init_logging, LogFormat, DEFAULT_FILTER};
pub use timer::SpanTimer;
