//! Retry with exponential backoff.
//!
//! This module provides:
//! - The backoff calculator
//! - The default retryability classifier
//! - The retry engine and its higher-order wrapper
//! - A retrying wrapper for host commands

mod backoff;
mod classifier;
mod engine;
mod invoke;

pub use backoff::{calculate_delay, Backoff, JITTER_FACTOR};
pub use classifier::{extract_status, is_retryable_error, is_retryable_message, RetryClassify};
pub use engine::{
    make_retryable, with_retry, RetryObserver, RetryOptions, RetryPredicate, Retryable,
};
pub use invoke::{host_retry_options, invoke_with_retry, CommandInvoker};

#[cfg(test)]
pub use invoke::MockCommandInvoker;
