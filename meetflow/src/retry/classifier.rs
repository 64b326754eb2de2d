//! Default retryability policy.
//!
//! Transient infrastructure failures and rate limits are retried; client
//! errors are not. Anything unrecognised is retried.

use regex::Regex;
use std::sync::LazyLock;

/// Substrings that identify network-level failures.
const NETWORK_ERRORS: &[&str] = &[
    "econnrefused",
    "econnreset",
    "enotfound",
    "etimedout",
    "socket hang up",
    "network error",
    "failed to fetch",
];

static STATUS_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"status[:\s]+(\d{3})").ok());

/// Decides whether an error should be retried.
pub trait RetryClassify {
    /// Returns true if the operation that produced this error may be retried.
    fn is_retryable(&self) -> bool;
}

impl RetryClassify for String {
    fn is_retryable(&self) -> bool {
        is_retryable_message(self)
    }
}

impl RetryClassify for &str {
    fn is_retryable(&self) -> bool {
        is_retryable_message(self)
    }
}

impl RetryClassify for anyhow::Error {
    fn is_retryable(&self) -> bool {
        is_retryable_message(&self.to_string())
    }
}

impl RetryClassify for std::io::Error {
    fn is_retryable(&self) -> bool {
        is_retryable_message(&self.to_string())
    }
}

/// Classifies any displayable error by its message.
pub fn is_retryable_error<E: std::fmt::Display + ?Sized>(error: &E) -> bool {
    is_retryable_message(&error.to_string())
}

/// Extracts an HTTP status code written as `status: NNN` or `status NNN`.
#[must_use]
pub fn extract_status(message: &str) -> Option<u16> {
    let pattern = STATUS_PATTERN.as_ref()?;
    pattern
        .captures(&message.to_lowercase())
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Default policy over an error message.
#[must_use]
pub fn is_retryable_message(message: &str) -> bool {
    let message = message.to_lowercase();

    if NETWORK_ERRORS.iter().any(|needle| message.contains(needle)) {
        return true;
    }

    if let Some(status) = extract_status(&message) {
        if status >= 500 || status == 429 || status == 408 {
            return true;
        }
        if (400..500).contains(&status) {
            return false;
        }
    }

    if message.contains("timeout") {
        return true;
    }

    true
}
