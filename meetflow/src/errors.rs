//! Error types for the meetflow crate.
//!
//! Retry and circuit-breaker errors are generic over the wrapped operation's
//! error so callers never lose the real failure. Host command failures carry
//! whatever the host rejected with.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The main error type for meetflow operations.
#[derive(Debug, Error)]
pub enum MeetflowError {
    /// A configuration value could not be loaded or validated.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// A host command failed.
    #[error("{0}")]
    Host(#[from] HostError),

    /// The summary poller rejected or failed an operation.
    #[error("{0}")]
    Poller(#[from] PollerError),

    /// A credential could not be obtained.
    #[error("Credential error: {0}")]
    Credential(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Raised when every retry attempt has been consumed.
///
/// Carries the number of attempts made and the last underlying error.
#[derive(Debug, Clone, Error)]
#[error("Operation failed after {attempts} attempts: {last_error}")]
pub struct RetryExhaustedError<E>
where
    E: std::fmt::Display,
{
    attempts: u32,
    last_error: E,
}

impl<E: std::fmt::Display> RetryExhaustedError<E> {
    /// Creates a new exhausted error.
    #[must_use]
    pub fn new(attempts: u32, last_error: E) -> Self {
        Self {
            attempts,
            last_error,
        }
    }

    /// Number of attempts that were made.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// The error returned by the final attempt.
    #[must_use]
    pub fn last_error(&self) -> &E {
        &self.last_error
    }

    /// Consumes the error, returning the last underlying error.
    #[must_use]
    pub fn into_last_error(self) -> E {
        self.last_error
    }
}

/// Raised when the abort handle fires before or between attempts.
#[derive(Debug, Clone, Error)]
#[error("Operation aborted after {attempts} attempts: {reason}")]
pub struct AbortError<E> {
    /// The reason given to the abort handle.
    pub reason: String,
    /// Attempts made before the abort was observed.
    pub attempts: u32,
    /// The last real failure, when at least one attempt failed.
    pub last_error: Option<E>,
}

/// Terminal outcome of a retried operation.
#[derive(Debug, Clone, Error)]
pub enum RetryError<E>
where
    E: std::fmt::Display,
{
    /// The first failure was classified as permanent; no retry was attempted.
    #[error("{0}")]
    NotRetryable(E),

    /// Retries were exhausted, or a later failure was classified permanent.
    #[error("{0}")]
    Exhausted(RetryExhaustedError<E>),

    /// The caller cancelled the operation.
    #[error("{0}")]
    Aborted(AbortError<E>),
}

impl<E: std::fmt::Display> RetryError<E> {
    /// Returns true if the caller cancelled the operation.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted(_))
    }

    /// Returns true if retries were exhausted.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted(_))
    }

    /// Number of attempts that were made.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::NotRetryable(_) => 1,
            Self::Exhausted(e) => e.attempts(),
            Self::Aborted(e) => e.attempts,
        }
    }

    /// The last real failure, if any attempt failed.
    #[must_use]
    pub fn last_error(&self) -> Option<&E> {
        match self {
            Self::NotRetryable(e) => Some(e),
            Self::Exhausted(e) => Some(e.last_error()),
            Self::Aborted(e) => e.last_error.as_ref(),
        }
    }

    /// Consumes the error, returning the last real failure if any.
    #[must_use]
    pub fn into_last_error(self) -> Option<E> {
        match self {
            Self::NotRetryable(e) => Some(e),
            Self::Exhausted(e) => Some(e.into_last_error()),
            Self::Aborted(e) => e.last_error,
        }
    }
}

/// Error returned by a circuit breaker.
#[derive(Debug, Clone, Error)]
pub enum CircuitError<E> {
    /// The circuit is open and the operation was not invoked.
    #[error("Circuit breaker is open")]
    Open,

    /// The operation was invoked and failed.
    #[error("{0}")]
    Inner(E),
}

impl<E> CircuitError<E> {
    /// Returns true if the call was rejected without invoking the operation.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Returns the operation's error, if it was invoked.
    #[must_use]
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Open => None,
            Self::Inner(e) => Some(e),
        }
    }
}

/// Error payload of a failed host command.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum HostError {
    /// The host rejected with a message.
    #[error("{0}")]
    Message(String),

    /// The host rejected with a value that is not a message.
    #[error("Host command rejected with {0}")]
    Opaque(serde_json::Value),

    /// The host response could not be decoded.
    #[error("Failed to decode host response: {0}")]
    Decode(String),
}

impl HostError {
    /// Creates a message error.
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    /// Builds a host error from an arbitrary rejection value.
    ///
    /// Strings and `{ "message": "..." }` objects become messages; anything
    /// else is kept as an opaque value.
    #[must_use]
    pub fn from_rejection(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(s) => Self::Message(s),
            serde_json::Value::Object(ref map) => match map.get("message") {
                Some(serde_json::Value::String(s)) => Self::Message(s.clone()),
                _ => Self::Opaque(value),
            },
            other => Self::Opaque(other),
        }
    }
}

impl From<serde_json::Error> for HostError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Errors raised by the summary poller.
#[derive(Debug, Clone, Error)]
pub enum PollerError {
    /// The worker did not accept the submission.
    #[error("Failed to submit summary for meeting '{meeting_id}': {message}")]
    Submit {
        /// The meeting the submission was for.
        meeting_id: String,
        /// The underlying failure.
        message: String,
    },

    /// The request was rejected before reaching the worker.
    #[error("Invalid summary request: {0}")]
    InvalidRequest(String),

    /// The submission was cancelled before the worker accepted it.
    #[error("Summary submission for meeting '{0}' was cancelled")]
    Cancelled(String),
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration document could not be parsed.
    #[error("Invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// The configuration file could not be read.
    #[error("Failed to read configuration file: {0}")]
    Read(#[from] std::io::Error),

    /// An environment override held an invalid value.
    #[error("Invalid value '{value}' for {key}")]
    InvalidEnv {
        /// The environment variable name.
        key: String,
        /// The rejected value.
        value: String,
    },

    /// A setting failed validation.
    #[error("Invalid setting {field}: {reason}")]
    Invalid {
        /// The offending field.
        field: String,
        /// Why it was rejected.
        reason: String,
    },
}
