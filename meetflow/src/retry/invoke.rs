//! Retrying wrapper around host commands.
//!
//! The native host exposes named commands taking and returning JSON. This
//! module retries a command through [`with_retry`] and decodes the reply.

use super::classifier::{is_retryable_message, RetryClassify};
use super::engine::{with_retry, RetryOptions};
use crate::errors::{HostError, RetryError};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

/// Invokes commands on the native host.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandInvoker: Send + Sync {
    /// Runs `command` with JSON `args` and returns its JSON reply.
    async fn invoke(&self, command: &str, args: Value) -> Result<Value, HostError>;
}

impl RetryClassify for HostError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Message(message) => is_retryable_message(message),
            Self::Opaque(_) => true,
            Self::Decode(_) => false,
        }
    }
}

/// Retry options whose predicate is [`HostError`]'s classification.
#[must_use]
pub fn host_retry_options() -> RetryOptions<HostError> {
    RetryOptions::new().with_should_retry(|e: &HostError| e.is_retryable())
}

/// Invokes a host command with retries and decodes the reply into `T`.
///
/// Decoding happens once, after the command succeeds; a reply that does not
/// decode is reported as [`HostError::Decode`] wrapped in
/// [`RetryError::NotRetryable`].
pub async fn invoke_with_retry<T, I>(
    invoker: &I,
    command: &str,
    args: Value,
    options: &RetryOptions<HostError>,
) -> Result<T, RetryError<HostError>>
where
    T: DeserializeOwned,
    I: CommandInvoker + ?Sized,
{
    let value = with_retry(
        || {
            debug!(command, "Invoking host command");
            invoker.invoke(command, args.clone())
        },
        options,
    )
    .await?;

    serde_json::from_value(value).map_err(|e| RetryError::NotRetryable(HostError::from(e)))
}
