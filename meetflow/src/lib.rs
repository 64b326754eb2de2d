//! # Meetflow
//!
//! Failure-handling core of a meeting assistant: the pieces that talk to
//! unreliable collaborators and must degrade gracefully.
//!
//! - **Retry**: exponential backoff with jitter, a retryability classifier and
//!   cooperative cancellation
//! - **Circuit breaking**: fail fast after consecutive failures, probe again
//!   after a reset timeout
//! - **Summary polling**: submit a transcript to an external worker, poll it to
//!   a terminal state and restore the last good summary when a regeneration
//!   fails
//! - **Credentials**: expiring token cache with single-flight refresh
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use meetflow::prelude::*;
//!
//! let config = MeetflowConfig::from_file("meetflow.json")?;
//! init_logging(config.logging.format);
//!
//! let poller = SummaryPoller::new(
//!     Arc::new(HostSummaryWorker::new(invoker.clone())),
//!     Arc::new(HostResultStore::new(invoker)),
//!     Arc::new(LoggingNotifier),
//!     config.poller_options(),
//! );
//!
//! poller
//!     .regenerate(SummaryRequest::new("m1", transcript, model), |update| {
//!         println!("{}: {:?}", update.status, update.message);
//!     })
//!     .await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod circuit;
pub mod config;
pub mod credentials;
pub mod errors;
pub mod events;
pub mod observability;
pub mod poller;
pub mod retry;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::circuit::{CircuitBreaker, CircuitBreakerOptions, CircuitState};
    pub use crate::config::MeetflowConfig;
    pub use crate::credentials::{AccessToken, TokenCache, TokenSource};
    pub use crate::errors::{
        AbortError, CircuitError, ConfigError, HostError, MeetflowError, PollerError,
        RetryError, RetryExhaustedError,
    };
    pub use crate::events::{
        ConfigBus, LoggingNotifier, ModelConfig, Notification, NotificationKind, Notifier,
    };
    pub use crate::observability::{init_logging, LogFormat};
    pub use crate::poller::{
        GenerationMode, HostResultStore, HostSummaryWorker, PollerOptions, ResultStore,
        SummaryPoller, SummaryRequest, SummaryResult, SummaryStatus, SummaryUpdate,
        SummaryWorker,
    };
    pub use crate::retry::{
        invoke_with_retry, is_retryable_error, make_retryable, with_retry, Backoff,
        CommandInvoker, RetryOptions,
    };
}
