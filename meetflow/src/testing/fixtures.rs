//! Ready-made requests and options for tests.

use std::sync::Arc;
use std::time::Duration;

use super::fakes::{InMemoryResultStore, ScriptedWorker};
use crate::events::{CollectingNotifier, ModelConfig};
use crate::poller::{PollerOptions, SummaryPoller, SummaryRequest};
use crate::retry::Backoff;

/// A complete model configuration.
#[must_use]
pub fn test_model() -> ModelConfig {
    ModelConfig::new("ollama", "llama3.2")
}

/// A summary request for `meeting_id` with a short transcript.
#[must_use]
pub fn test_request(meeting_id: &str) -> SummaryRequest {
    SummaryRequest::new(
        meeting_id,
        "Alice: let's ship on Friday. Bob: agreed.",
        test_model(),
    )
}

/// Poller options with the production timings and millisecond retries.
#[must_use]
pub fn fast_poller_options() -> PollerOptions {
    PollerOptions::default().with_backoff(
        Backoff::default()
            .with_initial_delay(Duration::from_millis(10))
            .with_max_delay(Duration::from_millis(40))
            .with_jitter(false),
    )
}

/// A poller wired to fakes, with handles to each fake.
#[derive(Debug, Clone)]
pub struct PollerFixture {
    /// The poller under test.
    pub poller: SummaryPoller,
    /// The scripted worker.
    pub worker: Arc<ScriptedWorker>,
    /// The persisted-result store.
    pub store: Arc<InMemoryResultStore>,
    /// Collected notifications.
    pub notifier: Arc<CollectingNotifier>,
}

impl PollerFixture {
    /// Builds a fixture with [`fast_poller_options`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(fast_poller_options())
    }

    /// Builds a fixture with the given options.
    #[must_use]
    pub fn with_options(options: PollerOptions) -> Self {
        let worker = Arc::new(ScriptedWorker::new());
        let store = Arc::new(InMemoryResultStore::new());
        let notifier = Arc::new(CollectingNotifier::new());
        let poller = SummaryPoller::new(
            worker.clone(),
            store.clone(),
            notifier.clone(),
            options,
        );
        Self {
            poller,
            worker,
            store,
            notifier,
        }
    }
}

impl Default for PollerFixture {
    fn default() -> Self {
        Self::new()
    }
}
