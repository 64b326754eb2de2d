//! Summary generation driven by polling an external worker.
//!
//! A generation submits the transcript, then polls the worker every
//! `poll_interval` until it reports a terminal status or `timeout` elapses.
//! Every observed state is delivered to the caller's update callback.
//!
//! Failures of a regeneration never leave the meeting without content: the
//! last persisted summary is restored and the failure is only notified.

use super::session::{ActiveSession, Emitter, SessionInfo, SessionRegistry};
use super::status::{is_missing_model_error, GenerationMode, SummaryStatus, WorkerStatus};
use super::summary::SummaryResult;
use super::worker::{ResultStore, SummaryRequest, SummaryWorker};
use crate::cancellation::CancellationToken;
use crate::errors::{HostError, PollerError, RetryError};
use crate::events::{Notification, Notifier};
use crate::observability::SpanTimer;
use crate::retry::{host_retry_options, with_retry, Backoff, RetryOptions};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Error reported when the worker does not finish in time.
pub const TIMEOUT_MESSAGE: &str = "Summary generation timed out";

/// Callback receiving every observed state of a generation.
pub type UpdateCallback = Arc<dyn Fn(&SummaryUpdate) + Send + Sync>;

/// A state change delivered to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryUpdate {
    /// Meeting the update is for.
    pub meeting_id: String,
    /// New status.
    pub status: SummaryStatus,
    /// Progress message for active states.
    pub message: Option<String>,
    /// The summary to display, for `completed`.
    pub result: Option<SummaryResult>,
    /// Failure description, for `error`.
    pub error: Option<String>,
}

impl SummaryUpdate {
    /// An update carrying only a status and its progress message.
    #[must_use]
    pub fn status(meeting_id: impl Into<String>, status: SummaryStatus) -> Self {
        Self {
            meeting_id: meeting_id.into(),
            status,
            message: status.status_message().map(str::to_string),
            result: None,
            error: None,
        }
    }

    /// A completed update.
    #[must_use]
    pub fn completed(meeting_id: impl Into<String>, result: SummaryResult) -> Self {
        Self {
            result: Some(result),
            ..Self::status(meeting_id, SummaryStatus::Completed)
        }
    }

    /// An error update.
    #[must_use]
    pub fn failed(meeting_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::status(meeting_id, SummaryStatus::Error)
        }
    }
}

/// Timing and retry settings of the poller.
#[derive(Debug, Clone, PartialEq)]
pub struct PollerOptions {
    /// Wait between polls.
    pub poll_interval: Duration,
    /// Give up after this long.
    pub timeout: Duration,
    /// Retries for each submit and poll call.
    pub max_retries: u32,
    /// Backoff between those retries.
    pub backoff: Backoff,
}

impl Default for PollerOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(600),
            max_retries: 3,
            backoff: Backoff::default(),
        }
    }
}

impl PollerOptions {
    /// Sets the poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the overall timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the per-call retry budget.
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the per-call backoff.
    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Identifies a started generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    /// Meeting being summarized.
    pub meeting_id: String,
    /// Local session id.
    pub session_id: Uuid,
    /// Process id assigned by the worker.
    pub process_id: String,
    /// Generation mode.
    pub mode: GenerationMode,
}

enum Outcome {
    Completed(SummaryResult),
    Failed(String),
    Cancelled,
}

struct PollerInner {
    worker: Arc<dyn SummaryWorker>,
    store: Arc<dyn ResultStore>,
    notifier: Arc<dyn Notifier>,
    options: PollerOptions,
    sessions: SessionRegistry,
}

/// Runs summary generations, one per meeting at a time.
///
/// Starting a generation for a meeting that already has one supersedes it:
/// the earlier loop stops and its callback is never invoked again.
#[derive(Clone)]
pub struct SummaryPoller {
    inner: Arc<PollerInner>,
}

impl SummaryPoller {
    /// Creates a poller.
    #[must_use]
    pub fn new(
        worker: Arc<dyn SummaryWorker>,
        store: Arc<dyn ResultStore>,
        notifier: Arc<dyn Notifier>,
        options: PollerOptions,
    ) -> Self {
        Self {
            inner: Arc::new(PollerInner {
                worker,
                store,
                notifier,
                options,
                sessions: SessionRegistry::new(),
            }),
        }
    }

    /// The poller's options.
    #[must_use]
    pub fn options(&self) -> &PollerOptions {
        &self.inner.options
    }

    /// Generates the first summary for a meeting.
    pub async fn generate<F>(
        &self,
        request: SummaryRequest,
        on_update: F,
    ) -> Result<SessionHandle, PollerError>
    where
        F: Fn(&SummaryUpdate) + Send + Sync + 'static,
    {
        self.start(request, GenerationMode::Initial, Arc::new(on_update))
            .await
    }

    /// Replaces the meeting's existing summary.
    ///
    /// If the regeneration fails or is cancelled, the last persisted summary
    /// is restored and reported as `completed`.
    pub async fn regenerate<F>(
        &self,
        request: SummaryRequest,
        on_update: F,
    ) -> Result<SessionHandle, PollerError>
    where
        F: Fn(&SummaryUpdate) + Send + Sync + 'static,
    {
        self.start(request, GenerationMode::Regenerate, Arc::new(on_update))
            .await
    }

    /// Stops the meeting's generation.
    ///
    /// The worker is asked to cancel; a failure there is logged and local
    /// cleanup happens regardless. The meeting returns to `idle`. Returns
    /// whether a generation was running.
    pub async fn stop(&self, meeting_id: &str) -> bool {
        let meeting_id = meeting_id.trim();
        let emitter = self.inner.sessions.stop(meeting_id);

        if let Err(e) = self.inner.worker.cancel(meeting_id).await {
            warn!(meeting_id, error = %e, "Failed to cancel summary on worker");
        }

        let stopped = emitter.is_some();
        if let Some(emitter) = emitter {
            emitter.emit(&SummaryUpdate::status(meeting_id, SummaryStatus::Idle));
            emitter.close();
            info!(meeting_id, "Summary generation stopped");
        }
        stopped
    }

    /// Stops every running generation, cancelling each on the worker
    /// concurrently. Returns how many were running.
    pub async fn stop_all(&self) -> usize {
        let meetings: Vec<String> = self
            .active_sessions()
            .into_iter()
            .map(|s| s.meeting_id)
            .collect();

        let mut stops: FuturesUnordered<_> = meetings.iter().map(|m| self.stop(m)).collect();
        let mut stopped = 0;
        while let Some(was_running) = stops.next().await {
            stopped += usize::from(was_running);
        }
        stopped
    }

    /// Stops every running generation locally without contacting the worker.
    pub fn shutdown(&self) {
        self.inner.sessions.shutdown_all();
    }

    /// Current status of a meeting.
    #[must_use]
    pub fn status(&self, meeting_id: &str) -> SummaryStatus {
        self.inner.sessions.status(meeting_id.trim())
    }

    /// Last summary shown for a meeting.
    #[must_use]
    pub fn last_result(&self, meeting_id: &str) -> Option<SummaryResult> {
        self.inner.sessions.last_good(meeting_id.trim())
    }

    /// Generations currently running, ordered by meeting id.
    #[must_use]
    pub fn active_sessions(&self) -> Vec<SessionInfo> {
        self.inner.sessions.active_sessions()
    }

    /// Returns true if the meeting has a running generation.
    #[must_use]
    pub fn is_active(&self, meeting_id: &str) -> bool {
        self.active_sessions()
            .iter()
            .any(|s| s.meeting_id == meeting_id.trim())
    }

    async fn start(
        &self,
        request: SummaryRequest,
        mode: GenerationMode,
        callback: UpdateCallback,
    ) -> Result<SessionHandle, PollerError> {
        let inner = &self.inner;
        let mut request = request;
        request.meeting_id = request.meeting_id.trim().to_string();
        let meeting_id = request.meeting_id.clone();
        if meeting_id.is_empty() {
            return Err(PollerError::InvalidRequest("meeting id is empty".to_string()));
        }
        if request.text.trim().is_empty() {
            return Err(PollerError::InvalidRequest("transcript is empty".to_string()));
        }
        if !request.model.is_complete() {
            inner.notifier.notify(
                Notification::error("Summary model not configured")
                    .with_body("Choose a provider and model before generating a summary"),
            );
            inner.notifier.request_model_settings();
            return Err(PollerError::InvalidRequest(
                "summary model is not configured".to_string(),
            ));
        }

        let backup = match mode {
            GenerationMode::Regenerate => inner.persisted_result(&meeting_id).await,
            GenerationMode::Initial => None,
        };

        let session = ActiveSession::new(mode, Arc::new(Emitter::new(callback)));
        let session_id = session.id;
        let token = Arc::clone(&session.token);
        if let Some(previous) = inner.sessions.begin(&meeting_id, session, backup) {
            info!(meeting_id = %meeting_id, previous = %previous, "Replacing running summary generation");
        }
        inner.publish(&meeting_id, session_id, SummaryUpdate::status(&meeting_id, mode.active_status()));

        let submitted = with_retry(
            || inner.worker.submit(&request),
            &inner.retry_options(&token),
        )
        .await;

        let process_id = match submitted {
            Ok(process_id) => process_id,
            Err(RetryError::Aborted(abort)) => {
                debug!(meeting_id = %meeting_id, reason = %abort.reason, "Summary submission aborted");
                return Err(PollerError::Cancelled(meeting_id));
            }
            Err(e) => {
                let message = failure_message(&e);
                error!(meeting_id = %meeting_id, error = %e, "Failed to submit summary");
                inner
                    .finish(&meeting_id, session_id, mode, Outcome::Failed(message.clone()))
                    .await;
                return Err(PollerError::Submit {
                    meeting_id,
                    message,
                });
            }
        };
        if token.is_cancelled() {
            debug!(meeting_id = %meeting_id, process_id = %process_id, "Summary stopped during submission");
            return Err(PollerError::Cancelled(meeting_id));
        }
        info!(meeting_id = %meeting_id, process_id = %process_id, mode = ?mode, "Summary submitted");

        let handle = tokio::spawn(Arc::clone(inner).poll_loop(
            meeting_id.clone(),
            session_id,
            mode,
            token,
        ));
        inner.sessions.attach(&meeting_id, session_id, handle);

        Ok(SessionHandle {
            meeting_id,
            session_id,
            process_id,
            mode,
        })
    }
}

impl std::fmt::Debug for SummaryPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SummaryPoller")
            .field("options", &self.inner.options)
            .field("active_sessions", &self.inner.sessions.active_sessions().len())
            .finish_non_exhaustive()
    }
}

impl PollerInner {
    fn retry_options(&self, token: &Arc<CancellationToken>) -> RetryOptions<HostError> {
        host_retry_options()
            .with_max_retries(self.options.max_retries)
            .with_backoff(self.options.backoff)
            .with_signal(Arc::clone(token))
    }

    async fn poll_loop(
        self: Arc<Self>,
        meeting_id: String,
        session_id: Uuid,
        mode: GenerationMode,
        token: Arc<CancellationToken>,
    ) {
        let timer = SpanTimer::start("summary.poll");
        let retry = self.retry_options(&token);

        let outcome = loop {
            tokio::select! {
                () = tokio::time::sleep(self.options.poll_interval) => {}
                () = token.cancelled() => {
                    debug!(meeting_id = %meeting_id, "Summary polling cancelled");
                    return;
                }
            }
            if timer.elapsed() >= self.options.timeout {
                warn!(meeting_id = %meeting_id, timeout_secs = self.options.timeout.as_secs(), "Summary generation timed out");
                break Outcome::Failed(TIMEOUT_MESSAGE.to_string());
            }

            let response = match with_retry(|| self.worker.poll(&meeting_id), &retry).await {
                Ok(response) => response,
                Err(RetryError::Aborted(_)) => return,
                Err(e) => {
                    error!(meeting_id = %meeting_id, error = %e, "Summary polling failed");
                    break Outcome::Failed(failure_message(&e));
                }
            };
            if token.is_cancelled() {
                return;
            }

            debug!(meeting_id = %meeting_id, status = %response.status, "Summary poll");
            match response.worker_status() {
                WorkerStatus::Running => {
                    self.publish(&meeting_id, session_id, SummaryUpdate::status(&meeting_id, mode.active_status()));
                }
                WorkerStatus::Summarizing => {
                    self.publish(&meeting_id, session_id, SummaryUpdate::status(&meeting_id, mode.summarizing_status()));
                }
                WorkerStatus::Completed => {
                    break match response.data.as_ref().map(SummaryResult::from_data) {
                        Some(Ok(result)) => Outcome::Completed(result),
                        Some(Err(e)) => Outcome::Failed(e.to_string()),
                        None => Outcome::Failed("Summary completed without data".to_string()),
                    };
                }
                WorkerStatus::Failed => {
                    break Outcome::Failed(
                        response
                            .error
                            .unwrap_or_else(|| "Summary generation failed".to_string()),
                    );
                }
                WorkerStatus::Cancelled => break Outcome::Cancelled,
            }
        };

        debug!(meeting_id = %meeting_id, span = timer.name(), duration_ms = timer.elapsed_ms(), "Summary polling finished");
        self.finish(&meeting_id, session_id, mode, outcome).await;
    }

    /// Applies a terminal outcome and ends the session.
    async fn finish(&self, meeting_id: &str, session_id: Uuid, mode: GenerationMode, outcome: Outcome) {
        match outcome {
            Outcome::Completed(result) => {
                let delivered = self.publish(meeting_id, session_id, SummaryUpdate::completed(meeting_id, result));
                if delivered {
                    let title = match mode {
                        GenerationMode::Initial => "Summary generated",
                        GenerationMode::Regenerate => "Summary regenerated",
                    };
                    info!(meeting_id, "{}", title);
                    self.notifier.notify(Notification::success(title));
                }
            }
            Outcome::Failed(message) => match mode {
                GenerationMode::Regenerate => {
                    if let Some(previous) = self.recover(meeting_id, session_id).await {
                        if self.publish(meeting_id, session_id, SummaryUpdate::completed(meeting_id, previous)) {
                            warn!(meeting_id, error = %message, "Summary regeneration failed, restored previous summary");
                            self.notifier.notify(
                                Notification::error("Summary regeneration failed")
                                    .with_body(format!("{message}. The previous summary was restored.")),
                            );
                        }
                    } else {
                        self.report_failure(meeting_id, session_id, &message);
                    }
                }
                GenerationMode::Initial => self.report_failure(meeting_id, session_id, &message),
            },
            Outcome::Cancelled => {
                let update = match self.recover(meeting_id, session_id).await {
                    Some(previous) => SummaryUpdate::completed(meeting_id, previous),
                    None => SummaryUpdate::status(meeting_id, SummaryStatus::Idle),
                };
                if self.publish(meeting_id, session_id, update) {
                    info!(meeting_id, "Summary generation cancelled by worker");
                    self.notifier.notify(Notification::info("Summary generation cancelled"));
                }
            }
        }

        self.sessions.release(meeting_id, session_id);
    }

    fn report_failure(&self, meeting_id: &str, session_id: Uuid, message: &str) {
        if !self.publish(meeting_id, session_id, SummaryUpdate::failed(meeting_id, message)) {
            return;
        }
        error!(meeting_id, error = %message, "Summary generation failed");
        self.notifier
            .notify(Notification::error("Summary generation failed").with_body(message));
        if is_missing_model_error(message) {
            self.notifier.request_model_settings();
        }
    }

    /// Finds the summary to restore: the persisted one, else the last shown.
    async fn recover(&self, meeting_id: &str, session_id: Uuid) -> Option<SummaryResult> {
        if !self.sessions.is_current(meeting_id, session_id) {
            return None;
        }
        self.persisted_result(meeting_id)
            .await
            .or_else(|| self.sessions.last_good(meeting_id))
    }

    async fn persisted_result(&self, meeting_id: &str) -> Option<SummaryResult> {
        match self.store.load_last_result(meeting_id).await {
            Ok(result) => result,
            Err(e) => {
                warn!(meeting_id, error = %e, "Failed to load persisted summary");
                None
            }
        }
    }

    /// Records the update's status and delivers it if the session is current.
    fn publish(&self, meeting_id: &str, session_id: Uuid, update: SummaryUpdate) -> bool {
        self.sessions
            .update(meeting_id, session_id, update.status, update.result.as_ref())
            .is_some_and(|emitter| emitter.emit(&update))
    }
}

fn failure_message(error: &RetryError<HostError>) -> String {
    error
        .last_error()
        .map_or_else(|| error.to_string(), ToString::to_string)
}
