//! Hand-written fakes for the worker, the result store and retried operations.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::errors::HostError;
use crate::poller::{
    PollResponse, ResultStore, SummaryRequest, SummaryResult, SummaryStatus, SummaryUpdate,
    SummaryWorker,
};

/// A worker that replays scripted poll responses per meeting.
///
/// Once a meeting's script is used up, polls report `processing`.
#[derive(Debug, Default)]
pub struct ScriptedWorker {
    scripts: Mutex<HashMap<String, VecDeque<Result<PollResponse, HostError>>>>,
    submit_failures: Mutex<VecDeque<HostError>>,
    cancel_error: Mutex<Option<HostError>>,
    submissions: Mutex<Vec<SummaryRequest>>,
    cancels: Mutex<Vec<String>>,
    polls: Mutex<Vec<String>>,
    next_process: AtomicU32,
}

impl ScriptedWorker {
    /// Creates a worker with no scripts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends poll responses for a meeting.
    pub fn script<I>(&self, meeting_id: &str, responses: I)
    where
        I: IntoIterator<Item = Result<PollResponse, HostError>>,
    {
        self.scripts
            .lock()
            .entry(meeting_id.to_string())
            .or_default()
            .extend(responses);
    }

    /// Appends successful poll responses for a meeting.
    pub fn script_ok<I>(&self, meeting_id: &str, responses: I)
    where
        I: IntoIterator<Item = PollResponse>,
    {
        self.script(meeting_id, responses.into_iter().map(Ok));
    }

    /// Makes the next submission fail with `error`.
    pub fn fail_next_submit(&self, error: HostError) {
        self.submit_failures.lock().push_back(error);
    }

    /// Makes every cancel request fail with `error`.
    pub fn fail_cancel(&self, error: HostError) {
        *self.cancel_error.lock() = Some(error);
    }

    /// Requests submitted so far.
    #[must_use]
    pub fn submissions(&self) -> Vec<SummaryRequest> {
        self.submissions.lock().clone()
    }

    /// Meetings that were cancelled.
    #[must_use]
    pub fn cancels(&self) -> Vec<String> {
        self.cancels.lock().clone()
    }

    /// Number of polls made for a meeting.
    #[must_use]
    pub fn poll_count(&self, meeting_id: &str) -> usize {
        self.polls.lock().iter().filter(|m| *m == meeting_id).count()
    }
}

#[async_trait]
impl SummaryWorker for ScriptedWorker {
    async fn submit(&self, request: &SummaryRequest) -> Result<String, HostError> {
        self.submissions.lock().push(request.clone());
        if let Some(error) = self.submit_failures.lock().pop_front() {
            return Err(error);
        }
        let n = self.next_process.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("process-{n}"))
    }

    async fn poll(&self, meeting_id: &str) -> Result<PollResponse, HostError> {
        self.polls.lock().push(meeting_id.to_string());
        self.scripts
            .lock()
            .get_mut(meeting_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(PollResponse::status("processing")))
    }

    async fn cancel(&self, meeting_id: &str) -> Result<(), HostError> {
        self.cancels.lock().push(meeting_id.to_string());
        match self.cancel_error.lock().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// An in-memory [`ResultStore`].
#[derive(Debug, Default)]
pub struct InMemoryResultStore {
    results: Mutex<HashMap<String, SummaryResult>>,
    error: Mutex<Option<HostError>>,
    loads: AtomicU32,
}

impl InMemoryResultStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a result for a meeting.
    pub fn insert(&self, meeting_id: impl Into<String>, result: SummaryResult) {
        self.results.lock().insert(meeting_id.into(), result);
    }

    /// Makes every load fail with `error`.
    pub fn fail_with(&self, error: HostError) {
        *self.error.lock() = Some(error);
    }

    /// Number of loads so far.
    #[must_use]
    pub fn load_count(&self) -> u32 {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn load_last_result(&self, meeting_id: &str) -> Result<Option<SummaryResult>, HostError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.error.lock().clone() {
            return Err(error);
        }
        Ok(self.results.lock().get(meeting_id).cloned())
    }
}

/// Records every [`SummaryUpdate`] delivered to its callback.
#[derive(Debug, Default)]
pub struct UpdateRecorder {
    updates: Mutex<Vec<SummaryUpdate>>,
    notify: Notify,
}

impl UpdateRecorder {
    /// Creates a shared recorder.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A callback that records into this recorder.
    #[must_use]
    pub fn callback(self: &Arc<Self>) -> impl Fn(&SummaryUpdate) + Send + Sync + 'static {
        let recorder = Arc::clone(self);
        move |update: &SummaryUpdate| {
            recorder.updates.lock().push(update.clone());
            recorder.notify.notify_waiters();
        }
    }

    /// All recorded updates.
    #[must_use]
    pub fn updates(&self) -> Vec<SummaryUpdate> {
        self.updates.lock().clone()
    }

    /// Recorded statuses in order.
    #[must_use]
    pub fn statuses(&self) -> Vec<SummaryStatus> {
        self.updates.lock().iter().map(|u| u.status).collect()
    }

    /// The latest update.
    #[must_use]
    pub fn last(&self) -> Option<SummaryUpdate> {
        self.updates.lock().last().cloned()
    }

    /// Waits for the first update with `status`.
    pub async fn wait_for(&self, status: SummaryStatus) -> SummaryUpdate {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(update) = self.updates.lock().iter().find(|u| u.status == status) {
                return update.clone();
            }
            notified.await;
        }
    }
}

/// An operation that fails a set number of times before succeeding.
#[derive(Debug)]
pub struct FlakyOperation {
    failures: u32,
    message: String,
    calls: AtomicU32,
}

impl FlakyOperation {
    /// Fails `failures` times with `message`, then succeeds.
    #[must_use]
    pub fn new(failures: u32, message: impl Into<String>) -> Self {
        Self {
            failures,
            message: message.into(),
            calls: AtomicU32::new(0),
        }
    }

    /// Runs the operation once, returning the call number on success.
    pub async fn call(&self) -> Result<u32, String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.failures {
            Err(self.message.clone())
        } else {
            Ok(n)
        }
    }

    /// Number of calls so far.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}
