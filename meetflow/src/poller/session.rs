//! Per-meeting polling sessions.
//!
//! Each meeting has at most one active session. Starting a new one closes the
//! previous session's emitter, cancels its token and aborts its loop, so
//! nothing from the superseded session reaches the caller afterwards.

use super::generator::{SummaryUpdate, UpdateCallback};
use super::status::{GenerationMode, SummaryStatus};
use super::summary::SummaryResult;
use crate::cancellation::CancellationToken;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::ReentrantMutex;
use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Delivers updates for one session until it is closed.
///
/// The lock is held while the callback runs, so once [`Emitter::close`]
/// returns no further update can be delivered. The lock is reentrant: a
/// callback may close its own emitter (for example by shutting the poller
/// down) and its in-flight delivery still completes.
pub(crate) struct Emitter {
    callback: UpdateCallback,
    live: ReentrantMutex<Cell<bool>>,
}

impl Emitter {
    pub(crate) fn new(callback: UpdateCallback) -> Self {
        Self {
            callback,
            live: ReentrantMutex::new(Cell::new(true)),
        }
    }

    /// Delivers `update` if the session is still live.
    pub(crate) fn emit(&self, update: &SummaryUpdate) -> bool {
        let live = self.live.lock();
        if !live.get() {
            return false;
        }
        if let Err(e) = catch_unwind(AssertUnwindSafe(|| (self.callback)(update))) {
            warn!(meeting_id = %update.meeting_id, "Summary update callback panicked: {:?}", e);
        }
        true
    }

    pub(crate) fn close(&self) {
        self.live.lock().set(false);
    }
}

/// The running generation of a meeting.
pub(crate) struct ActiveSession {
    pub id: Uuid,
    pub mode: GenerationMode,
    pub token: Arc<CancellationToken>,
    pub emitter: Arc<Emitter>,
    pub handle: Option<JoinHandle<()>>,
    pub started_at: DateTime<Utc>,
}

impl ActiveSession {
    pub(crate) fn new(mode: GenerationMode, emitter: Arc<Emitter>) -> Self {
        Self {
            id: Uuid::new_v4(),
            mode,
            token: CancellationToken::shared(),
            emitter,
            handle: None,
            started_at: Utc::now(),
        }
    }

    /// Stops the session: no more updates, no more polling.
    fn shut_down(&mut self, reason: &str) {
        self.emitter.close();
        self.token.cancel(reason);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[derive(Default)]
struct MeetingEntry {
    status: SummaryStatus,
    last_good: Option<SummaryResult>,
    active: Option<ActiveSession>,
}

impl MeetingEntry {
    fn current(&self, session_id: Uuid) -> Option<&ActiveSession> {
        self.active.as_ref().filter(|s| s.id == session_id)
    }
}

/// Snapshot of an active session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Meeting the session belongs to.
    pub meeting_id: String,
    /// Session identifier.
    pub session_id: Uuid,
    /// Generation mode.
    pub mode: GenerationMode,
    /// Current status.
    pub status: SummaryStatus,
    /// When the session started.
    pub started_at: DateTime<Utc>,
}

/// Registry of sessions keyed by meeting id.
#[derive(Default)]
pub(crate) struct SessionRegistry {
    entries: DashMap<String, MeetingEntry>,
}

impl SessionRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Makes `session` the active session for the meeting, shutting down any
    /// previous one. Returns the id of the superseded session.
    pub(crate) fn begin(
        &self,
        meeting_id: &str,
        session: ActiveSession,
        last_good: Option<SummaryResult>,
    ) -> Option<Uuid> {
        let mut entry = self.entries.entry(meeting_id.to_string()).or_default();
        entry.status = session.mode.active_status();
        if last_good.is_some() {
            entry.last_good = last_good;
        }
        let mut previous = entry.active.replace(session)?;
        drop(entry);

        previous.shut_down("superseded by a new summary request");
        debug!(meeting_id, session_id = %previous.id, "Superseded summary session");
        Some(previous.id)
    }

    /// Stores the loop handle. Ignored if the session is no longer active.
    pub(crate) fn attach(&self, meeting_id: &str, session_id: Uuid, handle: JoinHandle<()>) {
        if let Some(mut entry) = self.entries.get_mut(meeting_id) {
            if let Some(active) = entry.active.as_mut().filter(|s| s.id == session_id) {
                active.handle = Some(handle);
            }
        }
    }

    /// Records `status` and returns the emitter if the session is current.
    pub(crate) fn update(
        &self,
        meeting_id: &str,
        session_id: Uuid,
        status: SummaryStatus,
        result: Option<&SummaryResult>,
    ) -> Option<Arc<Emitter>> {
        let mut entry = self.entries.get_mut(meeting_id)?;
        let emitter = Arc::clone(&entry.current(session_id)?.emitter);
        entry.status = status;
        if let Some(result) = result {
            entry.last_good = Some(result.clone());
        }
        Some(emitter)
    }

    /// Removes the session once it reached a terminal state.
    pub(crate) fn release(&self, meeting_id: &str, session_id: Uuid) {
        let session = self.entries.get_mut(meeting_id).and_then(|mut entry| {
            entry.current(session_id)?;
            entry.active.take()
        });
        // Closing waits for an in-flight callback, so never under the map lock.
        if let Some(session) = session {
            session.emitter.close();
        }
    }

    /// Detaches the active session and resets the meeting to idle.
    ///
    /// The token is cancelled and the loop aborted; the emitter is returned
    /// still open so the caller can deliver a final update.
    pub(crate) fn stop(&self, meeting_id: &str) -> Option<Arc<Emitter>> {
        let mut entry = self.entries.get_mut(meeting_id)?;
        entry.status = SummaryStatus::Idle;
        let mut session = entry.active.take()?;
        drop(entry);

        session.token.cancel("stopped");
        if let Some(handle) = session.handle.take() {
            handle.abort();
        }
        Some(session.emitter)
    }

    pub(crate) fn status(&self, meeting_id: &str) -> SummaryStatus {
        self.entries
            .get(meeting_id)
            .map(|e| e.status)
            .unwrap_or_default()
    }

    pub(crate) fn last_good(&self, meeting_id: &str) -> Option<SummaryResult> {
        self.entries.get(meeting_id).and_then(|e| e.last_good.clone())
    }

    pub(crate) fn is_current(&self, meeting_id: &str, session_id: Uuid) -> bool {
        self.entries
            .get(meeting_id)
            .is_some_and(|e| e.current(session_id).is_some())
    }

    pub(crate) fn active_sessions(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self
            .entries
            .iter()
            .filter_map(|entry| {
                entry.active.as_ref().map(|s| SessionInfo {
                    meeting_id: entry.key().clone(),
                    session_id: s.id,
                    mode: s.mode,
                    status: entry.status,
                    started_at: s.started_at,
                })
            })
            .collect();
        sessions.sort_by(|a, b| a.meeting_id.cmp(&b.meeting_id));
        sessions
    }

    /// Shuts down every active session.
    pub(crate) fn shutdown_all(&self) {
        let sessions: Vec<ActiveSession> = self
            .entries
            .iter_mut()
            .filter_map(|mut entry| {
                let session = entry.active.take()?;
                entry.status = SummaryStatus::Idle;
                Some(session)
            })
            .collect();
        for mut session in sessions {
            session.shut_down("poller shut down");
        }
    }
}
