//! Summary generation poller.
//!
//! This module provides:
//! - `SummaryPoller`, which submits transcripts and polls the worker
//! - The worker and persisted-result collaborator traits with host-backed
//!   implementations
//! - Parsing of worker output into displayable summaries

mod generator;
#[cfg(test)]
mod poller_tests;
mod session;
mod status;
mod summary;
mod worker;

pub use generator::{
    PollerOptions, SessionHandle, SummaryPoller, SummaryUpdate, UpdateCallback, TIMEOUT_MESSAGE,
};
pub use session::SessionInfo;
pub use status::{is_missing_model_error, GenerationMode, SummaryStatus, WorkerStatus};
pub use summary::{
    parse_summary, Block, ParsedSummary, SkippedSection, SummaryContent, SummaryParseError,
    SummaryResult, SummarySection,
};
pub use worker::{
    HostResultStore, HostSummaryWorker, PollResponse, ResultStore, SummaryRequest, SummaryWorker,
    CANCEL_COMMAND, LOAD_COMMAND, POLL_COMMAND, SUBMIT_COMMAND,
};

#[cfg(test)]
pub use worker::{MockResultStore, MockSummaryWorker};
