//! Summary generation status and worker status mapping.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of summary generation for one meeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryStatus {
    /// Nothing is running.
    #[default]
    Idle,
    /// The transcript is being processed.
    Processing,
    /// The worker is writing the summary.
    Summarizing,
    /// An existing summary is being regenerated.
    Regenerating,
    /// A summary is available.
    Completed,
    /// Generation failed.
    Error,
    /// Generation was cancelled.
    Cancelled,
}

impl SummaryStatus {
    /// Returns true for states with no further transition.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }

    /// Returns true while a generation is in flight.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Processing | Self::Summarizing | Self::Regenerating)
    }

    /// Message shown to the user while in this state.
    #[must_use]
    pub fn status_message(&self) -> Option<&'static str> {
        match self {
            Self::Processing => Some("Processing transcript..."),
            Self::Summarizing => Some("Generating summary..."),
            Self::Regenerating => Some("Regenerating summary..."),
            _ => None,
        }
    }
}

impl fmt::Display for SummaryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Processing => write!(f, "processing"),
            Self::Summarizing => write!(f, "summarizing"),
            Self::Regenerating => write!(f, "regenerating"),
            Self::Completed => write!(f, "completed"),
            Self::Error => write!(f, "error"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Whether a generation creates the first summary or replaces one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
    /// First summary for the meeting.
    #[default]
    Initial,
    /// Replaces a summary the user already has.
    Regenerate,
}

impl GenerationMode {
    /// Status reported while the worker is processing.
    #[must_use]
    pub fn active_status(&self) -> SummaryStatus {
        match self {
            Self::Initial => SummaryStatus::Processing,
            Self::Regenerate => SummaryStatus::Regenerating,
        }
    }

    /// Status reported while the worker is writing the summary.
    #[must_use]
    pub fn summarizing_status(&self) -> SummaryStatus {
        match self {
            Self::Initial => SummaryStatus::Summarizing,
            Self::Regenerate => SummaryStatus::Regenerating,
        }
    }
}

/// Status string reported by the worker, normalised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    /// Still working.
    Running,
    /// Writing the summary.
    Summarizing,
    /// Finished; data is available.
    Completed,
    /// Finished with an error.
    Failed,
    /// Stopped by a cancel request.
    Cancelled,
}

impl WorkerStatus {
    /// Maps a worker status string. Unknown values count as still running.
    #[must_use]
    pub fn parse(status: &str) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "completed" | "complete" | "done" => Self::Completed,
            "error" | "failed" => Self::Failed,
            "cancelled" | "canceled" => Self::Cancelled,
            "summarizing" => Self::Summarizing,
            _ => Self::Running,
        }
    }
}

/// Returns true if an error message says the summary model is not set up.
#[must_use]
pub fn is_missing_model_error(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("model")
        && ["required", "not configured", "missing", "not found", "no model"]
            .iter()
            .any(|needle| message.contains(needle))
}
