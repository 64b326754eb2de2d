//! The external summary worker and the persisted-result store.

use super::status::WorkerStatus;
use super::summary::SummaryResult;
use crate::errors::HostError;
use crate::events::ModelConfig;
use crate::retry::CommandInvoker;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// Host command that submits a transcript for summarization.
pub const SUBMIT_COMMAND: &str = "api_process_transcript";
/// Host command that reports summary status.
pub const POLL_COMMAND: &str = "api_get_summary";
/// Host command that cancels a running summary.
pub const CANCEL_COMMAND: &str = "api_cancel_summary";
/// Host command that loads the persisted summary of a meeting.
pub const LOAD_COMMAND: &str = "api_get_meeting_summary";

/// A request to summarize a meeting transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryRequest {
    /// Meeting to summarize.
    pub meeting_id: String,
    /// Transcript text.
    pub text: String,
    /// Summary model selection.
    pub model: ModelConfig,
    /// Extra instructions for the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_prompt: Option<String>,
    /// Summary template to use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
}

impl SummaryRequest {
    /// Creates a request with no prompt or template.
    #[must_use]
    pub fn new(meeting_id: impl Into<String>, text: impl Into<String>, model: ModelConfig) -> Self {
        Self {
            meeting_id: meeting_id.into(),
            text: text.into(),
            model,
            custom_prompt: None,
            template_id: None,
        }
    }

    /// Sets a custom prompt.
    #[must_use]
    pub fn with_custom_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.custom_prompt = Some(prompt.into());
        self
    }

    /// Sets the template.
    #[must_use]
    pub fn with_template(mut self, template_id: impl Into<String>) -> Self {
        self.template_id = Some(template_id.into());
        self
    }
}

/// One status report from the worker.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PollResponse {
    /// Raw status string.
    pub status: String,
    /// Summary data once completed.
    #[serde(default)]
    pub data: Option<Value>,
    /// Failure description.
    #[serde(default)]
    pub error: Option<String>,
}

impl PollResponse {
    /// Creates a response with only a status.
    #[must_use]
    pub fn status(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            ..Self::default()
        }
    }

    /// Creates a completed response carrying `data`.
    #[must_use]
    pub fn completed(data: Value) -> Self {
        Self {
            status: "completed".to_string(),
            data: Some(data),
            error: None,
        }
    }

    /// Creates a failed response.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: "failed".to_string(),
            data: None,
            error: Some(error.into()),
        }
    }

    /// The normalised status.
    #[must_use]
    pub fn worker_status(&self) -> WorkerStatus {
        WorkerStatus::parse(&self.status)
    }
}

/// An external process that turns transcripts into summaries.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SummaryWorker: Send + Sync {
    /// Submits a transcript and returns the worker's process id.
    async fn submit(&self, request: &SummaryRequest) -> Result<String, HostError>;

    /// Reports the status of the meeting's summary.
    async fn poll(&self, meeting_id: &str) -> Result<PollResponse, HostError>;

    /// Asks the worker to stop summarizing the meeting.
    async fn cancel(&self, meeting_id: &str) -> Result<(), HostError>;
}

/// Read access to the last persisted summary of a meeting.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Loads the last persisted summary, if any.
    async fn load_last_result(&self, meeting_id: &str) -> Result<Option<SummaryResult>, HostError>;
}

#[derive(Debug, Deserialize)]
struct SubmitReply {
    #[serde(alias = "processId")]
    process_id: String,
}

/// [`SummaryWorker`] backed by host commands.
#[derive(Clone)]
pub struct HostSummaryWorker {
    invoker: Arc<dyn CommandInvoker>,
}

impl HostSummaryWorker {
    /// Creates a worker that talks to the host through `invoker`.
    #[must_use]
    pub fn new(invoker: Arc<dyn CommandInvoker>) -> Self {
        Self { invoker }
    }
}

impl std::fmt::Debug for HostSummaryWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostSummaryWorker").finish_non_exhaustive()
    }
}

#[async_trait]
impl SummaryWorker for HostSummaryWorker {
    async fn submit(&self, request: &SummaryRequest) -> Result<String, HostError> {
        let args = json!({
            "text": request.text,
            "model": request.model.provider,
            "modelName": request.model.model,
            "meetingId": request.meeting_id,
            "customPrompt": request.custom_prompt.as_deref().unwrap_or_default(),
            "templateId": request.template_id,
        });
        let reply = self.invoker.invoke(SUBMIT_COMMAND, args).await?;
        let reply: SubmitReply = serde_json::from_value(reply)?;
        Ok(reply.process_id)
    }

    async fn poll(&self, meeting_id: &str) -> Result<PollResponse, HostError> {
        let reply = self
            .invoker
            .invoke(POLL_COMMAND, json!({ "meetingId": meeting_id }))
            .await?;
        Ok(serde_json::from_value(reply)?)
    }

    async fn cancel(&self, meeting_id: &str) -> Result<(), HostError> {
        self.invoker
            .invoke(CANCEL_COMMAND, json!({ "meetingId": meeting_id }))
            .await?;
        Ok(())
    }
}

/// [`ResultStore`] backed by host commands.
#[derive(Clone)]
pub struct HostResultStore {
    invoker: Arc<dyn CommandInvoker>,
}

impl HostResultStore {
    /// Creates a store that reads through `invoker`.
    #[must_use]
    pub fn new(invoker: Arc<dyn CommandInvoker>) -> Self {
        Self { invoker }
    }
}

impl std::fmt::Debug for HostResultStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostResultStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl ResultStore for HostResultStore {
    async fn load_last_result(&self, meeting_id: &str) -> Result<Option<SummaryResult>, HostError> {
        let reply = self
            .invoker
            .invoke(LOAD_COMMAND, json!({ "meetingId": meeting_id }))
            .await?;

        // Replies are either the summary data or a poll-shaped envelope.
        let data = match reply {
            Value::Null => return Ok(None),
            Value::Object(mut map) if map.contains_key("data") => {
                map.remove("data").unwrap_or(Value::Null)
            }
            other => other,
        };
        if data.is_null() {
            return Ok(None);
        }

        SummaryResult::from_data(&data)
            .map(Some)
            .map_err(|e| HostError::Decode(e.to_string()))
    }
}
