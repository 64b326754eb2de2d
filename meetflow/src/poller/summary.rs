//! Summary results and parsing of worker output.
//!
//! The worker either returns pre-rendered markdown or a legacy structure:
//! an object mapping section keys to `{ title, blocks }`, with an optional
//! `_section_order` list and an optional `MeetingName`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

const SECTION_ORDER_KEY: &str = "_section_order";
const MEETING_NAME_KEY: &str = "MeetingName";
const RESERVED_KEYS: &[&str] = &[SECTION_ORDER_KEY, MEETING_NAME_KEY, "markdown", "summary_json"];

/// A content block within a section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Block identifier.
    pub id: String,
    /// Block type, e.g. `bullet` or `text`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Trimmed block text.
    pub content: String,
    /// Display color.
    pub color: String,
}

/// A titled section of a structured summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummarySection {
    /// Section key in the worker output.
    pub key: String,
    /// Section title.
    pub title: String,
    /// Ordered blocks.
    pub blocks: Vec<Block>,
}

/// Displayable summary content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format", content = "content", rename_all = "snake_case")]
pub enum SummaryContent {
    /// Pre-rendered markdown.
    Markdown(String),
    /// Ordered sections parsed from the legacy format.
    Sections(Vec<SummarySection>),
}

/// A summary ready for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryResult {
    /// The content to display.
    pub content: SummaryContent,
    /// Structured blocks delivered next to markdown, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_json: Option<Value>,
    /// Meeting title suggested by the worker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meeting_title: Option<String>,
}

impl SummaryResult {
    /// Creates a markdown summary.
    #[must_use]
    pub fn markdown(markdown: impl Into<String>) -> Self {
        Self {
            content: SummaryContent::Markdown(markdown.into()),
            summary_json: None,
            meeting_title: None,
        }
    }

    /// Returns the markdown text, if this is a markdown summary.
    #[must_use]
    pub fn as_markdown(&self) -> Option<&str> {
        match &self.content {
            SummaryContent::Markdown(md) => Some(md),
            SummaryContent::Sections(_) => None,
        }
    }

    /// Returns the sections, if this is a structured summary.
    #[must_use]
    pub fn sections(&self) -> Option<&[SummarySection]> {
        match &self.content {
            SummaryContent::Markdown(_) => None,
            SummaryContent::Sections(sections) => Some(sections),
        }
    }

    /// Parses worker output, logging anything skipped.
    pub fn from_data(data: &Value) -> Result<Self, SummaryParseError> {
        let parsed = parse_summary(data)?;
        for skipped in &parsed.skipped {
            warn!(section = %skipped.key, reason = %skipped.reason, "Skipped summary content");
        }
        Ok(parsed.result)
    }
}

/// A section, or a block inside one, that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedSection {
    /// Section key; skipped blocks use `key[index]`.
    pub key: String,
    /// Why it was skipped.
    pub reason: String,
}

/// Result of parsing worker output.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSummary {
    /// The summary.
    pub result: SummaryResult,
    /// Sections that were skipped.
    pub skipped: Vec<SkippedSection>,
}

/// Worker output that cannot be turned into a summary at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SummaryParseError {
    /// The output was not a JSON object.
    #[error("Summary data must be an object, got {0}")]
    NotAnObject(&'static str),
}

/// Parses worker output into a summary.
///
/// Markdown wins when present. Otherwise sections are read in
/// `_section_order` order followed by any remaining keys in document order;
/// malformed sections and blocks are recorded in [`ParsedSummary::skipped`].
pub fn parse_summary(data: &Value) -> Result<ParsedSummary, SummaryParseError> {
    let obj = data
        .as_object()
        .ok_or_else(|| SummaryParseError::NotAnObject(json_type(data)))?;

    let meeting_title = obj
        .get(MEETING_NAME_KEY)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let summary_json = obj.get("summary_json").filter(|v| !v.is_null()).cloned();

    if let Some(markdown) = obj
        .get("markdown")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
    {
        return Ok(ParsedSummary {
            result: SummaryResult {
                content: SummaryContent::Markdown(markdown.to_string()),
                summary_json,
                meeting_title,
            },
            skipped: Vec::new(),
        });
    }

    let mut sections = Vec::new();
    let mut skipped = Vec::new();
    for key in section_keys(obj) {
        match obj.get(&key) {
            None => skipped.push(SkippedSection {
                key,
                reason: "listed in section order but missing".to_string(),
            }),
            Some(value) => match parse_section(&key, value, &mut skipped) {
                Ok(section) => sections.push(section),
                Err(reason) => skipped.push(SkippedSection { key, reason }),
            },
        }
    }

    Ok(ParsedSummary {
        result: SummaryResult {
            content: SummaryContent::Sections(sections),
            summary_json,
            meeting_title,
        },
        skipped,
    })
}

fn section_keys(obj: &Map<String, Value>) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    if let Some(order) = obj.get(SECTION_ORDER_KEY).and_then(Value::as_array) {
        for key in order.iter().filter_map(Value::as_str) {
            if !RESERVED_KEYS.contains(&key) && !keys.iter().any(|k| k == key) {
                keys.push(key.to_string());
            }
        }
    }
    for key in obj.keys() {
        if !RESERVED_KEYS.contains(&key.as_str()) && !keys.contains(key) {
            keys.push(key.clone());
        }
    }
    keys
}

fn parse_section(
    key: &str,
    value: &Value,
    skipped: &mut Vec<SkippedSection>,
) -> Result<SummarySection, String> {
    let obj = value
        .as_object()
        .ok_or_else(|| format!("expected an object, got {}", json_type(value)))?;
    let title = obj
        .get("title")
        .and_then(Value::as_str)
        .ok_or_else(|| "missing title".to_string())?;
    let raw_blocks = obj
        .get("blocks")
        .and_then(Value::as_array)
        .ok_or_else(|| "missing blocks".to_string())?;

    let mut blocks = Vec::with_capacity(raw_blocks.len());
    for (index, block) in raw_blocks.iter().enumerate() {
        match parse_block(key, index, block) {
            Ok(block) => blocks.push(block),
            Err(reason) => skipped.push(SkippedSection {
                key: format!("{key}[{index}]"),
                reason,
            }),
        }
    }

    Ok(SummarySection {
        key: key.to_string(),
        title: title.to_string(),
        blocks,
    })
}

fn parse_block(section: &str, index: usize, value: &Value) -> Result<Block, String> {
    let obj = value
        .as_object()
        .ok_or_else(|| format!("expected a block object, got {}", json_type(value)))?;
    let content = obj
        .get("content")
        .and_then(Value::as_str)
        .ok_or_else(|| "block has no content".to_string())?;
    let id = obj
        .get("id")
        .and_then(Value::as_str)
        .map_or_else(|| format!("{section}-{index}"), str::to_string);
    let kind = obj
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("text")
        .to_string();

    Ok(Block {
        id,
        kind,
        content: content.trim().to_string(),
        color: "default".to_string(),
    })
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
