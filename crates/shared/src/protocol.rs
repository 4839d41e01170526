use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Reference, Role};

pub const CHECK_ASSISTANT_PATH: &str = "api/check_assistant";
pub const LIST_ASSISTANT_FILES_PATH: &str = "api/list_assistant_files";
pub const BOOTSTRAP_PATH: &str = "api/bootstrap";
pub const CHAT_PATH: &str = "api/chat";

/// Prefix of every event line in the chat stream. A single space after the
/// colon is optional.
pub const DATA_PREFIX: &str = "data:";
/// Payload that terminates the chat stream.
pub const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub history: Vec<HistoryEntry>,
}

/// One structured event payload carried by a `data:` line.
///
/// The variants are told apart by the presence of a `references` field; any
/// object carrying one is a reference batch, whatever else it holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamPayload {
    ReferenceBatch {
        references: Vec<Reference>,
        #[serde(rename = "isReference", default)]
        is_reference: bool,
    },
    ContentDelta {
        content: String,
    },
}

impl StreamPayload {
    pub fn content(text: impl Into<String>) -> Self {
        StreamPayload::ContentDelta {
            content: text.into(),
        }
    }

    pub fn references(references: Vec<Reference>) -> Self {
        StreamPayload::ReferenceBatch {
            references,
            is_reference: true,
        }
    }

    /// Frames the payload as one newline-terminated event line.
    pub fn to_data_line(&self) -> Result<String, serde_json::Error> {
        Ok(format!("{DATA_PREFIX} {}\n", serde_json::to_string(self)?))
    }
}

pub fn done_line() -> String {
    format!("{DATA_PREFIX} {DONE_SENTINEL}\n")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckAssistantResponse {
    pub exists: bool,
    #[serde(default)]
    pub assistant_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ListAssistantFilesResponse {
    Success { files: Vec<AssistantFile> },
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantFile {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub created_at: FileTimestamp,
}

/// Upload time as reported by the backend: Unix seconds or an RFC 3339 string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FileTimestamp {
    Unix(i64),
    Text(String),
}

impl FileTimestamp {
    pub fn to_utc(&self) -> Option<DateTime<Utc>> {
        match self {
            FileTimestamp::Unix(seconds) => DateTime::from_timestamp(*seconds, 0),
            FileTimestamp::Text(raw) => DateTime::parse_from_rfc3339(raw.trim())
                .ok()
                .map(|parsed| parsed.with_timezone(&Utc)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapResponse {
    pub success: bool,
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
