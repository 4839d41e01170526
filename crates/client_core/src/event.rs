//! Classification of decoded lines into stream events.

use shared::{
    domain::Reference,
    protocol::{StreamPayload, DATA_PREFIX, DONE_SENTINEL},
};

use crate::error::ChatError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Content(String),
    References(Vec<Reference>),
    Done,
}

/// Extracts the payload of a `data:` line. Any other line, including blank
/// keep-alives and SSE comments, yields `None`.
pub fn data_payload(line: &str) -> Option<&str> {
    let rest = line.strip_prefix(DATA_PREFIX)?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

pub fn classify_line(line: &str) -> Option<Result<StreamEvent, ChatError>> {
    data_payload(line).map(classify_payload)
}

pub fn classify_payload(payload: &str) -> Result<StreamEvent, ChatError> {
    if payload.trim() == DONE_SENTINEL {
        return Ok(StreamEvent::Done);
    }
    match serde_json::from_str::<StreamPayload>(payload) {
        Ok(StreamPayload::ReferenceBatch { references, .. }) => {
            Ok(StreamEvent::References(references))
        }
        Ok(StreamPayload::ContentDelta { content }) => Ok(StreamEvent::Content(content)),
        Err(error) => Err(ChatError::MalformedEvent {
            payload: payload.to_string(),
            reason: error.to_string(),
        }),
    }
}

#[cfg(test)]
#[path = "tests/event_tests.rs"]
mod tests;
