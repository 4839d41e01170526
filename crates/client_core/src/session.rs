//! Per-request stream state and the rules for applying events to a transcript.

use shared::domain::{Reference, TurnId};
use tracing::{debug, warn};

use crate::{
    decoder::LineDecoder,
    error::ChatError,
    event::{classify_line, StreamEvent},
    transcript::Transcript,
};

/// What a batch of lines changed, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    Content(String),
    References(Vec<Reference>),
    Malformed { reason: String },
    EndOfStream,
}

#[derive(Debug)]
pub struct StreamSession {
    turn: TurnId,
    decoder: LineDecoder,
    accumulated: String,
    pending_references: Option<Vec<Reference>>,
    cancelled: bool,
    malformed_events: usize,
    finished: bool,
}

impl StreamSession {
    pub fn new(turn: TurnId) -> Self {
        Self {
            turn,
            decoder: LineDecoder::new(),
            accumulated: String::new(),
            pending_references: None,
            cancelled: false,
            malformed_events: 0,
            finished: false,
        }
    }

    pub fn turn(&self) -> TurnId {
        self.turn
    }

    /// Every content delta applied so far, coalesced.
    pub fn accumulated(&self) -> &str {
        &self.accumulated
    }

    /// The latest reference batch seen in this stream.
    pub fn references(&self) -> Option<&[Reference]> {
        self.pending_references.as_deref()
    }

    pub fn malformed_events(&self) -> usize {
        self.malformed_events
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }

    /// True once the end-of-stream sentinel was applied.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Decodes one transport chunk and applies every complete line to the
    /// transcript. Lines after the sentinel are discarded.
    pub fn ingest(
        &mut self,
        chunk: &[u8],
        transcript: &mut Transcript,
    ) -> Result<Vec<SessionUpdate>, ChatError> {
        let mut updates = Vec::new();
        if self.finished {
            return Ok(updates);
        }
        for line in self.decoder.feed(chunk) {
            self.apply_line(&line, transcript, &mut updates)?;
            if self.finished {
                break;
            }
        }
        Ok(updates)
    }

    /// Applies an unterminated trailing line left when the transport closed.
    pub fn finish(&mut self, transcript: &mut Transcript) -> Result<Vec<SessionUpdate>, ChatError> {
        let mut updates = Vec::new();
        if self.finished {
            return Ok(updates);
        }
        if let Some(line) = self.decoder.finish() {
            self.apply_line(&line, transcript, &mut updates)?;
        }
        Ok(updates)
    }

    fn apply_line(
        &mut self,
        line: &str,
        transcript: &mut Transcript,
        updates: &mut Vec<SessionUpdate>,
    ) -> Result<(), ChatError> {
        let event = match classify_line(line) {
            None => return Ok(()),
            Some(Ok(event)) => event,
            Some(Err(ChatError::MalformedEvent { payload, reason })) => {
                self.malformed_events += 1;
                warn!(turn = self.turn.0, %payload, %reason, "skipping malformed stream event");
                updates.push(SessionUpdate::Malformed { reason });
                return Ok(());
            }
            Some(Err(other)) => return Err(other),
        };

        match event {
            StreamEvent::Done => {
                debug!(turn = self.turn.0, "end-of-stream sentinel");
                self.finished = true;
                updates.push(SessionUpdate::EndOfStream);
            }
            StreamEvent::References(references) => {
                debug!(turn = self.turn.0, count = references.len(), "reference batch");
                transcript.set_references(self.turn, references.clone())?;
                self.pending_references = Some(references.clone());
                updates.push(SessionUpdate::References(references));
            }
            StreamEvent::Content(delta) => {
                if delta.is_empty() {
                    return Ok(());
                }
                transcript.append_content(self.turn, &delta)?;
                self.accumulated.push_str(&delta);
                updates.push(SessionUpdate::Content(delta));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
