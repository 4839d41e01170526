//! Ordered, session-scoped record of chat turns.
//!
//! Turns are only ever appended. An assistant turn accepts content while it is
//! unsealed; at most one unsealed turn exists and it is always the last one.

use serde::{Deserialize, Serialize};
use shared::{
    domain::{Reference, Role, TurnId},
    protocol::HistoryEntry,
};

use crate::error::ChatError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub references: Option<Vec<Reference>>,
    pub sealed: bool,
}

#[derive(Debug, Default, Clone)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn get(&self, turn: TurnId) -> Option<&Turn> {
        self.turns.get(turn.0)
    }

    /// The unsealed assistant turn, if a response is still being written.
    pub fn in_flight(&self) -> Option<TurnId> {
        match self.turns.last() {
            Some(last) if !last.sealed => Some(TurnId(self.turns.len() - 1)),
            _ => None,
        }
    }

    pub fn append_user_turn(&mut self, text: &str) -> Result<TurnId, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::InvalidInput);
        }
        self.ensure_nothing_in_flight("user turn")?;
        self.turns.push(Turn {
            role: Role::User,
            content: text.to_string(),
            references: None,
            sealed: true,
        });
        Ok(TurnId(self.turns.len() - 1))
    }

    pub fn append_assistant_placeholder(&mut self) -> Result<TurnId, ChatError> {
        self.ensure_nothing_in_flight("assistant placeholder")?;
        self.turns.push(Turn {
            role: Role::Assistant,
            content: String::new(),
            references: None,
            sealed: false,
        });
        Ok(TurnId(self.turns.len() - 1))
    }

    pub fn append_content(&mut self, turn: TurnId, delta: &str) -> Result<(), ChatError> {
        let entry = self.turn_mut(turn)?;
        if entry.role != Role::Assistant {
            return Err(ChatError::InvariantViolation(format!(
                "turn {} is not an assistant turn",
                turn.0
            )));
        }
        if entry.sealed {
            return Err(ChatError::InvariantViolation(format!(
                "turn {} is sealed",
                turn.0
            )));
        }
        entry.content.push_str(delta);
        Ok(())
    }

    /// Replaces the turn's reference list. Sealed turns accept this too.
    pub fn set_references(
        &mut self,
        turn: TurnId,
        references: Vec<Reference>,
    ) -> Result<(), ChatError> {
        let entry = self.turn_mut(turn)?;
        if entry.role != Role::Assistant {
            return Err(ChatError::InvariantViolation(format!(
                "references attached to non-assistant turn {}",
                turn.0
            )));
        }
        entry.references = Some(references);
        Ok(())
    }

    pub fn seal(&mut self, turn: TurnId) -> Result<(), ChatError> {
        self.turn_mut(turn)?.sealed = true;
        Ok(())
    }

    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.clone()
    }

    /// Role and content of every turn, as sent to the backend for context.
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.turns
            .iter()
            .map(|turn| HistoryEntry {
                role: turn.role,
                content: turn.content.clone(),
            })
            .collect()
    }

    fn ensure_nothing_in_flight(&self, appending: &str) -> Result<(), ChatError> {
        match self.in_flight() {
            Some(open) => Err(ChatError::InvariantViolation(format!(
                "cannot append {appending} while turn {} is unsealed",
                open.0
            ))),
            None => Ok(()),
        }
    }

    fn turn_mut(&mut self, turn: TurnId) -> Result<&mut Turn, ChatError> {
        self.turns
            .get_mut(turn.0)
            .ok_or_else(|| ChatError::InvariantViolation(format!("unknown turn {}", turn.0)))
    }
}

#[cfg(test)]
#[path = "tests/transcript_tests.rs"]
mod tests;
