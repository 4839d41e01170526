use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("message must not be empty")]
    InvalidInput,
    #[error("a response is already streaming")]
    Busy,
    #[error("malformed event payload {payload:?}: {reason}")]
    MalformedEvent { payload: String, reason: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("assistant backend error: {0}")]
    Assistant(String),
    #[error("transcript invariant violated: {0}")]
    InvariantViolation(String),
}

impl ChatError {
    pub fn transport(error: impl std::fmt::Display) -> Self {
        ChatError::Transport(error.to_string())
    }

    /// Whether the error ends the current turn and should be shown to the user.
    pub fn is_user_visible(&self) -> bool {
        matches!(self, ChatError::Transport(_) | ChatError::Assistant(_))
    }
}
