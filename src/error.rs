use thiserror::Error;

/// Errors returned by session, provider and store operations.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Missing API key, base URL or model; raised before any network I/O.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Network failure or non-2xx response.
    #[error("{0}")]
    Transport(String),
    /// A single SSE line that could not be decoded. Recovered locally.
    #[error("malformed stream line {line:?}: {reason}")]
    StreamParse { line: String, reason: String },
    /// Saved state could not be read or written.
    #[error("persistence error: {0}")]
    Persistence(String),
    /// Operation not allowed in the current session state.
    #[error("{0}")]
    State(String),
    /// The in-flight request was stopped before any text arrived.
    #[error("generation stopped")]
    Cancelled,
}

impl ChatError {
    /// Whether this error is meant to reach the user-facing layer.
    pub fn is_user_facing(&self) -> bool {
        !matches!(
            self,
            ChatError::StreamParse { .. } | ChatError::Persistence(_)
        )
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        ChatError::Transport(format!("request failed: {}", err))
    }
}

pub type ChatResult<T> = Result<T, ChatError>;
