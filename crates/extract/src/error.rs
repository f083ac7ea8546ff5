use thiserror::Error;

use crate::schema::ExtractionDebug;

/// Failures of a single LLM completion. Every variant is retry-eligible.
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("LLM call timed out")]
    Timeout,
    #[error("LLM rate limited: {0}")]
    RateLimited(String),
    #[error("LLM transport error: {0}")]
    Transport(String),
    #[error("LLM server error: {0}")]
    Server(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else if let Some(status) = err.status() {
            LlmError::Server(status.to_string())
        } else {
            LlmError::Transport(err.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Every attempt failed: transport errors, timeouts or unparseable output.
    RetriesExhausted,
}

/// Terminal failure of an extraction call, with the full attempt history.
#[derive(Debug, Clone, Error)]
#[error("extraction failed after {} attempt(s): {kind:?}", .debug.attempts)]
pub struct ExtractionFailure {
    pub kind: FailureKind,
    pub debug: ExtractionDebug,
}
