//! Error types for the session engine

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, SessionError>;

/// Session engine errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Persistence failed for session {session_id} after {attempts} attempts: {message}")]
    Persistence {
        session_id: String,
        attempts: u32,
        message: String,
    },

    /// Layer 1 and Layer 2 have diverged and could not be rolled back.
    #[error("CRITICAL: storage layers inconsistent for session {session_id}: {message}")]
    CriticalInconsistency { session_id: String, message: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SessionError {
    /// Whether the error leaves the system in a state it cannot repair on its own
    pub fn is_fatal(&self) -> bool {
        matches!(self, SessionError::CriticalInconsistency { .. })
    }
}

impl From<crate::context::CompletionError> for SessionError {
    fn from(err: crate::context::CompletionError) -> Self {
        SessionError::Llm(err.to_string())
    }
}
