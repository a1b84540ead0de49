//! Error types for archive indexing, transfer and session handling

pub mod handlers;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PusherError>;

#[derive(Debug, Error)]
pub enum PusherError {
    /// Malformed or unreadable archive
    #[error("Parse error: {0}")]
    Parse(String),

    /// Archive lacks the descriptor or any payload entry
    #[error("Missing required entry: {0}")]
    MissingRequiredEntry(String),

    #[error("checksum mismatch for {name}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    /// Remote endpoint answered with a non-success status
    #[error("Upload error: {0}")]
    Upload(String),

    #[error("operation failed after {attempts} attempts: {last_error}")]
    Exhausted {
        attempts: u32,
        last_error: Box<PusherError>,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("Session error: {0}")]
    Session(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PusherError {
    /// Archive and integrity failures abort a run and are never retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PusherError::Parse(_)
                | PusherError::MissingRequiredEntry(_)
                | PusherError::ChecksumMismatch { .. }
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, PusherError::Cancelled)
    }

    /// Unwraps an `Exhausted` wrapper down to the error that ended the last attempt.
    pub fn root_cause(&self) -> &PusherError {
        match self {
            PusherError::Exhausted { last_error, .. } => last_error.root_cause(),
            other => other,
        }
    }
}

impl From<url::ParseError> for PusherError {
    fn from(err: url::ParseError) -> Self {
        PusherError::Config(format!("invalid URL: {}", err))
    }
}

impl From<tokio::task::JoinError> for PusherError {
    fn from(err: tokio::task::JoinError) -> Self {
        PusherError::Upload(format!("upload worker terminated abnormally: {}", err))
    }
}
