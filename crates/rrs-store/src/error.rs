//! Error types for the store module.

use thiserror::Error;

/// Errors that can occur while talking to a remote store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection, timeout or body read failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Non-success HTTP status.
    #[error("http status {status}: {body}")]
    Http { status: u16, body: String },

    /// The remote procedure returned a fault.
    #[error("rpc fault: {0}")]
    Rpc(String),

    /// Credentials were rejected.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Record or object not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Response could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether the failure is transient and the call may be repeated.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Rpc(_) => true,
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            Self::Unauthorized(_) | Self::NotFound(_) | Self::Serialization(_) | Self::Io(_) => {
                false
            }
        }
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Serialization(e.to_string())
        } else if let Some(status) = e.status() {
            Self::Http {
                status: status.as_u16(),
                body: e.to_string(),
            }
        } else {
            Self::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
