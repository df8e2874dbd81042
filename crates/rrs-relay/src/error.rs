//! Error types for the relay module.

use thiserror::Error;

/// Errors that can occur on the relay connection or the event subscription.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(String),

    /// The transport has shut down and will deliver nothing more.
    #[error("relay closed")]
    Closed,

    /// Message could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Subscription call failed.
    #[error("subscription error: {0}")]
    Subscription(String),
}

/// Result type for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;
