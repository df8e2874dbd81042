//! Error types for the RRS core.

use thiserror::Error;

/// Core errors raised while parsing identities or classifying reports.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("invalid seed: {0}")]
    InvalidSeed(String),

    #[error("malformed issue: {0}")]
    MalformedIssue(String),

    #[error("decoding error: {0}")]
    DecodingError(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
