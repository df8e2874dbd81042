//! Error types for the operator.

use std::time::Duration;

use rrs_core::CoreError;
use rrs_crypto::CryptoError;
use rrs_relay::RelayError;
use rrs_store::StoreError;
use thiserror::Error;

/// Errors that can occur while processing a report.
#[derive(Debug, Error)]
pub enum OperatorError {
    /// Malformed identity or issue document.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Envelope could not be opened or sealed.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// A remote store call failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The relay connection failed.
    #[error("relay error: {0}")]
    Relay(#[from] RelayError),

    /// Neither a fetched nor an inline description could be recovered.
    #[error("report carries no readable issue description")]
    MissingDescription,

    /// Working directory I/O failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The report ran past its deadline.
    #[error("report timed out after {0:?}")]
    Timeout(Duration),

    /// The fix advisor could not produce a suggestion.
    #[error("advisor error: {0}")]
    Advisor(String),
}

/// Result type for operator operations.
pub type Result<T> = std::result::Result<T, OperatorError>;
