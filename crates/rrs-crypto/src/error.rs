//! Error types for envelope encryption.

use thiserror::Error;

/// Errors that can occur while sealing or opening envelopes.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The admin address is not a recipient of a multi-recipient envelope.
    #[error("admin address {0} is not a recipient")]
    AdminNotRecipient(String),

    /// A two-tier envelope has no `data` entry.
    #[error("envelope has no data entry")]
    MissingData,

    /// Ciphertext is not valid hex.
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    /// A key could not be used for agreement.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Encryption error.
    #[error("encryption error: {0}")]
    Encryption(String),

    /// Decryption error (tamper, wrong key or truncated input).
    #[error("decryption error: {0}")]
    Decryption(String),

    /// Plaintext is not UTF-8.
    #[error("plaintext is not valid utf-8")]
    InvalidUtf8,

    /// Envelope shape is not recognised.
    #[error("malformed envelope: {0}")]
    Malformed(String),

    /// Core error.
    #[error("core error: {0}")]
    Core(#[from] rrs_core::CoreError),
}

/// Result type for envelope operations.
pub type Result<T> = std::result::Result<T, CryptoError>;
