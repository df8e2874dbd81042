//! Strong type definitions for the RRS operator.
//!
//! Identifiers are newtypes so a ticket id is never mistaken for a record id
//! of another model and an address is never mistaken for a content hash.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::Ed25519PublicKey;
use crate::error::{CoreError, Result};

/// A participant address, derived from an Ed25519 public key.
///
/// The canonical form is 64 lowercase hex characters. A `0x` prefix and
/// upper-case digits are accepted on input and normalized away.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Derive the address of a public key.
    pub fn from_public_key(public_key: &Ed25519PublicKey) -> Self {
        Self(public_key.to_hex())
    }

    /// Parse an address string.
    pub fn parse(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let body = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        if body.len() != 64 || !body.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CoreError::InvalidAddress(s.to_string()));
        }
        Ok(Self(body.to_ascii_lowercase()))
    }

    /// Recover the public key this address was derived from.
    pub fn public_key(&self) -> Result<Ed25519PublicKey> {
        Ed25519PublicKey::from_hex(&self.0).map_err(|_| CoreError::InvalidAddress(self.0.clone()))
    }

    /// The canonical string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", &self.0[..16])
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Address {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A content-addressed storage hash (CID string as returned by the node).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Wrap a hash string returned by a content store.
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    /// The hash as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Heuristic check for CIDv0 (`Qm...`) and base32 CIDv1 (`b...`) strings.
    pub fn looks_like_cid(s: &str) -> bool {
        let v0 = s.len() == 46
            && s.starts_with("Qm")
            && s.chars().all(|c| c.is_ascii_alphanumeric());
        let v1 = s.len() > 50
            && s.starts_with('b')
            && s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
        v0 || v1
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.0)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContentHash {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Id of a `helpdesk.ticket` record in the ERP backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketId(pub i64);

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for TicketId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}
