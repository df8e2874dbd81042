//! Two-tier message envelopes.
//!
//! Content arrives in one of two shapes:
//!
//! - **Single tier**: a hex string sealed directly from the sender to the
//!   admin identity.
//! - **Two tier**: a JSON object `{recipient: seal(seed), ..., "data": seal(payload)}`.
//!   The payload is sealed once for a one-time session keypair; the session
//!   seed is sealed separately for every recipient.
//!
//! Ciphertext is lowercase hex with a `0x` prefix. The prefix is optional on
//! input.

use serde_json::{Map, Value};
use tracing::{debug, error};

use rrs_core::{Address, Keypair};

use crate::cipher::{MessageCipher, X25519ChaCha};
use crate::error::{CryptoError, Result};
use crate::seed::EphemeralSeed;

/// Key of the payload entry in a two-tier envelope.
pub const DATA_KEY: &str = "data";

/// Encrypted content in one of the two accepted shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum EncryptedContent {
    /// Hex ciphertext sealed directly for the admin.
    SingleTier(String),
    /// Per-recipient seed shares plus a `data` entry.
    TwoTier(Map<String, Value>),
}

impl EncryptedContent {
    /// Interpret a JSON value as encrypted content.
    ///
    /// A string that parses as a JSON object is the two-tier object.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::String(s) => Ok(Self::from_text(s)),
            Value::Object(map) => Ok(Self::TwoTier(map.clone())),
            other => Err(CryptoError::Malformed(format!(
                "expected string or object, got {other}"
            ))),
        }
    }

    /// Interpret raw text as encrypted content.
    pub fn from_text(text: &str) -> Self {
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Self::TwoTier(map),
            _ => Self::SingleTier(text.trim().to_string()),
        }
    }
}

/// Encode ciphertext as `0x`-prefixed lowercase hex.
pub fn encode_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Decode hex ciphertext, with or without the `0x` prefix.
pub fn decode_hex(text: &str) -> Result<Vec<u8>> {
    let text = text.trim();
    let body = text.strip_prefix("0x").unwrap_or(text);
    hex::decode(body).map_err(|e| CryptoError::InvalidHex(e.to_string()))
}

/// Opens and seals envelopes on behalf of the admin identity.
pub struct CryptoEnvelope<C = X25519ChaCha> {
    admin: Keypair,
    cipher: C,
}

impl CryptoEnvelope<X25519ChaCha> {
    /// Envelope handler with the default cipher.
    pub fn new(admin: Keypair) -> Self {
        Self::with_cipher(admin, X25519ChaCha)
    }
}

impl<C: MessageCipher> CryptoEnvelope<C> {
    /// Envelope handler with a custom cipher.
    pub fn with_cipher(admin: Keypair, cipher: C) -> Self {
        Self { admin, cipher }
    }

    /// Address of the admin identity.
    pub fn admin_address(&self) -> Address {
        self.admin.address()
    }

    /// Decrypt content sent by `sender` into UTF-8 text.
    pub fn decrypt(&self, content: &EncryptedContent, sender: &Address) -> Result<String> {
        let bytes = self.decrypt_bytes(content, sender)?;
        String::from_utf8(bytes).map_err(|_| CryptoError::InvalidUtf8)
    }

    /// Decrypt a JSON value (string or object) sent by `sender`.
    pub fn decrypt_value(&self, value: &Value, sender: &Address) -> Result<String> {
        self.decrypt(&EncryptedContent::from_value(value)?, sender)
    }

    /// Decrypt content sent by `sender` into raw bytes.
    pub fn decrypt_bytes(&self, content: &EncryptedContent, sender: &Address) -> Result<Vec<u8>> {
        let sender_key = sender.public_key()?;
        match content {
            EncryptedContent::SingleTier(hex) => {
                debug!(sender = %sender, "opening single-tier envelope");
                self.cipher.open(&self.admin, &sender_key, &decode_hex(hex)?)
            }
            EncryptedContent::TwoTier(map) => {
                debug!(sender = %sender, recipients = map.len().saturating_sub(1), "opening two-tier envelope");
                let share = self
                    .own_share(map)
                    .ok_or_else(|| CryptoError::AdminNotRecipient(self.admin.address().to_string()))?;
                let seed_text = self.cipher.open(&self.admin, &sender_key, &decode_hex(share)?)?;
                let seed_text = String::from_utf8(seed_text).map_err(|_| CryptoError::InvalidUtf8)?;
                let session = EphemeralSeed::from_text(&seed_text)?.keypair();

                let data = map
                    .get(DATA_KEY)
                    .and_then(Value::as_str)
                    .ok_or(CryptoError::MissingData)?;
                self.cipher.open(&session, &sender_key, &decode_hex(data)?)
            }
        }
    }

    fn own_share<'a>(&self, map: &'a Map<String, Value>) -> Option<&'a str> {
        let admin = self.admin.address();
        map.iter()
            .filter(|(key, _)| key.as_str() != DATA_KEY)
            .find(|(key, _)| Address::parse(key).map(|a| a == admin).unwrap_or(false))
            .and_then(|(_, value)| value.as_str())
    }

    /// Seal `plaintext` directly for one recipient.
    pub fn encrypt_single(&self, plaintext: &[u8], recipient: &Address) -> Result<String> {
        let sealed = self.cipher.seal(&self.admin, &recipient.public_key()?, plaintext)?;
        Ok(encode_hex(&sealed))
    }

    /// Seal `plaintext` for a set of recipients as a two-tier object.
    ///
    /// Recipients whose key cannot be used are logged and left out.
    pub fn encrypt_for(&self, plaintext: &[u8], recipients: &[Address]) -> Result<Map<String, Value>> {
        let seed = EphemeralSeed::generate();
        let session = seed.keypair();
        let seed_text = seed.to_text();

        let mut out = Map::new();
        for recipient in recipients {
            let share = recipient
                .public_key()
                .map_err(CryptoError::from)
                .and_then(|key| self.cipher.seal(&self.admin, &key, seed_text.as_bytes()));
            match share {
                Ok(sealed) => {
                    out.insert(recipient.to_string(), Value::String(encode_hex(&sealed)));
                }
                Err(e) => error!(recipient = %recipient, error = %e, "skipping recipient"),
            }
        }

        let data = self.cipher.seal(&self.admin, &session.public_key(), plaintext)?;
        out.insert(DATA_KEY.to_string(), Value::String(encode_hex(&data)));
        Ok(out)
    }
}
