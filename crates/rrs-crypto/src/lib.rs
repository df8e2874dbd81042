//! # RRS Crypto
//!
//! End-to-end encryption of device reports and operator replies.
//!
//! ## Overview
//!
//! Devices seal reports for the operator's admin identity. Small payloads are
//! sealed directly (single tier). Payloads for several recipients are sealed
//! once for a one-time session keypair whose seed is shared with every
//! recipient (two tier).
//!
//! ## Key Types
//!
//! - [`CryptoEnvelope`] - Opens and seals envelopes for the admin identity
//! - [`EncryptedContent`] - The two accepted envelope shapes
//! - [`MessageCipher`] / [`X25519ChaCha`] - Pairwise cipher seam
//! - [`EphemeralSeed`] - One-time session seed
//!
//! ## Encryption Model
//!
//! 1. **Message key**: X25519 agreement between the two Ed25519 identities,
//!    passed through BLAKE3 `derive_key`
//! 2. **Payload**: ChaCha20-Poly1305 with a fresh 96-bit nonce per message
//!
//! ## Usage
//!
//! ```rust,no_run
//! use rrs_core::Keypair;
//! use rrs_crypto::{CryptoEnvelope, EncryptedContent};
//!
//! let admin = CryptoEnvelope::new(Keypair::generate());
//! let device = CryptoEnvelope::new(Keypair::generate());
//!
//! let sealed = device.encrypt_for(b"boiler error", &[admin.admin_address()]).unwrap();
//! let text = admin
//!     .decrypt(&EncryptedContent::TwoTier(sealed), &device.admin_address())
//!     .unwrap();
//! assert_eq!(text, "boiler error");
//! ```

pub mod cipher;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod seed;

pub use cipher::{MessageCipher, X25519ChaCha};
pub use crypto::{EncryptionKey, EncryptionNonce, SharedKey, X25519PublicKey, X25519StaticSecret};
pub use envelope::{decode_hex, encode_hex, CryptoEnvelope, EncryptedContent, DATA_KEY};
pub use error::{CryptoError, Result};
pub use seed::EphemeralSeed;
