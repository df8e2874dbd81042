//! Key agreement and authenticated encryption primitives.
//!
//! Identities are Ed25519 keypairs. For key agreement the Ed25519 secret
//! scalar is used as an X25519 static secret and the Ed25519 public point is
//! mapped to its Montgomery form, so one identity key serves both purposes.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use ed25519_dalek::VerifyingKey;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};

use rrs_core::{Ed25519PublicKey, Keypair};

use crate::error::{CryptoError, Result};

/// Domain separation context for message keys.
const MESSAGE_KEY_CONTEXT: &str = "rrs-envelope-v1 message key";

/// Nonce length in bytes.
pub const NONCE_LEN: usize = 12;

/// An X25519 public key (32 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct X25519PublicKey(pub [u8; 32]);

impl X25519PublicKey {
    /// Map an Ed25519 identity key to its X25519 form.
    pub fn from_ed25519(public_key: &Ed25519PublicKey) -> Result<Self> {
        let verifying = VerifyingKey::from_bytes(public_key.as_bytes())
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self(verifying.to_montgomery().to_bytes()))
    }

    /// Convert to x25519-dalek PublicKey.
    pub fn to_dalek(&self) -> PublicKey {
        PublicKey::from(self.0)
    }
}

impl From<PublicKey> for X25519PublicKey {
    fn from(pk: PublicKey) -> Self {
        Self(*pk.as_bytes())
    }
}

/// An X25519 static secret derived from an identity keypair.
pub struct X25519StaticSecret(StaticSecret);

impl X25519StaticSecret {
    /// Derive from an Ed25519 identity.
    pub fn from_identity(keypair: &Keypair) -> Self {
        Self(StaticSecret::from(keypair.signing_key().to_scalar_bytes()))
    }

    /// Derive the public key.
    pub fn public_key(&self) -> X25519PublicKey {
        X25519PublicKey::from(PublicKey::from(&self.0))
    }

    /// Perform key agreement with a peer's public key.
    pub fn diffie_hellman(&self, peer_public: &X25519PublicKey) -> SharedKey {
        let shared = self.0.diffie_hellman(&peer_public.to_dalek());
        SharedKey(*shared.as_bytes())
    }
}

/// A shared secret derived from X25519 key agreement.
#[derive(Clone)]
pub struct SharedKey([u8; 32]);

impl SharedKey {
    /// Derive the symmetric message key for this pair of identities.
    pub fn derive_message_key(&self) -> EncryptionKey {
        EncryptionKey(blake3::derive_key(MESSAGE_KEY_CONTEXT, &self.0))
    }
}

/// A 256-bit symmetric encryption key for ChaCha20-Poly1305.
#[derive(Clone)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    /// Encrypt data with this key.
    pub fn encrypt(&self, plaintext: &[u8], nonce: &EncryptionNonce) -> Result<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new_from_slice(&self.0)
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;

        cipher
            .encrypt(Nonce::from_slice(&nonce.0), plaintext)
            .map_err(|e| CryptoError::Encryption(e.to_string()))
    }

    /// Decrypt data with this key.
    pub fn decrypt(&self, ciphertext: &[u8], nonce: &EncryptionNonce) -> Result<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new_from_slice(&self.0)
            .map_err(|e| CryptoError::Decryption(e.to_string()))?;

        cipher
            .decrypt(Nonce::from_slice(&nonce.0), ciphertext)
            .map_err(|e| CryptoError::Decryption(e.to_string()))
    }
}

/// A 96-bit nonce for ChaCha20-Poly1305.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionNonce(pub [u8; NONCE_LEN]);

impl EncryptionNonce {
    /// Generate a new random nonce.
    pub fn generate() -> Self {
        let mut bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; NONCE_LEN]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; NONCE_LEN] {
        &self.0
    }
}

/// Derive the message key shared by `own` and the holder of `peer`.
pub fn message_key(own: &Keypair, peer: &Ed25519PublicKey) -> Result<EncryptionKey> {
    let secret = X25519StaticSecret::from_identity(own);
    let peer_public = X25519PublicKey::from_ed25519(peer)?;
    Ok(secret.diffie_hellman(&peer_public).derive_message_key())
}

#[cfg(test)]
mod tests {
    use super::*;

    impl EncryptionKey {
        fn generate() -> Self {
            let mut bytes = [0u8; 32];
            rand::thread_rng().fill_bytes(&mut bytes);
            Self(bytes)
        }

        fn as_bytes(&self) -> &[u8; 32] {
            &self.0
        }
    }

    #[test]
    fn test_identity_key_agreement_is_symmetric() {
        let alice = Keypair::generate();
        let bob = Keypair::generate();

        let ab = message_key(&alice, &bob.public_key()).unwrap();
        let ba = message_key(&bob, &alice.public_key()).unwrap();

        assert_eq!(ab.as_bytes(), ba.as_bytes());
    }

    #[test]
    fn test_montgomery_mapping_matches_secret() {
        let alice = Keypair::from_seed(&[0x24; 32]);
        let from_secret = X25519StaticSecret::from_identity(&alice).public_key();
        let from_public = X25519PublicKey::from_ed25519(&alice.public_key()).unwrap();
        assert_eq!(from_secret, from_public);
    }

    #[test]
    fn test_third_party_derives_different_key() {
        let alice = Keypair::generate();
        let bob = Keypair::generate();
        let eve = Keypair::generate();

        let ab = message_key(&alice, &bob.public_key()).unwrap();
        let eb = message_key(&eve, &bob.public_key()).unwrap();

        assert_ne!(ab.as_bytes(), eb.as_bytes());
    }

    #[test]
    fn test_encrypt_decrypt() {
        let key = EncryptionKey::generate();
        let nonce = EncryptionNonce::generate();
        let plaintext = b"hello, world!";

        let ciphertext = key.encrypt(plaintext, &nonce).unwrap();
        assert_ne!(ciphertext, plaintext);

        let decrypted = key.decrypt(&ciphertext, &nonce).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_decrypt_wrong_key_fails() {
        let key1 = EncryptionKey::generate();
        let key2 = EncryptionKey::generate();
        let nonce = EncryptionNonce::generate();

        let ciphertext = key1.encrypt(b"secret", &nonce).unwrap();

        assert!(key2.decrypt(&ciphertext, &nonce).is_err());
    }

    #[test]
    fn test_key_derivation_deterministic() {
        let shared = SharedKey([0x42; 32]);
        let key1 = shared.derive_message_key();
        let key2 = shared.derive_message_key();
        assert_eq!(key1.as_bytes(), key2.as_bytes());
        assert_ne!(key1.as_bytes(), &shared.0);
    }
}
