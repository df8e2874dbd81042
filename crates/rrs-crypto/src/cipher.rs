//! Pairwise message cipher.
//!
//! A [`MessageCipher`] seals bytes from one identity to another. Either side
//! of the pair can open what the other sealed: `open(bob, alice_pub, ..)`
//! reverses `seal(alice, bob_pub, ..)`.

use rrs_core::{Ed25519PublicKey, Keypair};

use crate::crypto::{message_key, EncryptionNonce, NONCE_LEN};
use crate::error::{CryptoError, Result};

/// Seals and opens byte strings between two identities.
pub trait MessageCipher: Send + Sync {
    /// Encrypt `plaintext` from `own` to the holder of `peer`.
    fn seal(&self, own: &Keypair, peer: &Ed25519PublicKey, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Decrypt bytes exchanged between `own` and the holder of `peer`.
    fn open(&self, own: &Keypair, peer: &Ed25519PublicKey, ciphertext: &[u8]) -> Result<Vec<u8>>;
}

/// X25519 agreement + ChaCha20-Poly1305. Wire bytes are `nonce || ciphertext+tag`.
#[derive(Debug, Clone, Copy, Default)]
pub struct X25519ChaCha;

impl MessageCipher for X25519ChaCha {
    fn seal(&self, own: &Keypair, peer: &Ed25519PublicKey, plaintext: &[u8]) -> Result<Vec<u8>> {
        let key = message_key(own, peer)?;
        let nonce = EncryptionNonce::generate();
        let ciphertext = key.encrypt(plaintext, &nonce)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(nonce.as_bytes());
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn open(&self, own: &Keypair, peer: &Ed25519PublicKey, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < NONCE_LEN {
            return Err(CryptoError::Decryption(format!(
                "ciphertext too short: {} bytes",
                ciphertext.len()
            )));
        }
        let (nonce_bytes, body) = ciphertext.split_at(NONCE_LEN);
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(nonce_bytes);

        let key = message_key(own, peer)?;
        key.decrypt(body, &EncryptionNonce::from_bytes(nonce))
    }
}
