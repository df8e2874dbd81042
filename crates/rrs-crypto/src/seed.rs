//! Ephemeral session seeds.
//!
//! A multi-recipient envelope is encrypted once for a one-time keypair. The
//! 32-byte seed of that keypair travels to each recipient as hex text,
//! sealed under the recipient's identity key.

use rand::RngCore;

use rrs_core::Keypair;

use crate::error::Result;

/// Seed of a one-time session keypair.
#[derive(Clone, PartialEq, Eq)]
pub struct EphemeralSeed([u8; 32]);

impl EphemeralSeed {
    /// Generate a fresh random seed.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// The text form shared with recipients.
    pub fn to_text(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// Parse the text form.
    pub fn from_text(text: &str) -> Result<Self> {
        let keypair = Keypair::from_seed_hex(text)?;
        Ok(Self(keypair.seed()))
    }

    /// The session keypair for this seed.
    pub fn keypair(&self) -> Keypair {
        Keypair::from_seed(&self.0)
    }
}

impl std::fmt::Debug for EphemeralSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EphemeralSeed(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_form_restores_same_keypair() {
        let seed = EphemeralSeed::generate();
        let restored = EphemeralSeed::from_text(&seed.to_text()).unwrap();
        assert_eq!(seed, restored);
        assert_eq!(seed.keypair().public_key(), restored.keypair().public_key());
    }

    #[test]
    fn test_bad_text_rejected() {
        assert!(EphemeralSeed::from_text("0xabc").is_err());
        assert!(EphemeralSeed::from_text("").is_err());
    }
}
