//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::sync::Arc;

use serde_json::{json, Map, Value};

use rrs_core::{Address, ContentHash, Keypair};
use rrs_crypto::CryptoEnvelope;
use rrs_store::{ErpBackend, MemoryContentStore, MemoryErp, MemoryPinning, PinRetention, Record};

/// Seed of the operator's admin identity.
pub const ADMIN_SEED: [u8; 32] = [7; 32];

/// Seed of the default reporting device.
pub const SENDER_SEED: [u8; 32] = [9; 32];

/// Model holding device registrations.
const REGISTER_MODEL: &str = "rrs.register";

/// An admin identity, a device identity and in-memory remotes.
pub struct TestFixture {
    pub admin: Keypair,
    pub sender: Keypair,
    /// Envelope handler of the admin, as used by the operator.
    pub envelope: Arc<CryptoEnvelope>,
    pub erp: Arc<MemoryErp>,
    pub content: Arc<MemoryContentStore>,
    pub pinning: Arc<MemoryPinning>,
    pub retention: Arc<PinRetention>,
}

impl TestFixture {
    /// Create a fixture with deterministic identities.
    pub fn new() -> Self {
        Self::with_seeds(ADMIN_SEED, SENDER_SEED)
    }

    /// Create with explicit admin and sender seeds.
    pub fn with_seeds(admin: [u8; 32], sender: [u8; 32]) -> Self {
        let admin = Keypair::from_seed(&admin);
        Self {
            envelope: Arc::new(CryptoEnvelope::new(admin.clone())),
            admin,
            sender: Keypair::from_seed(&sender),
            erp: Arc::new(MemoryErp::new()),
            content: Arc::new(MemoryContentStore::new()),
            pinning: Arc::new(MemoryPinning::new()),
            retention: Arc::new(PinRetention::new()),
        }
    }

    /// Address of the admin identity.
    pub fn admin_address(&self) -> Address {
        self.admin.address()
    }

    /// Address of the default device.
    pub fn sender_address(&self) -> Address {
        self.sender.address()
    }

    /// Register the default device under `email`.
    pub async fn register(&self, email: &str, paid: bool) -> i64 {
        let sender = self.sender_address();
        self.register_as(&sender, &sender, email, paid).await
    }

    /// Register a device whose controller and owner addresses differ.
    pub async fn register_as(
        &self,
        controller: &Address,
        owner: &Address,
        email: &str,
        paid: bool,
    ) -> i64 {
        let record = json!({
            "controller_address": controller.as_str(),
            "owner_address": owner.as_str(),
            "customer_email": email,
            "subscription": paid,
        });
        self.erp
            .create(REGISTER_MODEL, as_record(record))
            .await
            .expect("memory create never fails without injected faults")
    }

    /// Seal `plaintext` from the default device to the admin, single tier.
    pub fn seal_for_admin(&self, plaintext: &[u8]) -> String {
        CryptoEnvelope::new(self.sender.clone())
            .encrypt_single(plaintext, &self.admin_address())
            .expect("admin address is valid")
    }

    /// Seal `plaintext` from the default device to the admin and `others`.
    pub fn seal_two_tier(&self, plaintext: &[u8], others: &[Address]) -> Map<String, Value> {
        let mut recipients = vec![self.admin_address()];
        recipients.extend_from_slice(others);
        CryptoEnvelope::new(self.sender.clone())
            .encrypt_for(plaintext, &recipients)
            .expect("session seal never fails")
    }

    /// Publish encrypted files under a directory hash on the pinning service.
    pub fn publish_directory(&self, dir: &ContentHash, files: &[(&str, &[u8])]) {
        for (name, content) in files {
            self.pinning.put_file(dir, name, self.seal_for_admin(content));
        }
    }

    /// Publish one encrypted object on the pinning service.
    pub fn publish(&self, hash: &ContentHash, content: &[u8]) {
        self.pinning.put(hash, self.seal_for_admin(content));
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Issue document with a plain description and optional picture count.
pub fn issue(description: &str, pictures: u32) -> Vec<u8> {
    let mut document = json!({ "description": description });
    if pictures > 0 {
        document["pictures_count"] = json!(pictures);
    }
    document.to_string().into_bytes()
}

fn as_record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        _ => Record::new(),
    }
}
