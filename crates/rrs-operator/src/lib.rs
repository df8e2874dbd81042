//! # RRS Operator
//!
//! Turns encrypted problem reports from Home Assistant devices into helpdesk
//! tickets.
//!
//! ## Overview
//!
//! Devices publish reports on a relay topic. Each report names its sender
//! and references encrypted artifacts (an issue description, logs, traces,
//! pictures) stored on a pinning service. For every report the operator:
//!
//! 1. Resolves the sender's registered e-mail, dropping unknown senders
//! 2. Fetches and decrypts the artifacts, republishing all but the
//!    description to an archival node
//! 3. Classifies the description into ticket descriptions and a priority
//! 4. Creates or continues one ticket per description
//! 5. Keeps the republished pins for paid senders, evicts them otherwise
//! 6. Answers the device with the touched ticket ids
//!
//! ## Key Types
//!
//! - [`MessageIngestor`] - Relay loop, per-sender lanes, report deadlines
//! - [`Operator`] - One report end to end
//! - [`ArtifactStore`] - Fetch, decrypt, republish, retention decision
//! - [`TicketReconciler`] - Ticket upsert, notes, fix suggestions
//! - [`OperatorConfig`] - Environment configuration for the binary
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use rrs_core::{FormatRules, Keypair};
//! use rrs_crypto::CryptoEnvelope;
//! use rrs_operator::{ArtifactConfig, ArtifactStore, Operator, ReconcilerConfig, TicketReconciler};
//! use rrs_store::{MemoryContentStore, MemoryErp, MemoryPinning, PinRetention};
//!
//! async fn example(sender: rrs_core::Address) {
//!     let envelope = Arc::new(CryptoEnvelope::new(Keypair::generate()));
//!     let artifacts = ArtifactStore::new(
//!         envelope,
//!         Arc::new(MemoryPinning::new()),
//!         Arc::new(MemoryContentStore::new()),
//!         Arc::new(PinRetention::new()),
//!         ArtifactConfig::default(),
//!     );
//!     let reconciler = TicketReconciler::new(Arc::new(MemoryErp::new()), ReconcilerConfig::default());
//!     let operator = Operator::new(artifacts, reconciler, FormatRules::default());
//!
//!     let report = serde_json::json!("{\"description\":\"boiler error\"}");
//!     if let Some(outcome) = operator.process_report(&sender, &report).await.unwrap() {
//!         println!("tickets: {:?}", outcome.ticket_ids);
//!     }
//! }
//! ```

pub mod advisor;
pub mod artifacts;
pub mod config;
pub mod error;
pub mod ingestor;
pub mod operator;
pub mod reconciler;

pub use advisor::{FixAdvisor, OpenAiAdvisor, OpenAiConfig};
pub use artifacts::{
    ArtifactConfig, ArtifactStore, RetentionOutcome, SavedArtifact, WorkingDir, LOG_FILE_NAME,
    TRACE_FILE_NAME,
};
pub use config::OperatorConfig;
pub use error::{OperatorError, Result};
pub use ingestor::{IngestorConfig, MessageIngestor};
pub use operator::{Operator, ReportHandler, ReportOutcome};
pub use reconciler::{Reconciliation, ReconcilerConfig, TicketReconciler};

// Re-export component crates
pub use rrs_core as core;
pub use rrs_crypto as crypto;
pub use rrs_relay as relay;
pub use rrs_store as store;
