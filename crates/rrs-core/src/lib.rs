//! # RRS Core
//!
//! Pure primitives for the RRS operator: identities, identifiers, and the
//! rules that classify an incoming diagnostic report.
//!
//! This crate contains no I/O, no storage, no networking. It is pure computation
//! over report payloads and key material.
//!
//! ## Key Types
//!
//! - [`Keypair`] / [`Ed25519PublicKey`] - Long-term identity keys
//! - [`Address`] - Public-key-derived participant address
//! - [`ContentHash`] - Content-addressed artifact identifier
//! - [`TicketId`] - ERP ticket record id
//! - [`ReportFormat`] - How a report references its artifacts
//! - [`ProblemReport`] - Descriptions, priority and source of a decrypted issue
//!
//! ## Classification
//!
//! Reports are classified twice. The *format type* decides how artifacts are
//! fetched (see [`format`]); the *problem type* decides how the decrypted
//! description turns into tickets (see [`issue`]).

pub mod crypto;
pub mod error;
pub mod format;
pub mod issue;
pub mod types;

pub use crypto::{Ed25519PublicKey, Keypair};
pub use error::{CoreError, Result};
pub use format::{FormatRules, ReportFormat, SingleKeyRule, DESCRIPTION_FILE_NAME};
pub use issue::{pictures_count, DedupKey, Priority, ProblemReport, ProblemType, DEVICES_SOURCE};
pub use types::{Address, ContentHash, TicketId};
