//! # RRS Store
//!
//! Contracts and clients for the remote systems the operator depends on.
//!
//! ## Overview
//!
//! The operator keeps no durable state of its own. Tickets live in the ERP
//! backend, republished artifacts on an archival content-addressed node, and
//! device uploads on a pinning service. This crate defines one async trait per
//! remote, a thin HTTP client for each, and in-memory doubles for tests.
//!
//! ## Key Types
//!
//! - [`ErpBackend`] / [`OdooClient`] / [`MemoryErp`] - Record storage
//! - [`ContentStore`] / [`IpfsClient`] / [`MemoryContentStore`] - Archival node
//! - [`PinningService`] / [`PinataClient`] / [`MemoryPinning`] - Device uploads
//! - [`RetryPolicy`] - Repeats transient remote failures
//! - [`PinRetention`] - Republished hashes awaiting a keep/evict decision
//!
//! ## Design Notes
//!
//! - **Absent is not an error**: a 404 from a gateway is `Ok(None)`
//! - **Transient vs permanent**: [`StoreError::is_retryable`] drives retries
//! - **Idempotent unpin**: an already-unpinned hash is a success

pub mod error;
pub mod ipfs;
pub mod memory;
pub mod odoo;
pub mod pinata;
pub mod retention;
pub mod retry;
pub mod traits;

pub use error::{Result, StoreError};
pub use ipfs::IpfsClient;
pub use memory::{DownloadRequest, Faults, MemoryContentStore, MemoryErp, MemoryPinning};
pub use odoo::{OdooClient, OdooConfig};
pub use pinata::{PinataClient, PinataConfig};
pub use retention::PinRetention;
pub use retry::{Backoff, RetryPolicy};
pub use traits::{
    Condition, ContentStore, Domain, ErpBackend, Op, PinningService, Record, ScopedApiKey,
    UnpinOutcome,
};
