//! # RRS Testkit
//!
//! Testing utilities for the RRS operator.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: an admin and a device identity wired to the in-memory
//!   ERP, archival node and pinning service, plus helpers to register a
//!   device and publish encrypted artifacts the way devices do
//! - **Generators**: Proptest strategies for identities and issue documents
//!
//! ## Test Fixtures
//!
//! ```rust
//! use rrs_testkit::fixtures::TestFixture;
//! use rrs_core::ContentHash;
//!
//! let fixture = TestFixture::new();
//! let dir = ContentHash::from("QmReportDirectory");
//! fixture.publish_directory(&dir, &[("home-assistant.log", b"boot ok".as_slice())]);
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use rrs_testkit::generators::issue_text;
//!
//! proptest! {
//!     #[test]
//!     fn classifies_any_issue(text in issue_text()) {
//!         prop_assert!(rrs_core::ProblemReport::from_json(&text).is_ok());
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{issue, TestFixture, ADMIN_SEED, SENDER_SEED};
pub use generators::{address, description, issue_text, keypair, star_list};
