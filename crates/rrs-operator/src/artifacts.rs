//! Artifact retrieval, decryption and republication.
//!
//! A report references its artifacts in one of three shapes (see
//! [`ReportFormat`]). Whatever the shape, every artifact is decrypted into a
//! per-report temporary directory. The issue description is parsed and kept
//! in memory; every other artifact is republished to the archival node and
//! its hash recorded in [`PinRetention`] until the sender's paid status
//! decides whether the pin stays.
//!
//! ## Fetch Rules
//!
//! - A 404 from the gateway means the artifact is absent, not an error
//! - Transient failures are retried by [`ArtifactConfig::fetch_retry`]
//! - Other failures abort the report
//! - An artifact that fails to decrypt is logged and skipped
//! - A report whose description cannot be recovered is aborted

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde_json::{Map, Value};
use tempfile::TempDir;
use tracing::{debug, error, info, warn};

use rrs_core::{pictures_count, Address, ContentHash, ReportFormat, DESCRIPTION_FILE_NAME};
use rrs_crypto::{CryptoEnvelope, EncryptedContent};
use rrs_store::{Backoff, ContentStore, PinRetention, PinningService, RetryPolicy};

use crate::error::{OperatorError, Result};

/// Home Assistant log file name.
pub const LOG_FILE_NAME: &str = "home-assistant.log";

/// Saved automation traces file name.
pub const TRACE_FILE_NAME: &str = "trace.saved_traces";

/// Configuration for the artifact store.
#[derive(Debug, Clone)]
pub struct ArtifactConfig {
    /// Files fetched from a directory hash, in order. The description must
    /// come first so the picture count is known afterwards.
    pub directory_files: Vec<String>,
    /// Prefix of the `picture<N>` artifacts.
    pub picture_prefix: String,
    /// Retry policy for gateway downloads and archival uploads.
    pub fetch_retry: RetryPolicy,
    /// Retry policy for each eviction.
    pub evict_retry: RetryPolicy,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            directory_files: vec![
                DESCRIPTION_FILE_NAME.to_string(),
                LOG_FILE_NAME.to_string(),
                TRACE_FILE_NAME.to_string(),
            ],
            picture_prefix: "picture".to_string(),
            fetch_retry: RetryPolicy::unbounded_fixed(Duration::from_secs(10)),
            evict_retry: RetryPolicy::bounded(3, Backoff::Fixed(Duration::from_secs(1))),
        }
    }
}

/// An artifact written to the working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedArtifact {
    pub name: String,
    pub path: PathBuf,
    /// Archival hash; `None` for the description, which is never republished.
    pub hash: Option<ContentHash>,
}

/// Decrypted artifacts of one report. The directory is removed on drop.
#[derive(Debug)]
pub struct WorkingDir {
    dir: TempDir,
    issue: Value,
    artifacts: Vec<SavedArtifact>,
}

impl WorkingDir {
    /// Directory holding the decrypted files.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// The decrypted issue description document.
    pub fn issue(&self) -> &Value {
        &self.issue
    }

    /// Every artifact saved, in fetch order.
    pub fn artifacts(&self) -> &[SavedArtifact] {
        &self.artifacts
    }

    /// Hashes of the republished artifacts, in fetch order.
    pub fn republished(&self) -> Vec<ContentHash> {
        self.artifacts
            .iter()
            .filter_map(|a| a.hash.clone())
            .collect()
    }
}

/// What happened to a sender's pending hashes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionOutcome {
    pub kept: usize,
    pub evicted: usize,
    pub failed: usize,
}

/// Fetches report artifacts and manages their pins.
pub struct ArtifactStore {
    envelope: Arc<CryptoEnvelope>,
    pinning: Arc<dyn PinningService>,
    content: Arc<dyn ContentStore>,
    retention: Arc<PinRetention>,
    config: ArtifactConfig,
}

impl ArtifactStore {
    /// Create an artifact store.
    pub fn new(
        envelope: Arc<CryptoEnvelope>,
        pinning: Arc<dyn PinningService>,
        content: Arc<dyn ContentStore>,
        retention: Arc<PinRetention>,
        config: ArtifactConfig,
    ) -> Self {
        Self {
            envelope,
            pinning,
            content,
            retention,
            config,
        }
    }

    /// The retention map this store records into.
    pub fn retention(&self) -> &PinRetention {
        &self.retention
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Fetch
    // ─────────────────────────────────────────────────────────────────────────

    /// Retrieve and decrypt every artifact of a report sent by `sender`.
    pub async fn fetch_and_decrypt(&self, format: &ReportFormat, sender: &Address) -> Result<WorkingDir> {
        debug!(sender = %sender, format = format.name(), "fetching report artifacts");
        let mut fetch = Fetch::new(self, sender)?;

        match format {
            ReportFormat::SingleHash(hash) => {
                let dir = ContentHash::new(hash.clone());
                for name in &self.config.directory_files {
                    if let Some(raw) = self.download_file(&dir, name).await? {
                        fetch.accept(name, &raw).await?;
                    }
                }
                let pictures = fetch.issue.as_ref().map(pictures_count).unwrap_or(0);
                for n in 1..=pictures {
                    let name = format!("{}{}", self.config.picture_prefix, n);
                    if let Some(raw) = self.download_file(&dir, &name).await? {
                        fetch.accept(&name, &raw).await?;
                    }
                }
            }
            ReportFormat::HashMap(entries) => {
                for (name, hash) in entries {
                    let Some(raw) = self.download(hash).await? else {
                        continue;
                    };
                    fetch.accept(name, &raw).await?;
                    if name == DESCRIPTION_FILE_NAME {
                        if let Err(e) = self.pinning.unpin(hash).await {
                            warn!(hash = %hash, error = %e, "could not unpin consumed description");
                        }
                    }
                }
            }
            ReportFormat::Inline { key, payload } => fetch.accept_inline(key, payload),
        }

        fetch.finish()
    }

    async fn download_file(&self, dir: &ContentHash, name: &str) -> Result<Option<Bytes>> {
        let pinning = &self.pinning;
        let found = self
            .config
            .fetch_retry
            .run("download_file", move || pinning.download_file(dir, name))
            .await?;
        if found.is_none() {
            debug!(hash = %dir, file = name, "artifact absent");
        }
        Ok(found)
    }

    async fn download(&self, hash: &ContentHash) -> Result<Option<Bytes>> {
        let pinning = &self.pinning;
        let found = self
            .config
            .fetch_retry
            .run("download", move || pinning.download(hash))
            .await?;
        if found.is_none() {
            debug!(hash = %hash, "artifact absent");
        }
        Ok(found)
    }

    async fn republish(&self, path: &Path) -> Result<ContentHash> {
        let content = &self.content;
        Ok(self
            .config
            .fetch_retry
            .run("add", move || content.add(path))
            .await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Retention
    // ─────────────────────────────────────────────────────────────────────────

    /// Keep or evict everything republished for `sender`.
    ///
    /// The sender's entry is taken in one step, so it is empty afterwards
    /// whatever the outcome of the individual evictions.
    pub async fn settle_retention(&self, sender: &Address, paid: bool) -> RetentionOutcome {
        let hashes = self.retention.take(sender);
        if hashes.is_empty() {
            return RetentionOutcome::default();
        }
        if paid {
            info!(sender = %sender, kept = hashes.len(), "keeping artifacts of paid sender");
            return RetentionOutcome {
                kept: hashes.len(),
                ..RetentionOutcome::default()
            };
        }

        let outcome = self.evict(hashes.iter()).await;
        info!(
            sender = %sender,
            evicted = outcome.evicted,
            failed = outcome.failed,
            "evicted artifacts of unpaid sender"
        );
        outcome
    }

    /// Unpin hashes from the archival node.
    pub async fn release_hashes(&self, hashes: &[ContentHash]) -> RetentionOutcome {
        self.evict(hashes.iter()).await
    }

    async fn evict<'a>(&self, hashes: impl Iterator<Item = &'a ContentHash>) -> RetentionOutcome {
        let mut outcome = RetentionOutcome::default();
        for hash in hashes {
            let content = &self.content;
            match self
                .config
                .evict_retry
                .run("pin_rm", move || content.pin_rm(hash))
                .await
            {
                Ok(_) => outcome.evicted += 1,
                Err(e) => {
                    error!(hash = %hash, error = %e, "eviction failed");
                    outcome.failed += 1;
                }
            }
        }
        outcome
    }
}

/// State of one report's fetch.
struct Fetch<'a> {
    store: &'a ArtifactStore,
    sender: &'a Address,
    dir: TempDir,
    issue: Option<Value>,
    artifacts: Vec<SavedArtifact>,
}

impl<'a> Fetch<'a> {
    fn new(store: &'a ArtifactStore, sender: &'a Address) -> Result<Self> {
        Ok(Self {
            store,
            sender,
            dir: tempfile::Builder::new().prefix("rrs-report-").tempdir()?,
            issue: None,
            artifacts: Vec::new(),
        })
    }

    /// Decrypt one fetched artifact and save it.
    async fn accept(&mut self, name: &str, raw: &[u8]) -> Result<()> {
        let content = EncryptedContent::from_text(&String::from_utf8_lossy(raw));
        let plaintext = match self.store.envelope.decrypt_bytes(&content, self.sender) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                error!(sender = %self.sender, file = name, error = %e, "dropping undecryptable artifact");
                return Ok(());
            }
        };

        let path = self.dir.path().join(sanitize(name));
        tokio::fs::write(&path, &plaintext).await?;

        if name == DESCRIPTION_FILE_NAME {
            match serde_json::from_slice::<Value>(&plaintext) {
                Ok(issue) => self.issue = Some(issue),
                Err(e) => warn!(sender = %self.sender, error = %e, "description is not JSON"),
            }
            self.artifacts.push(SavedArtifact {
                name: name.to_string(),
                path,
                hash: None,
            });
            return Ok(());
        }

        let hash = self.store.republish(&path).await?;
        debug!(sender = %self.sender, file = name, hash = %hash, "republished artifact");
        self.store.retention.record(self.sender, hash.clone());
        self.artifacts.push(SavedArtifact {
            name: name.to_string(),
            path,
            hash: Some(hash),
        });
        Ok(())
    }

    /// Take the description from an inline report.
    ///
    /// A plaintext `{"description": ...}` document is the issue itself;
    /// otherwise the single value is encrypted issue text.
    fn accept_inline(&mut self, key: &str, payload: &Map<String, Value>) {
        if key == "description" {
            self.issue = Some(Value::Object(payload.clone()));
            return;
        }
        let Some(value) = payload.get(key) else {
            return;
        };
        let text = match self.store.envelope.decrypt_value(value, self.sender) {
            Ok(text) => text,
            Err(e) => {
                error!(sender = %self.sender, key, error = %e, "dropping undecryptable inline description");
                return;
            }
        };
        match serde_json::from_str::<Value>(&text) {
            Ok(issue) => self.issue = Some(issue),
            Err(e) => warn!(sender = %self.sender, error = %e, "inline description is not JSON"),
        }
    }

    fn finish(self) -> Result<WorkingDir> {
        let issue = self.issue.ok_or(OperatorError::MissingDescription)?;
        Ok(WorkingDir {
            dir: self.dir,
            issue,
            artifacts: self.artifacts,
        })
    }
}

/// Keep artifact names inside the working directory.
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "artifact".to_string(),
        _ => cleaned,
    }
}
