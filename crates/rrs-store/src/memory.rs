//! In-memory implementations of the remote store traits.
//!
//! These are primarily for testing. They follow the remote semantics closely
//! enough for the pipeline to run end to end, record the calls they receive,
//! and accept injected faults so retry and failure paths can be exercised.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::{Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use rrs_core::{Address, ContentHash};

use crate::error::{Result, StoreError};
use crate::traits::{
    ContentStore, Domain, ErpBackend, PinningService, Record, ScopedApiKey, UnpinOutcome,
};

/// Queue of errors returned by the next calls, one per call.
#[derive(Debug, Default)]
pub struct Faults(Mutex<VecDeque<StoreError>>);

impl Faults {
    /// Fail the next call with `error`.
    pub fn push(&self, error: StoreError) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).push_back(error);
    }

    fn check(&self) -> Result<()> {
        match self.0.lock().unwrap_or_else(PoisonError::into_inner).pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ERP
// ─────────────────────────────────────────────────────────────────────────────

/// In-memory ERP backend.
///
/// Records are kept per model with sequential ids starting at 1. Each
/// stored record carries its own `id` field.
#[derive(Debug)]
pub struct MemoryErp {
    inner: RwLock<ErpInner>,
    /// Faults returned by the next calls of any operation.
    pub faults: Faults,
}

#[derive(Debug, Default)]
struct ErpInner {
    next_id: i64,
    models: HashMap<String, BTreeMap<i64, Record>>,
    calls: usize,
}

impl MemoryErp {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(ErpInner {
                next_id: 1,
                ..ErpInner::default()
            }),
            faults: Faults::default(),
        }
    }

    /// All records of a model, ascending by id.
    pub fn records(&self, model: &str) -> Vec<Record> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .models
            .get(model)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default()
    }

    /// One record by id.
    pub fn record(&self, model: &str, id: i64) -> Option<Record> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.models.get(model).and_then(|records| records.get(&id)).cloned()
    }

    /// Number of calls received, including failed ones.
    pub fn call_count(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).calls
    }

    fn begin(&self) -> Result<()> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner).calls += 1;
        self.faults.check()
    }
}

impl Default for MemoryErp {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ErpBackend for MemoryErp {
    async fn create(&self, model: &str, mut fields: Record) -> Result<i64> {
        self.begin()?;
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let id = inner.next_id;
        inner.next_id += 1;
        fields.insert("id".to_string(), Value::from(id));
        inner.models.entry(model.to_string()).or_default().insert(id, fields);
        Ok(id)
    }

    async fn read(&self, model: &str, ids: &[i64], fields: &[&str]) -> Result<Vec<Record>> {
        self.begin()?;
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let Some(records) = inner.models.get(model) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| records.get(id))
            .map(|record| {
                if fields.is_empty() {
                    return record.clone();
                }
                record
                    .iter()
                    .filter(|(name, _)| name.as_str() == "id" || fields.contains(&name.as_str()))
                    .map(|(name, value)| (name.clone(), value.clone()))
                    .collect()
            })
            .collect())
    }

    async fn update(&self, model: &str, id: i64, fields: Record) -> Result<bool> {
        self.begin()?;
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let record = inner
            .models
            .get_mut(model)
            .and_then(|records| records.get_mut(&id))
            .ok_or_else(|| StoreError::NotFound(format!("{model}/{id}")))?;
        record.extend(fields);
        Ok(true)
    }

    async fn search(&self, model: &str, domain: &Domain) -> Result<Vec<i64>> {
        self.begin()?;
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(inner
            .models
            .get(model)
            .map(|records| {
                records
                    .iter()
                    .filter(|(_, record)| domain.matches(record))
                    .map(|(id, _)| *id)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn unlink(&self, model: &str, ids: &[i64]) -> Result<bool> {
        self.begin()?;
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let Some(records) = inner.models.get_mut(model) else {
            return Ok(false);
        };
        let mut removed = false;
        for id in ids {
            removed |= records.remove(id).is_some();
        }
        Ok(removed)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Content store
// ─────────────────────────────────────────────────────────────────────────────

/// In-memory archival node.
#[derive(Debug, Default)]
pub struct MemoryContentStore {
    inner: RwLock<ContentInner>,
    /// Faults returned by the next `add` calls.
    pub add_faults: Faults,
}

#[derive(Debug, Default)]
struct ContentInner {
    objects: HashMap<ContentHash, Bytes>,
    pinned: BTreeSet<ContentHash>,
    failing_unpins: BTreeSet<ContentHash>,
    unpin_calls: Vec<ContentHash>,
}

impl MemoryContentStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fake CID derived from content.
    pub fn hash_of(content: &[u8]) -> ContentHash {
        let mut hasher = DefaultHasher::new();
        content.hash(&mut hasher);
        ContentHash::new(format!("Qm{:0>44x}", hasher.finish()))
    }

    /// Make every `pin_rm` for `hash` fail with a server error.
    pub fn fail_unpin(&self, hash: &ContentHash) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .failing_unpins
            .insert(hash.clone());
    }

    /// Currently pinned hashes.
    pub fn pinned(&self) -> BTreeSet<ContentHash> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).pinned.clone()
    }

    /// Every hash `pin_rm` was called with, in order.
    pub fn unpin_calls(&self) -> Vec<ContentHash> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .unpin_calls
            .clone()
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn add(&self, path: &Path) -> Result<ContentHash> {
        self.add_faults.check()?;
        let content = Bytes::from(tokio::fs::read(path).await?);
        let hash = Self::hash_of(&content);
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.objects.insert(hash.clone(), content);
        inner.pinned.insert(hash.clone());
        Ok(hash)
    }

    async fn pin_rm(&self, hash: &ContentHash) -> Result<UnpinOutcome> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.unpin_calls.push(hash.clone());
        if inner.failing_unpins.contains(hash) {
            return Err(StoreError::Http {
                status: 500,
                body: format!("cannot unpin {hash}"),
            });
        }
        if inner.pinned.remove(hash) {
            Ok(UnpinOutcome::Unpinned)
        } else {
            Ok(UnpinOutcome::AlreadyUnpinned)
        }
    }

    async fn cat(&self, hash: &ContentHash) -> Result<Bytes> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .objects
            .get(hash)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(hash.to_string()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pinning service
// ─────────────────────────────────────────────────────────────────────────────

/// A download request seen by [`MemoryPinning`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub hash: ContentHash,
    /// File name inside a directory hash, if any.
    pub name: Option<String>,
}

/// In-memory pinning service and gateway.
#[derive(Debug, Default)]
pub struct MemoryPinning {
    inner: RwLock<PinningInner>,
    /// Faults returned by the next download calls.
    pub download_faults: Faults,
}

#[derive(Debug, Default)]
struct PinningInner {
    objects: HashMap<ContentHash, Bytes>,
    directories: HashMap<(ContentHash, String), Bytes>,
    requests: Vec<DownloadRequest>,
    unpinned: Vec<ContentHash>,
    issued_keys: Vec<ScopedApiKey>,
}

impl MemoryPinning {
    /// Create an empty service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish an object under a hash.
    pub fn put(&self, hash: &ContentHash, content: impl Into<Bytes>) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .objects
            .insert(hash.clone(), content.into());
    }

    /// Publish a named file inside a directory hash.
    pub fn put_file(&self, dir: &ContentHash, name: &str, content: impl Into<Bytes>) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .directories
            .insert((dir.clone(), name.to_string()), content.into());
    }

    /// Download requests received, in order.
    pub fn requests(&self) -> Vec<DownloadRequest> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).requests.clone()
    }

    /// Hashes unpinned, in order.
    pub fn unpinned(&self) -> Vec<ContentHash> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).unpinned.clone()
    }

    /// Keys issued so far.
    pub fn issued_keys(&self) -> Vec<ScopedApiKey> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .issued_keys
            .clone()
    }

    fn note_request(&self, hash: &ContentHash, name: Option<&str>) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .requests
            .push(DownloadRequest {
                hash: hash.clone(),
                name: name.map(String::from),
            });
    }
}

#[async_trait]
impl PinningService for MemoryPinning {
    async fn download(&self, hash: &ContentHash) -> Result<Option<Bytes>> {
        self.note_request(hash, None);
        self.download_faults.check()?;
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(inner.objects.get(hash).cloned())
    }

    async fn download_file(&self, hash: &ContentHash, name: &str) -> Result<Option<Bytes>> {
        self.note_request(hash, Some(name));
        self.download_faults.check()?;
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(inner.directories.get(&(hash.clone(), name.to_string())).cloned())
    }

    async fn unpin(&self, hash: &ContentHash) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.objects.remove(hash);
        inner.unpinned.push(hash.clone());
        Ok(())
    }

    async fn generate_scoped_api_key(&self, owner: &Address) -> Result<ScopedApiKey> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let n = inner.issued_keys.len();
        let key = ScopedApiKey {
            key_name: owner.to_string(),
            api_key: format!("key-{n}"),
            api_secret: format!("secret-{n}"),
            jwt: format!("jwt-{n}"),
        };
        inner.issued_keys.push(key.clone());
        Ok(key)
    }
}
