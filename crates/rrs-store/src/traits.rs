//! Remote store contracts.
//!
//! The operator never owns its systems of record. Tickets live in an ERP
//! backend, republished artifacts live on an archival content-addressed
//! node, and device uploads live on a pinning service. Each is reached
//! through one of the traits below so the pipeline can run against the
//! in-memory doubles in [`crate::memory`].

use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use rrs_core::{Address, ContentHash};

use crate::error::Result;

/// A record as exchanged with the ERP backend: field name to JSON value.
pub type Record = Map<String, Value>;

/// Comparison operator of a search condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Exact equality.
    Eq,
    /// Field value is one of a list.
    In,
    /// Case-insensitive substring match.
    ILike,
}

impl Op {
    /// Operator token on the wire.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::In => "in",
            Self::ILike => "ilike",
        }
    }
}

/// One `(field, operator, value)` search term.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub op: Op,
    pub value: Value,
}

impl Condition {
    /// Evaluate against a record held in memory.
    pub fn matches(&self, record: &Record) -> bool {
        let Some(actual) = record.get(&self.field) else {
            return false;
        };
        match self.op {
            Op::Eq => actual == &self.value,
            Op::In => self
                .value
                .as_array()
                .map(|options| options.contains(actual))
                .unwrap_or(false),
            Op::ILike => match (actual.as_str(), self.value.as_str()) {
                (Some(haystack), Some(needle)) => haystack
                    .to_lowercase()
                    .contains(&needle.to_lowercase()),
                _ => false,
            },
        }
    }
}

/// A conjunction of search conditions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Domain(Vec<Condition>);

impl Domain {
    /// An empty domain (matches every record).
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equality condition.
    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.push(field, Op::Eq, value.into());
        self
    }

    /// Add a membership condition.
    pub fn is_in<V: Into<Value>>(mut self, field: &str, values: impl IntoIterator<Item = V>) -> Self {
        let list = values.into_iter().map(Into::into).collect::<Vec<Value>>();
        self.push(field, Op::In, Value::Array(list));
        self
    }

    /// Add a case-insensitive substring condition.
    pub fn ilike(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.push(field, Op::ILike, value.into());
        self
    }

    fn push(&mut self, field: &str, op: Op, value: Value) {
        self.0.push(Condition {
            field: field.to_string(),
            op,
            value,
        });
    }

    /// The conditions of this domain.
    pub fn conditions(&self) -> &[Condition] {
        &self.0
    }

    /// Whether a record satisfies every condition.
    pub fn matches(&self, record: &Record) -> bool {
        self.0.iter().all(|c| c.matches(record))
    }

    /// Wire form: `[[field, op, value], ...]`.
    pub fn to_json(&self) -> Value {
        Value::Array(
            self.0
                .iter()
                .map(|c| {
                    Value::Array(vec![
                        Value::String(c.field.clone()),
                        Value::String(c.op.as_str().to_string()),
                        c.value.clone(),
                    ])
                })
                .collect(),
        )
    }
}

/// Record storage of the ERP backend.
#[async_trait]
pub trait ErpBackend: Send + Sync {
    /// Create a record and return its id.
    async fn create(&self, model: &str, fields: Record) -> Result<i64>;

    /// Read the given fields of a set of records. Unknown ids are skipped.
    async fn read(&self, model: &str, ids: &[i64], fields: &[&str]) -> Result<Vec<Record>>;

    /// Overwrite fields of one record.
    async fn update(&self, model: &str, id: i64, fields: Record) -> Result<bool>;

    /// Ids of records matching a domain, ascending.
    async fn search(&self, model: &str, domain: &Domain) -> Result<Vec<i64>>;

    /// Delete records.
    async fn unlink(&self, model: &str, ids: &[i64]) -> Result<bool>;
}

/// Outcome of removing a pin from the archival node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnpinOutcome {
    Unpinned,
    /// The hash was not pinned; treated as success.
    AlreadyUnpinned,
}

/// The archival content-addressed node.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Add and pin a local file.
    async fn add(&self, path: &Path) -> Result<ContentHash>;

    /// Remove the pin for a hash.
    async fn pin_rm(&self, hash: &ContentHash) -> Result<UnpinOutcome>;

    /// Read the content of a hash.
    async fn cat(&self, hash: &ContentHash) -> Result<Bytes>;
}

/// API credentials scoped to pinning and unpinning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopedApiKey {
    pub key_name: String,
    pub api_key: String,
    pub api_secret: String,
    pub jwt: String,
}

/// The pinning service devices upload to.
#[async_trait]
pub trait PinningService: Send + Sync {
    /// Fetch an object by hash. `Ok(None)` when the gateway answers 404.
    async fn download(&self, hash: &ContentHash) -> Result<Option<Bytes>>;

    /// Fetch a named file inside a directory hash. `Ok(None)` on 404.
    async fn download_file(&self, hash: &ContentHash, name: &str) -> Result<Option<Bytes>>;

    /// Remove a pin.
    async fn unpin(&self, hash: &ContentHash) -> Result<()>;

    /// Issue a key that may only pin and unpin, named after its owner.
    async fn generate_scoped_api_key(&self, owner: &Address) -> Result<ScopedApiKey>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_domain_wire_form() {
        let domain = Domain::new()
            .eq("partner_email", "a@b.c")
            .is_in("stage", ["new", "in_progress"]);
        assert_eq!(
            domain.to_json(),
            json!([["partner_email", "=", "a@b.c"], ["stage", "in", ["new", "in_progress"]]])
        );
    }

    #[test]
    fn test_domain_matches() {
        let ticket = record(json!({
            "partner_email": "a@b.c",
            "stage": "new",
            "description": "Issue from HA: Boiler Error",
        }));

        assert!(Domain::new().matches(&ticket));
        assert!(Domain::new()
            .eq("partner_email", "a@b.c")
            .is_in("stage", ["new", "in_progress"])
            .ilike("description", "boiler error")
            .matches(&ticket));
        assert!(!Domain::new().eq("stage", "done").matches(&ticket));
        assert!(!Domain::new().eq("missing", "x").matches(&ticket));
    }
}
