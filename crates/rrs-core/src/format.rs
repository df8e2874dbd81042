//! Report format types.
//!
//! A report's `report` field references its artifacts in one of three ways:
//!
//! | Payload                                   | Format                      |
//! |-------------------------------------------|-----------------------------|
//! | not a JSON object                         | [`ReportFormat::SingleHash`] |
//! | JSON object with exactly one key          | [`ReportFormat::Inline`]     |
//! | JSON object with more than one key        | [`ReportFormat::HashMap`]    |
//!
//! The single-key case is ambiguous: devices have sent both an inline
//! description (`{"issue_description.json": <ciphertext>}`) and a one-entry
//! hash map (`{"issue_description.json": "Qm..."}`). [`SingleKeyRule`] makes
//! the choice explicit.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::ContentHash;

/// Name of the metadata/description artifact.
pub const DESCRIPTION_FILE_NAME: &str = "issue_description.json";

/// How to interpret a report object with exactly one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SingleKeyRule {
    /// Always inline: the single value is the description payload.
    #[default]
    Inline,
    /// Inline unless the single value looks like a content hash, in which
    /// case the report is a one-entry hash map.
    InspectValue,
}

/// Rules for format-type dispatch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormatRules {
    /// Interpretation of single-key report objects.
    #[serde(default)]
    pub single_key: SingleKeyRule,
}

/// How a report references its artifacts.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportFormat {
    /// A directory hash; artifacts are fetched by well-known file names.
    SingleHash(String),
    /// The description payload is carried inline, nothing to fetch.
    Inline {
        /// The single key of the report object.
        key: String,
        /// The report object itself.
        payload: Map<String, Value>,
    },
    /// Explicit `{file_name: hash}` listing; only these files are fetched.
    HashMap(BTreeMap<String, ContentHash>),
}

impl ReportFormat {
    /// Classify a report payload.
    ///
    /// A string payload that parses as a JSON object is classified as that
    /// object; any other string is a single hash.
    pub fn detect(report: &Value, rules: &FormatRules) -> Self {
        match report {
            Value::Object(map) => Self::from_object(map, rules),
            Value::String(s) => match serde_json::from_str::<Value>(s) {
                Ok(Value::Object(map)) => Self::from_object(&map, rules),
                _ => Self::SingleHash(s.trim().to_string()),
            },
            other => Self::SingleHash(other.to_string()),
        }
    }

    fn from_object(map: &Map<String, Value>, rules: &FormatRules) -> Self {
        if let (1, Some((key, value))) = (map.len(), map.iter().next()) {
            let is_hash = matches!(value, Value::String(s) if ContentHash::looks_like_cid(s));
            if rules.single_key == SingleKeyRule::InspectValue && is_hash {
                return Self::HashMap(Self::hash_entries(map));
            }
            return Self::Inline {
                key: key.clone(),
                payload: map.clone(),
            };
        }
        Self::HashMap(Self::hash_entries(map))
    }

    fn hash_entries(map: &Map<String, Value>) -> BTreeMap<String, ContentHash> {
        map.iter()
            .filter_map(|(name, value)| value.as_str().map(|h| (name.clone(), ContentHash::from(h))))
            .collect()
    }

    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SingleHash(_) => "single-hash",
            Self::Inline { .. } => "inline",
            Self::HashMap(_) => "hash-map",
        }
    }
}
