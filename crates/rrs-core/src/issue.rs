//! Problem types of a decrypted issue.
//!
//! The description file of a report is JSON of the form
//!
//! ```json
//! {"description": "boiler error"}
//! {"description": {"type": "warnings", "description": "a*b", "source": "automation"}}
//! ```
//!
//! A plain string description is an `errors` issue. Each problem type fixes
//! how the raw text is split into ticket descriptions and which priority the
//! resulting tickets get.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, Result};

/// Source tag meaning "deduplicate by description text".
pub const DEVICES_SOURCE: &str = "devices";

/// Separator for multi-entry descriptions.
const ENTRY_SEPARATOR: char = '*';

/// Kind of problem reported by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemType {
    Errors,
    Warnings,
    UnrespondedDevices,
}

impl ProblemType {
    /// Parse the `type` field of a structured description.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "errors" => Some(Self::Errors),
            "warnings" => Some(Self::Warnings),
            "unresponded_devices" => Some(Self::UnrespondedDevices),
            _ => None,
        }
    }

    /// Ticket priority for this problem type.
    pub const fn priority(self) -> Priority {
        match self {
            Self::Errors => Priority::High,
            Self::UnrespondedDevices => Priority::Medium,
            Self::Warnings => Priority::Low,
        }
    }

    /// Split raw description text into ticket descriptions.
    pub fn split(self, raw: &str) -> Vec<String> {
        match self {
            Self::Errors => split_single(raw),
            Self::Warnings | Self::UnrespondedDevices => split_entries(raw),
        }
    }
}

fn split_single(raw: &str) -> Vec<String> {
    let text = raw.trim();
    if text.is_empty() {
        Vec::new()
    } else {
        vec![text.to_string()]
    }
}

fn split_entries(raw: &str) -> Vec<String> {
    raw.split(ENTRY_SEPARATOR)
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(String::from)
        .collect()
}

/// Ticket priority. The ERP stores it as the strings `"1"`, `"2"`, `"3"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Priority {
    Low = 1,
    Medium = 2,
    High = 3,
}

impl Priority {
    /// Wire form of the priority.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "1",
            Self::Medium => "2",
            Self::High => "3",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Priority {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// A classified issue, ready for ticket reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProblemReport {
    /// Problem type the issue was classified as.
    pub problem_type: ProblemType,
    /// Ticket descriptions, one ticket each.
    pub descriptions: Vec<String>,
    /// Priority for every ticket of this report.
    pub priority: Priority,
    /// Source tag, empty when the device did not set one.
    pub source: String,
}

impl ProblemReport {
    /// Classify a decrypted description document.
    ///
    /// An unknown `type` is treated as `errors` so the issue still reaches
    /// a ticket.
    pub fn from_issue(issue: &Value) -> Result<Self> {
        let description = issue
            .get("description")
            .ok_or_else(|| CoreError::MalformedIssue("missing description".into()))?;

        let (problem_type, raw, source) = match description {
            Value::String(text) => (ProblemType::Errors, text.as_str(), ""),
            Value::Object(fields) => {
                let raw = fields
                    .get("description")
                    .and_then(Value::as_str)
                    .ok_or_else(|| CoreError::MalformedIssue("missing nested description".into()))?;
                let problem_type = fields
                    .get("type")
                    .and_then(Value::as_str)
                    .and_then(ProblemType::parse)
                    .unwrap_or(ProblemType::Errors);
                let source = fields.get("source").and_then(Value::as_str).unwrap_or("");
                (problem_type, raw, source)
            }
            other => {
                return Err(CoreError::MalformedIssue(format!(
                    "description must be a string or object, got {other}"
                )))
            }
        };

        Ok(Self {
            problem_type,
            descriptions: problem_type.split(raw),
            priority: problem_type.priority(),
            source: source.to_string(),
        })
    }

    /// Classify description file text.
    pub fn from_json(text: &str) -> Result<Self> {
        let issue: Value =
            serde_json::from_str(text).map_err(|e| CoreError::DecodingError(e.to_string()))?;
        Self::from_issue(&issue)
    }

    /// Key that decides whether a description continues an open ticket.
    ///
    /// Empty and `devices` sources deduplicate by text, any other source
    /// deduplicates by the source tag itself.
    pub fn dedup_key<'a>(&'a self, description: &'a str) -> DedupKey<'a> {
        if self.source.is_empty() || self.source == DEVICES_SOURCE {
            DedupKey::Description(description)
        } else {
            DedupKey::Source(&self.source)
        }
    }
}

/// Ticket lookup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupKey<'a> {
    Description(&'a str),
    Source(&'a str),
}

/// Number of `picture<N>` artifacts announced by a description document.
///
/// Accepts an integer or a numeric string; anything else counts as zero.
pub fn pictures_count(issue: &Value) -> u32 {
    match issue.get("pictures_count") {
        Some(Value::Number(n)) => n.as_u64().map(|n| n.min(u32::MAX as u64) as u32).unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_plain_string_is_errors() {
        let report = ProblemReport::from_issue(&json!({"description": "boiler error"})).unwrap();
        assert_eq!(report.problem_type, ProblemType::Errors);
        assert_eq!(report.descriptions, vec!["boiler error"]);
        assert_eq!(report.priority.as_str(), "3");
        assert_eq!(report.source, "");
    }

    #[test]
    fn test_unresponded_devices_split() {
        let issue = json!({"description": {
            "type": "unresponded_devices",
            "description": "device A*device B*device C",
        }});
        let report = ProblemReport::from_issue(&issue).unwrap();
        assert_eq!(report.descriptions, vec!["device A", "device B", "device C"]);
        assert_eq!(report.priority.as_str(), "2");
    }

    #[test]
    fn test_warnings_split_and_source() {
        let issue = json!({"description": {
            "type": "warnings",
            "description": "low battery**  weak signal ",
            "source": "zigbee",
        }});
        let report = ProblemReport::from_issue(&issue).unwrap();
        assert_eq!(report.descriptions, vec!["low battery", "weak signal"]);
        assert_eq!(report.priority, Priority::Low);
        assert_eq!(report.dedup_key("low battery"), DedupKey::Source("zigbee"));
    }

    #[test]
    fn test_errors_type_keeps_separator() {
        let issue = json!({"description": {"type": "errors", "description": "a*b"}});
        let report = ProblemReport::from_issue(&issue).unwrap();
        assert_eq!(report.descriptions, vec!["a*b"]);
    }

    #[test]
    fn test_unknown_type_falls_back_to_errors() {
        let issue = json!({"description": {"type": "mystery", "description": "x"}});
        let report = ProblemReport::from_issue(&issue).unwrap();
        assert_eq!(report.problem_type, ProblemType::Errors);
        assert_eq!(report.priority, Priority::High);
    }

    #[test]
    fn test_devices_source_dedups_by_description() {
        let issue = json!({"description": {
            "type": "unresponded_devices",
            "description": "lamp",
            "source": "devices",
        }});
        let report = ProblemReport::from_issue(&issue).unwrap();
        assert_eq!(report.dedup_key("lamp"), DedupKey::Description("lamp"));
    }

    #[test]
    fn test_malformed_issues() {
        assert!(ProblemReport::from_issue(&json!({})).is_err());
        assert!(ProblemReport::from_issue(&json!({"description": 5})).is_err());
        assert!(ProblemReport::from_issue(&json!({"description": {"type": "errors"}})).is_err());
        assert!(ProblemReport::from_json("not json").is_err());
    }

    #[test]
    fn test_pictures_count_forms() {
        assert_eq!(pictures_count(&json!({"pictures_count": 2})), 2);
        assert_eq!(pictures_count(&json!({"pictures_count": "3"})), 3);
        assert_eq!(pictures_count(&json!({"pictures_count": "many"})), 0);
        assert_eq!(pictures_count(&json!({})), 0);
    }

    #[test]
    fn test_priority_serializes_as_string() {
        assert_eq!(serde_json::to_string(&Priority::Medium).unwrap(), "\"2\"");
    }

    proptest! {
        #[test]
        fn priority_always_in_range(kind in prop_oneof![
            Just("errors".to_string()),
            Just("warnings".to_string()),
            Just("unresponded_devices".to_string()),
            "[a-z_]{0,12}"
        ], text in ".{0,64}") {
            let issue = json!({"description": {"type": kind, "description": text}});
            let report = ProblemReport::from_issue(&issue).unwrap();
            let p = report.priority as u8;
            prop_assert!((1..=3).contains(&p));
        }

        #[test]
        fn split_entries_never_blank(text in "[a-z *]{0,64}") {
            for entry in ProblemType::Warnings.split(&text) {
                prop_assert!(!entry.trim().is_empty());
                prop_assert!(!entry.contains('*'));
            }
        }
    }
}
