//! Relay wire messages.
//!
//! All messages are JSON text frames.
//!
//! ```text
//! operator -> relay   {"protocols_to_listen": ["/report"]}
//! relay -> operator   {"peerId": "..."}                                   heartbeat
//! relay -> operator   {"data": {"address": S, "report": R, "id": "42"}}   report
//! operator -> relay   {"protocol": "/report/S", "serverPeerId": "", "save_data": false,
//!                      "data": {"datalog": true, "ticket_ids": [7], "id": "42"}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Default topic devices publish reports on.
pub const REPORT_TOPIC: &str = "/report";

/// A report relayed from a device.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReportPayload {
    /// Sender address as sent by the device.
    pub address: String,
    /// Opaque report content: a hash, an object, or JSON text.
    pub report: Value,
    /// Correlation id, echoed in the response.
    #[serde(default)]
    pub id: Value,
}

/// Any inbound frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum InboundMessage {
    Report {
        data: ReportPayload,
    },
    Heartbeat {
        #[serde(rename = "peerId")]
        peer_id: Value,
    },
    /// Valid JSON of no known shape.
    Other(Value),
}

impl InboundMessage {
    /// Parse a text frame.
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Subscription request sent after every (re)connect.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscribeMessage {
    pub protocols_to_listen: Vec<String>,
}

impl SubscribeMessage {
    /// Listen on a single topic.
    pub fn topic(topic: &str) -> Self {
        Self {
            protocols_to_listen: vec![topic.to_string()],
        }
    }
}

/// Result of processing a report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseData {
    /// Whether the sender has a paid subscription.
    pub datalog: bool,
    /// Tickets created or updated by the report.
    pub ticket_ids: Vec<i64>,
    /// Echo of the report's correlation id.
    pub id: Value,
}

/// Reply sent back to the reporting device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportResponse {
    pub protocol: String,
    #[serde(rename = "serverPeerId")]
    pub server_peer_id: String,
    pub save_data: bool,
    pub data: ResponseData,
}

impl ReportResponse {
    /// Response routed to `sender` on `topic`.
    pub fn new(topic: &str, sender: &str, data: ResponseData) -> Self {
        Self {
            protocol: format!("{topic}/{sender}"),
            server_peer_id: String::new(),
            save_data: false,
            data,
        }
    }

    /// Encode as a text frame.
    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_report() {
        let text = r#"{"data":{"address":"abc","report":"{\"description\":\"boiler error\"}","id":"42"}}"#;
        match InboundMessage::parse(text).unwrap() {
            InboundMessage::Report { data } => {
                assert_eq!(data.address, "abc");
                assert_eq!(data.id, json!("42"));
                assert!(data.report.is_string());
            }
            other => panic!("expected report, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_heartbeat() {
        let parsed = InboundMessage::parse(r#"{"peerId":"12D3KooW"}"#).unwrap();
        assert!(matches!(parsed, InboundMessage::Heartbeat { .. }));
    }

    #[test]
    fn test_parse_unknown_and_invalid() {
        assert!(matches!(
            InboundMessage::parse(r#"{"hello":1}"#).unwrap(),
            InboundMessage::Other(_)
        ));
        assert!(InboundMessage::parse("not json").is_err());
    }

    #[test]
    fn test_subscribe_wire_form() {
        let text = serde_json::to_string(&SubscribeMessage::topic(REPORT_TOPIC)).unwrap();
        assert_eq!(text, r#"{"protocols_to_listen":["/report"]}"#);
    }

    #[test]
    fn test_response_wire_form() {
        let response = ReportResponse::new(
            REPORT_TOPIC,
            "abc",
            ResponseData {
                datalog: true,
                ticket_ids: vec![7],
                id: json!("42"),
            },
        );
        let value: Value = serde_json::from_str(&response.to_text().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "protocol": "/report/abc",
                "serverPeerId": "",
                "save_data": false,
                "data": {"datalog": true, "ticket_ids": [7], "id": "42"}
            })
        );
    }
}
