//! Fix suggestions for newly opened tickets.
//!
//! Paid senders get a suggested fix for every ticket a report creates. The
//! suggestion is HTML, ready to be stored as a ticket note and mailed to the
//! customer.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{OperatorError, Result};

/// Produces a suggested fix for a problem description.
#[async_trait]
pub trait FixAdvisor: Send + Sync {
    /// Suggest a fix, formatted as an HTML e-mail body.
    async fn suggest(&self, description: &str) -> Result<String>;
}

const INSTRUCTIONS: &str = "You are a smart home support engineer. The user reports a problem \
from their Home Assistant installation. Reply with a short, friendly e-mail body in HTML \
(no <html> or <body> tags) that explains the likely cause and the steps to fix it.";

/// Configuration for [`OpenAiAdvisor`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

/// Advisor backed by the OpenAI Responses API.
pub struct OpenAiAdvisor {
    http: reqwest::Client,
    config: OpenAiConfig,
}

#[derive(Debug, Deserialize)]
struct ResponseBody {
    #[serde(default)]
    output: Vec<OutputItem>,
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(default)]
    content: Vec<ContentPart>,
}

#[derive(Debug, Deserialize)]
struct ContentPart {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

impl ResponseBody {
    /// Concatenated `output_text` parts.
    fn text(&self) -> String {
        self.output
            .iter()
            .flat_map(|item| &item.content)
            .filter(|part| part.kind == "output_text")
            .map(|part| part.text.as_str())
            .collect()
    }
}

impl OpenAiAdvisor {
    /// Create an advisor.
    pub fn new(config: OpenAiConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { http, config }
    }

    fn request_body(&self, description: &str) -> Value {
        json!({
            "model": self.config.model,
            "instructions": INSTRUCTIONS,
            "input": description,
        })
    }
}

#[async_trait]
impl FixAdvisor for OpenAiAdvisor {
    async fn suggest(&self, description: &str) -> Result<String> {
        let url = format!("{}/responses", self.config.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&self.request_body(description))
            .send()
            .await
            .map_err(|e| OperatorError::Advisor(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OperatorError::Advisor(format!("{status}: {body}")));
        }

        let body: ResponseBody = response
            .json()
            .await
            .map_err(|e| OperatorError::Advisor(e.to_string()))?;
        let text = body.text();
        if text.trim().is_empty() {
            return Err(OperatorError::Advisor("empty suggestion".into()));
        }
        debug!(chars = text.len(), "fix suggestion received");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_text_is_concatenated() {
        let body: ResponseBody = serde_json::from_value(json!({
            "id": "resp_1",
            "output": [
                {"type": "reasoning", "content": []},
                {"type": "message", "role": "assistant", "content": [
                    {"type": "output_text", "text": "<p>Check the "},
                    {"type": "refusal", "refusal": "no"},
                    {"type": "output_text", "text": "pressure valve.</p>"}
                ]}
            ]
        }))
        .unwrap();
        assert_eq!(body.text(), "<p>Check the pressure valve.</p>");
    }

    #[test]
    fn test_request_body() {
        let advisor = OpenAiAdvisor::new(OpenAiConfig {
            api_key: "sk-test".into(),
            model: default_model(),
            base_url: default_base_url(),
            timeout_secs: 5,
        });
        let body = advisor.request_body("boiler error");
        assert_eq!(body["model"], json!("gpt-4o"));
        assert_eq!(body["input"], json!("boiler error"));
    }
}
