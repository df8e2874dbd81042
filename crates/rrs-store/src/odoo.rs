//! Odoo ERP client over JSON-RPC.
//!
//! Calls go to `POST {url}/jsonrpc`. The session uid is obtained once via
//! `common.authenticate` and reused for every `object.execute_kw` call.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::traits::{Domain, ErpBackend, Record};

/// Connection settings for an Odoo instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OdooConfig {
    pub url: String,
    pub db: String,
    pub username: String,
    pub password: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'static str,
    params: CallParams<'a>,
    id: u64,
}

#[derive(Debug, Serialize)]
struct CallParams<'a> {
    service: &'a str,
    method: &'a str,
    args: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    #[serde(default)]
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

impl JsonRpcError {
    fn describe(&self) -> String {
        let detail = self
            .data
            .as_ref()
            .and_then(|d| d.get("message"))
            .and_then(Value::as_str)
            .unwrap_or("");
        format!("{} {}: {}", self.code, self.message, detail)
    }
}

/// ERP backend talking to Odoo.
pub struct OdooClient {
    http: reqwest::Client,
    config: OdooConfig,
    uid: OnceCell<i64>,
    request_id: AtomicU64,
}

impl OdooClient {
    /// Create a client. Authentication happens on first use.
    pub fn new(config: OdooConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            config,
            uid: OnceCell::new(),
            request_id: AtomicU64::new(1),
        }
    }

    async fn call(&self, service: &str, method: &str, args: Vec<Value>) -> Result<Value> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method: "call",
            params: CallParams {
                service,
                method,
                args,
            },
            id: self.request_id.fetch_add(1, Ordering::SeqCst),
        };

        let url = format!("{}/jsonrpc", self.config.url.trim_end_matches('/'));
        let response = self.http.post(&url).json(&request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let rpc: JsonRpcResponse = response.json().await?;
        if let Some(error) = rpc.error {
            return Err(StoreError::Rpc(error.describe()));
        }
        Ok(rpc.result.unwrap_or(Value::Null))
    }

    async fn uid(&self) -> Result<i64> {
        self.uid
            .get_or_try_init(|| async {
                let result = self
                    .call(
                        "common",
                        "authenticate",
                        vec![
                            json!(self.config.db),
                            json!(self.config.username),
                            json!(self.config.password),
                            json!({}),
                        ],
                    )
                    .await?;
                match result.as_i64() {
                    Some(uid) if uid > 0 => {
                        debug!(uid, db = %self.config.db, "authenticated with odoo");
                        Ok(uid)
                    }
                    _ => Err(StoreError::Unauthorized(format!(
                        "odoo rejected credentials for {}",
                        self.config.username
                    ))),
                }
            })
            .await
            .copied()
    }

    async fn execute_kw(
        &self,
        model: &str,
        method: &str,
        args: Value,
        kwargs: Option<Value>,
    ) -> Result<Value> {
        let uid = self.uid().await?;
        let mut call_args = vec![
            json!(self.config.db),
            json!(uid),
            json!(self.config.password),
            json!(model),
            json!(method),
            args,
        ];
        if let Some(kwargs) = kwargs {
            call_args.push(kwargs);
        }
        debug!(model, method, "odoo execute_kw");
        self.call("object", "execute_kw", call_args).await
    }
}

fn as_id(value: &Value) -> Result<i64> {
    value
        .as_i64()
        .ok_or_else(|| StoreError::Serialization(format!("expected record id, got {value}")))
}

#[async_trait]
impl ErpBackend for OdooClient {
    async fn create(&self, model: &str, fields: Record) -> Result<i64> {
        let result = self
            .execute_kw(model, "create", json!([fields]), None)
            .await?;
        as_id(&result)
    }

    async fn read(&self, model: &str, ids: &[i64], fields: &[&str]) -> Result<Vec<Record>> {
        let result = self
            .execute_kw(model, "read", json!([ids]), Some(json!({ "fields": fields })))
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn update(&self, model: &str, id: i64, fields: Record) -> Result<bool> {
        let result = self
            .execute_kw(model, "write", json!([[id], fields]), None)
            .await?;
        Ok(result.as_bool().unwrap_or(false))
    }

    async fn search(&self, model: &str, domain: &Domain) -> Result<Vec<i64>> {
        let result = self
            .execute_kw(model, "search", json!([domain.to_json()]), None)
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn unlink(&self, model: &str, ids: &[i64]) -> Result<bool> {
        let result = self.execute_kw(model, "unlink", json!([ids]), None).await?;
        Ok(result.as_bool().unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method: "call",
            params: CallParams {
                service: "object",
                method: "execute_kw",
                args: vec![json!("db"), json!(2), json!("pw"), json!("helpdesk.ticket"), json!("search"), json!([[]])],
            },
            id: 7,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["params"]["service"], "object");
        assert_eq!(value["params"]["args"][3], "helpdesk.ticket");
        assert_eq!(value["id"], 7);
    }

    #[test]
    fn test_error_description_includes_detail() {
        let error: JsonRpcError = serde_json::from_value(json!({
            "code": 200,
            "message": "Odoo Server Error",
            "data": {"message": "Access Denied"}
        }))
        .unwrap();
        assert!(error.describe().contains("Access Denied"));
    }
}
