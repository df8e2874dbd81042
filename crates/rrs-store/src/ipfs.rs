//! Archival node client for the Kubo HTTP RPC API.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::debug;

use rrs_core::ContentHash;

use crate::error::{Result, StoreError};
use crate::traits::{ContentStore, UnpinOutcome};

/// Error text Kubo returns when a hash has no direct pin.
const NOT_PINNED: &str = "not pinned";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AddResponse {
    hash: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiError {
    message: String,
}

/// Content store backed by a Kubo node.
pub struct IpfsClient {
    http: reqwest::Client,
    api_url: String,
}

impl IpfsClient {
    /// Create a client for an API endpoint such as `http://127.0.0.1:5001`.
    pub fn new(api_url: impl Into<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            api_url: api_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self, command: &str) -> String {
        format!("{}/api/v0/{}", self.api_url, command)
    }

    async fn error_for(response: reqwest::Response) -> StoreError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiError>(&body)
            .map(|e| e.message)
            .unwrap_or(body);
        StoreError::Http {
            status,
            body: message,
        }
    }
}

#[async_trait]
impl ContentStore for IpfsClient {
    async fn add(&self, path: &Path) -> Result<ContentHash> {
        let content = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "artifact".to_string());
        let form = Form::new().part("file", Part::bytes(content).file_name(name.clone()));

        let response = self
            .http
            .post(self.endpoint("add"))
            .query(&[("pin", "true")])
            .multipart(form)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }

        let added: AddResponse = response.json().await?;
        debug!(file = %name, hash = %added.hash, "added to archival node");
        Ok(ContentHash::new(added.hash))
    }

    async fn pin_rm(&self, hash: &ContentHash) -> Result<UnpinOutcome> {
        let response = self
            .http
            .post(self.endpoint("pin/rm"))
            .query(&[("arg", hash.as_str())])
            .send()
            .await?;
        if response.status().is_success() {
            return Ok(UnpinOutcome::Unpinned);
        }

        match Self::error_for(response).await {
            StoreError::Http { body, .. } if body.contains(NOT_PINNED) => {
                debug!(hash = %hash, "hash was already unpinned");
                Ok(UnpinOutcome::AlreadyUnpinned)
            }
            other => Err(other),
        }
    }

    async fn cat(&self, hash: &ContentHash) -> Result<Bytes> {
        let response = self
            .http
            .post(self.endpoint("cat"))
            .query(&[("arg", hash.as_str())])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }
        Ok(response.bytes().await?)
    }
}
