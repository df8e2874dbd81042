//! Pinning service client for Pinata and its IPFS gateways.
//!
//! Directory listings are fetched from the dedicated gateway
//! (`{gateway}/ipfs/{hash}/{name}`), single objects from the public
//! gateway (`{public_gateway}/ipfs/{hash}`). Pin management goes through
//! the Pinata REST API with key/secret headers.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use rrs_core::{Address, ContentHash};

use crate::error::{Result, StoreError};
use crate::traits::{PinningService, ScopedApiKey};

/// Endpoints and credentials of the pinning service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinataConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,
    #[serde(default = "default_public_gateway_url")]
    pub public_gateway_url: String,
    pub api_key: String,
    pub api_secret: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_url() -> String {
    "https://api.pinata.cloud".to_string()
}

fn default_gateway_url() -> String {
    "https://gateway.pinata.cloud".to_string()
}

fn default_public_gateway_url() -> String {
    "https://ipfs.io".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize)]
struct GeneratedKey {
    #[serde(rename = "JWT")]
    jwt: String,
    pinata_api_key: String,
    pinata_api_secret: String,
}

/// Pinata-backed pinning service.
pub struct PinataClient {
    http: reqwest::Client,
    config: PinataConfig,
}

impl PinataClient {
    /// Create a client.
    pub fn new(config: PinataConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { http, config }
    }

    fn ipfs_url(base: &str, hash: &ContentHash, name: Option<&str>) -> String {
        let base = base.trim_end_matches('/');
        match name {
            Some(name) => format!("{base}/ipfs/{hash}/{name}"),
            None => format!("{base}/ipfs/{hash}"),
        }
    }

    async fn fetch(&self, url: String) -> Result<Option<Bytes>> {
        debug!(%url, "gateway fetch");
        let response = self.http.get(&url).send().await?;
        match response.status() {
            StatusCode::OK => Ok(Some(response.bytes().await?)),
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(StoreError::Http {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }

    fn authed(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("pinata_api_key", &self.config.api_key)
            .header("pinata_secret_api_key", &self.config.api_secret)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StoreError::Unauthorized(body),
            StatusCode::NOT_FOUND => StoreError::NotFound(body),
            _ => StoreError::Http {
                status: status.as_u16(),
                body,
            },
        })
    }
}

#[async_trait]
impl PinningService for PinataClient {
    async fn download(&self, hash: &ContentHash) -> Result<Option<Bytes>> {
        self.fetch(Self::ipfs_url(&self.config.public_gateway_url, hash, None))
            .await
    }

    async fn download_file(&self, hash: &ContentHash, name: &str) -> Result<Option<Bytes>> {
        self.fetch(Self::ipfs_url(&self.config.gateway_url, hash, Some(name)))
            .await
    }

    async fn unpin(&self, hash: &ContentHash) -> Result<()> {
        let url = format!(
            "{}/pinning/unpin/{}",
            self.config.api_url.trim_end_matches('/'),
            hash
        );
        let response = self.authed(self.http.delete(&url)).send().await?;
        Self::check(response).await?;
        debug!(hash = %hash, "unpinned from pinning service");
        Ok(())
    }

    async fn generate_scoped_api_key(&self, owner: &Address) -> Result<ScopedApiKey> {
        let url = format!(
            "{}/users/generateApiKey",
            self.config.api_url.trim_end_matches('/')
        );
        let body = json!({
            "keyName": owner.as_str(),
            "permissions": {
                "endpoints": {
                    "pinning": { "pinFileToIPFS": true, "unpin": true }
                }
            }
        });
        let response = self.authed(self.http.post(&url)).json(&body).send().await?;
        let generated: GeneratedKey = Self::check(response).await?.json().await?;
        info!(owner = %owner, "issued scoped pinning key");
        Ok(ScopedApiKey {
            key_name: owner.to_string(),
            api_key: generated.pinata_api_key,
            api_secret: generated.pinata_api_secret,
            jwt: generated.jwt,
        })
    }
}
