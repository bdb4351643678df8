//! Best-effort HTTP client for the core's control-plane API
//!
//! Every public call reduces to a `bool` or `Option`: an unreachable or
//! rejecting core is an expected environmental state, not a fault. The typed
//! [`ApiError`] stays internal so tests and logs can still tell a transport
//! failure from a rejected request.

use std::sync::RwLock;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Method, RequestBuilder, StatusCode};
use thiserror::Error;
use tracing::debug;

use super::models::{ConnectionsResponse, VersionResponse};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a control-plane call produced no result
#[derive(Debug, Error)]
pub enum ApiError {
    /// Connection refused, timeout, DNS failure - the core is unreachable
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    /// The core answered but rejected the request (bad secret, bad path)
    #[error("unexpected status: {0}")]
    Status(StatusCode),
}

struct Endpoint {
    base_url: String,
    secret: String,
}

/// Client for the core's local REST API (`external-controller` address)
pub struct ControlPlaneClient {
    client: reqwest::Client,
    endpoint: RwLock<Endpoint>,
}

impl ControlPlaneClient {
    pub fn new(base_url: &str, secret: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build control-plane HTTP client")?;

        Ok(Self {
            client,
            endpoint: RwLock::new(Endpoint {
                base_url: base_url.trim_end_matches('/').to_string(),
                secret: secret.to_string(),
            }),
        })
    }

    /// Re-point the client after the API address or secret changed in settings
    pub fn configure(&self, base_url: &str, secret: &str) {
        let mut endpoint = self.endpoint.write().unwrap_or_else(|e| e.into_inner());
        endpoint.base_url = base_url.trim_end_matches('/').to_string();
        endpoint.secret = secret.to_string();
    }

    pub fn base_url(&self) -> String {
        self.endpoint
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .base_url
            .clone()
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let endpoint = self.endpoint.read().unwrap_or_else(|e| e.into_inner());
        let mut request = self
            .client
            .request(method, format!("{}{}", endpoint.base_url, path));
        if !endpoint.secret.is_empty() {
            request = request.bearer_auth(&endpoint.secret);
        }
        request
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.request(Method::GET, path).send().await?;
        if !response.status().is_success() {
            return Err(ApiError::Status(response.status()));
        }
        Ok(response.json::<T>().await?)
    }

    /// Bounded-timeout liveness probe against the version endpoint.
    /// Any transport error or non-success status reads as "not reachable".
    pub async fn is_reachable(&self) -> bool {
        match self.request(Method::GET, "/version").send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("control plane unreachable: {e}");
                false
            }
        }
    }

    pub async fn version(&self) -> Option<String> {
        match self.get_json::<VersionResponse>("/version").await {
            Ok(response) => Some(response.version),
            Err(e) => {
                debug!("version query failed: {e}");
                None
            }
        }
    }

    /// Apply a partial config change (mode, TUN settings, ports). Best-effort:
    /// on `false` the caller must roll its own visible setting back.
    pub async fn patch_configs(&self, patch: &serde_json::Value) -> bool {
        match self.request(Method::PATCH, "/configs").json(patch).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("config patch failed: {e}");
                false
            }
        }
    }

    pub async fn connections(&self) -> Option<ConnectionsResponse> {
        match self.get_json::<ConnectionsResponse>("/connections").await {
            Ok(response) => Some(response),
            Err(e) => {
                debug!("connections query failed: {e}");
                None
            }
        }
    }

    pub async fn close_all_connections(&self) {
        if let Err(e) = self.request(Method::DELETE, "/connections").send().await {
            debug!("closing connections failed: {e}");
        }
    }

    pub async fn close_connection(&self, id: &str) {
        let path = format!("/connections/{id}");
        if let Err(e) = self.request(Method::DELETE, &path).send().await {
            debug!("closing connection {id} failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_trimmed_from_base_url() {
        let client = ControlPlaneClient::new("http://127.0.0.1:9090/", "").unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:9090");

        client.configure("http://127.0.0.1:9091/", "secret");
        assert_eq!(client.base_url(), "http://127.0.0.1:9091");
    }

    #[tokio::test]
    async fn unreachable_endpoint_reads_as_not_reachable() {
        // Port 1 is never serving the control API locally.
        let client = ControlPlaneClient::new("http://127.0.0.1:1", "").unwrap();
        assert!(!client.is_reachable().await);
        assert!(client.version().await.is_none());
        assert!(!client.patch_configs(&serde_json::json!({"mode": "rule"})).await);
        assert!(client.connections().await.is_none());
    }
}
