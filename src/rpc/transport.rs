//! HTTP transport for the JSON-RPC endpoint.
//!
//! One POST per request against a single endpoint. The underlying
//! `reqwest::Client` keeps a small keep-alive pool, so concurrent callers
//! share connections without serializing on each other.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;

use super::errors::RpcError;
use super::types::{RpcRequest, RpcResponse};

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Idle keep-alive connections kept per host.
const MAX_IDLE_CONNECTIONS: usize = 5;

// ─── Transport Trait ─────────────────────────────────────────────────────────

/// Sends one request envelope and returns the decoded response envelope.
///
/// Status codes inside the envelope are not interpreted here; that is the
/// session manager's and client's job.
#[async_trait]
pub trait Transport: Send + Sync {
    /// The endpoint URL, for logs and error context.
    fn endpoint(&self) -> &str;

    /// POST the request. `bearer` is set in token mode.
    async fn send(
        &self,
        request: &RpcRequest,
        bearer: Option<&str>,
    ) -> Result<RpcResponse, RpcError>;
}

// ─── HttpTransport ───────────────────────────────────────────────────────────

pub struct HttpTransport {
    http: HttpClient,
    endpoint: String,
    timeout: Duration,
}

impl HttpTransport {
    /// Build a transport for `endpoint`. Does not connect.
    pub fn new(endpoint: &str, verify_tls: bool, timeout: Duration) -> Result<Self, RpcError> {
        if !verify_tls {
            tracing::warn!(endpoint = %endpoint, "TLS certificate verification disabled");
        }

        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(timeout)
            .pool_max_idle_per_host(MAX_IDLE_CONNECTIONS)
            .danger_accept_invalid_certs(!verify_tls)
            .build()
            .map_err(|e| RpcError::Connection {
                endpoint: endpoint.to_string(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
            timeout,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send(
        &self,
        request: &RpcRequest,
        bearer: Option<&str>,
    ) -> Result<RpcResponse, RpcError> {
        let mut builder = self.http.post(&self.endpoint).json(request);
        if let Some(token) = bearer {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                RpcError::Timeout {
                    url: request.url().to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                }
            } else {
                RpcError::Connection {
                    endpoint: self.endpoint.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RpcError::HttpStatus {
                status: status.as_u16(),
                endpoint: self.endpoint.clone(),
            });
        }

        let body = response.text().await.map_err(|e| RpcError::Connection {
            endpoint: self.endpoint.clone(),
            reason: format!("failed to read response body: {e}"),
        })?;

        serde_json::from_str(&body).map_err(|e| RpcError::MalformedResponse {
            reason: format!("invalid response envelope: {e}"),
        })
    }
}

// ─── Test Support ────────────────────────────────────────────────────────────
