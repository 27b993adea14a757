//! Network transport abstraction
//!
//! The executor talks to the network only through [`Transport`], so the timeout
//! race, interception and classification logic can be exercised against
//! [`MockTransport`](crate::http::MockTransport) without real sockets.
//!
//! Cancellation is expressed by dropping the future returned by
//! [`Transport::execute`]; for [`ReqwestTransport`] that closes the connection.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::http::{RequestBody, RequestConfig, RequestError};

/// Raw response returned by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    /// HTTP status code
    pub status: u16,
    /// Reason phrase ("Not Found"), empty if unknown
    pub status_text: String,
    /// Response headers, names lower-cased
    pub headers: HashMap<String, String>,
    /// Response body as text
    pub body: String,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            status_text: reqwest::StatusCode::from_u16(status)
                .ok()
                .and_then(|s| s.canonical_reason())
                .unwrap_or("")
                .to_string(),
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// `true` for 2xx statuses
    pub fn ok(&self) -> bool {
        (200..=299).contains(&self.status)
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|s| s.as_str())
    }
}

/// Trait for executing HTTP requests.
///
/// # Errors
/// Implementations return a [`RequestError`] of kind `Network` when the
/// request could not be delivered. Non-2xx statuses are *not* errors at this
/// layer; they are classified by the executor.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: &RequestConfig) -> Result<TransportResponse, RequestError>;
}

/// Connection-level settings for [`ReqwestTransport`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Time allowed to establish a connection
    #[serde(with = "crate::config::duration_ms")]
    pub connect_timeout: Duration,
    /// How long idle pooled connections are kept
    #[serde(with = "crate::config::duration_ms")]
    pub pool_idle_timeout: Duration,
    /// Whether to validate TLS certificates
    pub validate_tls: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            pool_idle_timeout: Duration::from_secs(90),
            validate_tls: true,
        }
    }
}

/// Production transport backed by reqwest
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(config: &TransportConfig) -> Result<Self, crate::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(config.pool_idle_timeout)
            .danger_accept_invalid_certs(!config.validate_tls)
            .build()
            .map_err(|e| crate::Error::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
                source: Some(anyhow::Error::new(e)),
            })?;
        Ok(Self { client })
    }

    /// Wrap an existing reqwest client
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    #[tracing::instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    async fn execute(&self, request: &RequestConfig) -> Result<TransportResponse, RequestError> {
        let mut builder = self
            .client
            .request(request.method.into(), &request.url);

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if let Some(body) = &request.body {
            builder = match body {
                RequestBody::Text(text) => builder.body(text.clone()),
                RequestBody::Binary(bytes) => builder.body(bytes.clone()),
            };
            tracing::trace!(body_len = body.len(), "Added request body");
        }

        let response = builder.send().await.map_err(|e| {
            RequestError::network(e)
                .with_url(request.url.clone())
                .with_method(request.method)
        })?;

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();

        let body = response.text().await.map_err(|e| {
            RequestError::network(e)
                .with_url(request.url.clone())
                .with_method(request.method)
        })?;

        Ok(TransportResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("").to_string(),
            headers,
            body,
        })
    }
}
