//! HTTP client backed by reqwest
//!
//! ## Usage
//!
//! ```ignore
//! let http = ReqwestHttpClient::new("http://tester.local:8000")?;
//! let api = ApiClient::new(http, "/api");
//! let envelope = api.get("/hardware/robot/status").await?;
//! ```

use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::{HttpClient, HttpMethod, HttpResponse, TransportError};

/// Default per-request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// [`HttpClient`] talking to a tester server over HTTP
pub struct ReqwestHttpClient {
    client: reqwest::Client,
    origin: String,
}

impl ReqwestHttpClient {
    /// Client for the server at `origin` (scheme, host and port)
    pub fn new(origin: impl Into<String>) -> Result<Self, TransportError> {
        Self::with_timeout(origin, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(origin: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("eol-console/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;

        Ok(Self {
            client,
            origin: origin.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }
}

impl HttpClient for ReqwestHttpClient {
    async fn request(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<&Value>,
    ) -> Result<HttpResponse, TransportError> {
        let url = format!("{}{}", self.origin, path);
        let mut builder = match method {
            HttpMethod::Get => self.client.get(&url),
            HttpMethod::Post => self.client.post(&url),
            HttpMethod::Put => self.client.put(&url),
            HttpMethod::Delete => self.client.delete(&url),
        };
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        // Non-JSON bodies (proxy error pages and the like) count as absent
        let body = if bytes.is_empty() {
            None
        } else {
            serde_json::from_slice::<Value>(&bytes).ok()
        };
        debug!(%method, %url, status, "http response");

        Ok(HttpResponse { status, body })
    }
}
