//! HTTP JSON-RPC client backed by `reqwest`.
//!
//! One client per endpoint. The client does a single attempt per call:
//! admission control, health tracking and failover live in `chainconn-core`,
//! so retrying here would only hide endpoint failures from the monitor.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;

use chainconn_core::error::TransportError;
use chainconn_core::request::{JsonRpcRequest, JsonRpcResponse};
use chainconn_core::transport::RpcTransport;

/// Configuration for `HttpRpcClient`.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub request_timeout: Duration,
    /// Extra headers sent with every request (API keys, auth tokens).
    pub headers: BTreeMap<String, String>,
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            headers: BTreeMap::new(),
            user_agent: concat!("chainconn/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl HttpClientConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// HTTP JSON-RPC client for one endpoint.
pub struct HttpRpcClient {
    url: String,
    /// URL used for logs and errors, with credentials stripped.
    display_url: String,
    http: reqwest::Client,
    request_timeout: Duration,
}

impl HttpRpcClient {
    /// Create a new client for the given JSON-RPC endpoint URL.
    pub fn new(url: impl Into<String>, config: HttpClientConfig) -> Result<Self, TransportError> {
        let url = url.into();
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::Other(format!("invalid header name {name}: {e}")))?;
            let mut value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::Other(format!("invalid value for header {name}: {e}")))?;
            value.set_sensitive(true);
            headers.insert(name, value);
        }

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent)
            .default_headers(headers)
            .build()
            .map_err(|e| TransportError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            display_url: redact(&url),
            url,
            http,
            request_timeout: config.request_timeout,
        })
    }

    /// Create with default configuration.
    pub fn default_for(url: impl Into<String>) -> Result<Self, TransportError> {
        Self::new(url, HttpClientConfig::default())
    }

    fn map_reqwest(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout {
                ms: self.request_timeout.as_millis() as u64,
            }
        } else {
            TransportError::Http(e.without_url().to_string())
        }
    }

    async fn check_status(&self, resp: reqwest::Response) -> Result<reqwest::Response, TransportError> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        let body: String = body.chars().take(256).collect();
        Err(TransportError::Http(format!("HTTP {status}: {body}")))
    }
}

#[async_trait]
impl RpcTransport for HttpRpcClient {
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        tracing::trace!(url = %self.display_url, method = %req.method, "sending request");
        let resp = self
            .http
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .map_err(|e| self.map_reqwest(e))?;
        let resp = self.check_status(resp).await?;

        resp.json::<JsonRpcResponse>()
            .await
            .map_err(|e| self.map_reqwest(e))
    }

    /// True HTTP batch: send all requests as a JSON array in one HTTP call.
    async fn send_batch(
        &self,
        reqs: Vec<JsonRpcRequest>,
    ) -> Result<Vec<JsonRpcResponse>, TransportError> {
        if reqs.is_empty() {
            return Ok(vec![]);
        }

        let resp = self
            .http
            .post(&self.url)
            .json(&reqs)
            .send()
            .await
            .map_err(|e| self.map_reqwest(e))?;
        let resp = self.check_status(resp).await?;

        resp.json::<Vec<JsonRpcResponse>>()
            .await
            .map_err(|e| self.map_reqwest(e))
    }

    async fn fetch(&self, path: &str) -> Result<Value, TransportError> {
        let url = join_url(&self.url, path);
        tracing::trace!(url = %self.display_url, path, "GET");
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_reqwest(e))?;
        let resp = self.check_status(resp).await?;
        resp.json::<Value>().await.map_err(|e| self.map_reqwest(e))
    }

    fn url(&self) -> &str {
        &self.display_url
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Strip the path of URLs whose path carries a key (`/v2/<key>`, `/v3/<key>`).
///
/// Query strings are dropped entirely.
fn redact(url: &str) -> String {
    let without_query = url.split('?').next().unwrap_or(url);
    let Some((scheme, rest)) = without_query.split_once("://") else {
        return without_query.to_string();
    };
    let Some((host, path)) = rest.split_once('/') else {
        return without_query.to_string();
    };
    let segments: Vec<&str> = path.split('/').collect();
    let secretish = segments
        .iter()
        .any(|s| s.len() >= 20 && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    if secretish {
        format!("{scheme}://{host}/***")
    } else {
        without_query.to_string()
    }
}
