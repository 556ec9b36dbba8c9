//! Endpoint identity and static endpoint configuration.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConnectionError;

/// Placeholder substituted with the resolved credential in endpoint URLs.
pub const API_KEY_PLACEHOLDER: &str = "{api_key}";

/// Identifies one registered endpoint: URL + logical network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId {
    pub network: String,
    pub url: String,
}

impl EndpointId {
    pub fn new(network: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            url: url.into(),
        }
    }
}

impl std::fmt::Display for EndpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.network, self.url)
    }
}

/// Reference to a secret held outside the configuration table.
///
/// Written as `env:VAR_NAME` (or a bare variable name) in config files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CredentialRef {
    Env(String),
}

impl From<String> for CredentialRef {
    fn from(s: String) -> Self {
        match s.strip_prefix("env:") {
            Some(var) => Self::Env(var.to_string()),
            None => Self::Env(s),
        }
    }
}

impl From<CredentialRef> for String {
    fn from(c: CredentialRef) -> Self {
        match c {
            CredentialRef::Env(var) => format!("env:{var}"),
        }
    }
}

impl CredentialRef {
    pub fn env(var: impl Into<String>) -> Self {
        Self::Env(var.into())
    }

    /// Resolve the secret, or `None` if it is not set.
    pub fn resolve(&self) -> Option<String> {
        match self {
            Self::Env(var) => std::env::var(var).ok().filter(|v| !v.is_empty()),
        }
    }
}

impl std::fmt::Display for CredentialRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Env(var) => write!(f, "env:{var}"),
        }
    }
}

/// Static configuration for a single endpoint. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Endpoint URL, optionally containing `{api_key}`.
    pub url: String,
    /// Selection priority (lower = preferred).
    #[serde(default = "default_priority")]
    pub priority: u32,
    /// Where to find the API key, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<CredentialRef>,
    /// Request budget per minute.
    #[serde(default = "default_max_requests_per_minute")]
    pub max_requests_per_minute: u32,
    /// Token-bucket burst size. Falls back to the limiter default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burst_size: Option<u32>,
    /// Per-request timeout, also used for health checks.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Whether the endpoint is unusable without a credential.
    #[serde(default)]
    pub requires_auth: bool,
    /// Network-specific options passed through to transports and adapters.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, Value>,
}

fn default_priority() -> u32 {
    1
}

fn default_max_requests_per_minute() -> u32 {
    60
}

fn default_timeout_ms() -> u64 {
    10_000
}

impl EndpointConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            priority: default_priority(),
            credential: None,
            max_requests_per_minute: default_max_requests_per_minute(),
            burst_size: None,
            timeout_ms: default_timeout_ms(),
            requires_auth: false,
            options: BTreeMap::new(),
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_rate_limit(mut self, per_minute: u32) -> Self {
        self.max_requests_per_minute = per_minute;
        self
    }

    pub fn with_burst(mut self, burst: u32) -> Self {
        self.burst_size = Some(burst);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Attach a credential; the endpoint then requires it.
    pub fn with_credential(mut self, credential: CredentialRef) -> Self {
        self.credential = Some(credential);
        self.requires_auth = true;
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(Value::as_str)
    }

    /// Resolve the credential for `network`.
    ///
    /// `Ok(None)` means the endpoint works without one.
    pub fn resolve_credential(&self, network: &str) -> Result<Option<String>, ConnectionError> {
        let needs_key = self.requires_auth || self.url.contains(API_KEY_PLACEHOLDER);
        let resolved = self.credential.as_ref().and_then(CredentialRef::resolve);
        match (resolved, &self.credential) {
            (Some(secret), _) => Ok(Some(secret)),
            (None, _) if !needs_key => Ok(None),
            (None, Some(cred)) => Err(ConnectionError::configuration(
                network,
                format!("credential {cred} for {} is not set", self.url),
            )),
            (None, None) => Err(ConnectionError::configuration(
                network,
                format!("{} requires a credential but none is configured", self.url),
            )),
        }
    }

    /// The URL with `{api_key}` substituted, ready to dial.
    pub fn resolved_url(&self, network: &str) -> Result<String, ConnectionError> {
        if !self.url.contains(API_KEY_PLACEHOLDER) {
            return Ok(self.url.clone());
        }
        let secret = self.resolve_credential(network)?.ok_or_else(|| {
            ConnectionError::configuration(network, format!("{} has no credential", self.url))
        })?;
        Ok(self.url.replace(API_KEY_PLACEHOLDER, &secret))
    }
}
