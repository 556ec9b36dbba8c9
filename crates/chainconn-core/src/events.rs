//! Network-level notifications published by the connection manager.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What happened to a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetworkEventKind {
    /// The active provider changed.
    #[serde(rename = "provider:switched")]
    ProviderSwitched,
    /// The network gained an active provider.
    #[serde(rename = "network:connected")]
    NetworkConnected,
    /// The network lost its last healthy provider.
    #[serde(rename = "network:disconnected")]
    NetworkDisconnected,
    /// An endpoint of the network degraded.
    #[serde(rename = "health:degraded")]
    HealthDegraded,
}

impl NetworkEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProviderSwitched => "provider:switched",
            Self::NetworkConnected => "network:connected",
            Self::NetworkDisconnected => "network:disconnected",
            Self::HealthDegraded => "health:degraded",
        }
    }
}

impl std::fmt::Display for NetworkEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkEvent {
    pub kind: NetworkEventKind,
    pub network: String,
    /// Endpoint the event is about, if any. For `provider:switched` this is the new provider.
    pub endpoint_url: Option<String>,
    /// The previous provider, for `provider:switched`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl NetworkEvent {
    pub fn new(kind: NetworkEventKind, network: impl Into<String>) -> Self {
        Self {
            kind,
            network: network.into(),
            endpoint_url: None,
            previous_url: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_endpoint(mut self, url: impl Into<String>) -> Self {
        self.endpoint_url = Some(url.into());
        self
    }

    pub fn with_previous(mut self, url: Option<String>) -> Self {
        self.previous_url = url;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}
