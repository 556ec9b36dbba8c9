//! Error types.
//!
//! Two layers:
//! - [`TransportError`]: a single call against one endpoint failed.
//! - [`ConnectionError`]: what crosses the connection-management boundary.

use thiserror::Error;

use crate::request::JsonRpcError;

/// Errors that can occur during an RPC transport operation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP request failed (connection refused, bad status, etc.).
    #[error("HTTP error: {0}")]
    Http(String),

    /// JSON-RPC protocol-level error returned by the node.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    /// Request timed out after the configured duration.
    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// Response could not be deserialized.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// The transport cannot perform this kind of call (e.g. REST on a pure JSON-RPC transport).
    #[error("Unsupported by {url}: {operation}")]
    Unsupported { url: String, operation: String },

    /// An unexpected error.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Returns `true` if this error is transient and says something about the endpoint.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Timeout { .. })
    }

    /// Returns `true` if this is a node-side execution error (e.g. a revert).
    ///
    /// Execution errors prove the endpoint is alive, so they are never
    /// counted against its health.
    pub fn is_execution_error(&self) -> bool {
        matches!(self, Self::Rpc(_))
    }
}

/// Why a queued request was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueRejection {
    /// The queue was full and the request was not important enough to displace anything.
    Full,
    /// The request was displaced by a higher-priority arrival.
    Evicted,
}

impl std::fmt::Display for QueueRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "queue full"),
            Self::Evicted => write!(f, "evicted"),
        }
    }
}

/// Errors surfaced by the rate limiter, pool and connection manager.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Malformed or missing endpoint configuration for one network.
    #[error("Configuration error for network '{network}': {reason}")]
    Configuration { network: String, reason: String },

    /// A single RPC call failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// No endpoint of the network is currently healthy.
    #[error("No healthy provider available for network '{network}'")]
    NoHealthyProvider { network: String },

    /// This specific queued request was rejected.
    #[error("Request rejected by {endpoint} ({reason})")]
    QueueCapacity {
        endpoint: String,
        reason: QueueRejection,
    },

    /// The endpoint was deregistered or the system shut down while the request was queued.
    #[error("Endpoint {endpoint} disconnected")]
    Disconnected { endpoint: String },

    /// The pool already holds its maximum number of endpoints.
    #[error("Connection pool for '{network}' is full ({max} endpoints)")]
    PoolCapacity { network: String, max: usize },

    #[error("Endpoint {url} is already registered")]
    DuplicateEndpoint { url: String },

    #[error("Unknown endpoint: {url}")]
    UnknownEndpoint { url: String },

    #[error("Unknown network: {network}")]
    UnknownNetwork { network: String },

    #[error("Network '{network}' is not connected")]
    NotConnected { network: String },
}

impl ConnectionError {
    pub(crate) fn configuration(network: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            network: network.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` if no provider could be found for the request.
    pub fn is_no_provider(&self) -> bool {
        matches!(self, Self::NoHealthyProvider { .. })
    }

    /// Returns `true` if this request was rejected by the queue (full, evicted or disconnected).
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::QueueCapacity { .. } | Self::Disconnected { .. })
    }

    /// Returns `true` for the failure classes callers must turn into a
    /// user-visible error rather than retry blindly.
    pub fn is_user_visible(&self) -> bool {
        self.is_no_provider() || self.is_rejection()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_errors_are_not_retryable() {
        let err = TransportError::Rpc(JsonRpcError {
            code: 3,
            message: "execution reverted".into(),
            data: None,
        });
        assert!(err.is_execution_error());
        assert!(!err.is_retryable());
        assert!(TransportError::Timeout { ms: 10 }.is_retryable());
    }

    #[test]
    fn boundary_classes() {
        let none = ConnectionError::NoHealthyProvider {
            network: "ethereum".into(),
        };
        assert!(none.is_user_visible());

        let full = ConnectionError::QueueCapacity {
            endpoint: "https://a".into(),
            reason: QueueRejection::Full,
        };
        assert!(full.is_rejection());
        assert_eq!(full.to_string(), "Request rejected by https://a (queue full)");

        let cfg = ConnectionError::configuration("solana", "no endpoints");
        assert!(!cfg.is_user_visible());
    }
}
