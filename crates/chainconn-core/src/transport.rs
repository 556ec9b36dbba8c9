//! The `RpcTransport` trait and the factory that builds transports from configuration.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::NetworkConfig;
use crate::endpoint::EndpointConfig;
use crate::error::{ConnectionError, TransportError};
use crate::request::{JsonRpcRequest, JsonRpcResponse};

/// The async trait every RPC transport implements.
///
/// Implementations must be `Send + Sync` and are stored as `Arc<dyn RpcTransport>`.
/// Transports never retry on their own; retry policy belongs to the caller.
#[async_trait]
pub trait RpcTransport: Send + Sync + 'static {
    /// Send a single JSON-RPC request and return the response.
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError>;

    /// Send a batch of JSON-RPC requests.
    ///
    /// Default implementation sends them sequentially; override for true batching.
    async fn send_batch(
        &self,
        reqs: Vec<JsonRpcRequest>,
    ) -> Result<Vec<JsonRpcResponse>, TransportError> {
        let mut responses = Vec::with_capacity(reqs.len());
        for req in reqs {
            responses.push(self.send(req).await?);
        }
        Ok(responses)
    }

    /// GET a REST resource relative to the endpoint URL (Flow access nodes and similar).
    async fn fetch(&self, path: &str) -> Result<Value, TransportError> {
        Err(TransportError::Unsupported {
            url: self.url().to_string(),
            operation: format!("GET {path}"),
        })
    }

    /// The transport's identifier (URL).
    fn url(&self) -> &str;
}

/// Builds a live transport for one configured endpoint.
///
/// Called once per endpoint when a network connects. Credential resolution
/// happens here, so a missing credential surfaces as a configuration error
/// for that network only.
pub trait TransportFactory: Send + Sync + 'static {
    fn create(
        &self,
        network: &NetworkConfig,
        endpoint: &EndpointConfig,
    ) -> Result<Arc<dyn RpcTransport>, ConnectionError>;
}
