//! A live, usable connection to one endpoint.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::adapter::ChainAdapter;
use crate::config::ChainFamily;
use crate::endpoint::{EndpointConfig, EndpointId};
use crate::error::TransportError;
use crate::health::HealthProbe;
use crate::request::{JsonRpcRequest, JsonRpcResponse, RequestIds};
use crate::transport::RpcTransport;

struct ProviderInner {
    id: EndpointId,
    config: EndpointConfig,
    chain: ChainFamily,
    transport: Arc<dyn RpcTransport>,
    adapter: Arc<dyn ChainAdapter>,
    ids: RequestIds,
}

/// Handle to a connected endpoint: its transport plus the chain adapter for its network.
///
/// Cheap to clone. Handles stay valid after failover; they just stop being
/// the one [`ConnectionManager::get_provider`](crate::ConnectionManager::get_provider) returns.
#[derive(Clone)]
pub struct ProviderHandle {
    inner: Arc<ProviderInner>,
}

impl ProviderHandle {
    pub fn new(
        id: EndpointId,
        config: EndpointConfig,
        chain: ChainFamily,
        transport: Arc<dyn RpcTransport>,
        adapter: Arc<dyn ChainAdapter>,
    ) -> Self {
        Self {
            inner: Arc::new(ProviderInner {
                id,
                config,
                chain,
                transport,
                adapter,
                ids: RequestIds::new(),
            }),
        }
    }

    pub fn id(&self) -> &EndpointId {
        &self.inner.id
    }

    /// The configured URL (with any `{api_key}` placeholder left in place).
    pub fn url(&self) -> &str {
        &self.inner.id.url
    }

    pub fn network(&self) -> &str {
        &self.inner.id.network
    }

    pub fn priority(&self) -> u32 {
        self.inner.config.priority
    }

    pub fn chain(&self) -> ChainFamily {
        self.inner.chain
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.inner.config
    }

    pub fn transport(&self) -> &Arc<dyn RpcTransport> {
        &self.inner.transport
    }

    /// Send a prepared request as-is.
    pub async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        self.inner.transport.send(req).await
    }

    /// Call `method` with a fresh request id and unwrap the result.
    pub async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value, TransportError> {
        let req = JsonRpcRequest::new(self.inner.ids.next(), method, params);
        self.inner
            .transport
            .send(req)
            .await?
            .into_result()
            .map_err(TransportError::Rpc)
    }

    /// GET a REST resource relative to the endpoint.
    pub async fn fetch(&self, path: &str) -> Result<Value, TransportError> {
        self.inner.transport.fetch(path).await
    }

    pub async fn ping(&self) -> Result<(), TransportError> {
        self.inner.adapter.ping(self.inner.transport.as_ref(), &self.inner.ids).await
    }

    pub async fn block_height(&self) -> Result<u64, TransportError> {
        self.inner
            .adapter
            .block_height(self.inner.transport.as_ref(), &self.inner.ids)
            .await
    }

    pub async fn balance(&self, address: &str) -> Result<u128, TransportError> {
        self.inner
            .adapter
            .balance(self.inner.transport.as_ref(), &self.inner.ids, address)
            .await
    }
}

#[async_trait]
impl HealthProbe for ProviderHandle {
    async fn probe(&self) -> Result<(), TransportError> {
        self.ping().await
    }
}

impl std::fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderHandle")
            .field("endpoint", &self.inner.id)
            .field("chain", &self.inner.chain)
            .field("priority", &self.inner.config.priority)
            .finish()
    }
}
