//! Chain-family adapters: the few chain-specific calls the connection layer itself needs.
//!
//! An adapter knows how to ask an endpoint of its family "are you alive",
//! "what is your head" and "what is this account's balance". Everything
//! else goes through [`RpcTransport`] untouched.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::{ChainFamily, NetworkConfig};
use crate::error::{ConnectionError, TransportError};
use crate::request::{JsonRpcRequest, RequestIds};
use crate::transport::RpcTransport;

#[async_trait]
pub trait ChainAdapter: Send + Sync + 'static {
    fn family(&self) -> ChainFamily;

    /// Cheapest call that proves the endpoint answers. Defaults to a head query.
    async fn ping(&self, rpc: &dyn RpcTransport, ids: &RequestIds) -> Result<(), TransportError> {
        self.block_height(rpc, ids).await.map(|_| ())
    }

    /// Latest block height (slot on Solana, sealed height on Flow).
    async fn block_height(&self, rpc: &dyn RpcTransport, ids: &RequestIds) -> Result<u64, TransportError>;

    /// Native balance of `address` in the chain's smallest unit.
    async fn balance(
        &self,
        rpc: &dyn RpcTransport,
        ids: &RequestIds,
        address: &str,
    ) -> Result<u128, TransportError>;
}

async fn call(
    rpc: &dyn RpcTransport,
    ids: &RequestIds,
    method: &str,
    params: Vec<Value>,
) -> Result<Value, TransportError> {
    rpc.send(JsonRpcRequest::new(ids.next(), method, params))
        .await?
        .into_result()
        .map_err(TransportError::Rpc)
}

fn parse_hex_u128(v: &Value) -> Result<u128, TransportError> {
    let s = v
        .as_str()
        .ok_or_else(|| TransportError::Other(format!("expected hex string, got {v}")))?;
    u128::from_str_radix(s.strip_prefix("0x").unwrap_or(s), 16)
        .map_err(|e| TransportError::Other(format!("invalid hex quantity {s}: {e}")))
}

/// Accepts a JSON number or a decimal string.
fn parse_decimal_u128(v: &Value) -> Result<u128, TransportError> {
    match v {
        Value::Number(n) => n
            .as_u64()
            .map(u128::from)
            .ok_or_else(|| TransportError::Other(format!("invalid quantity {n}"))),
        Value::String(s) => s
            .parse()
            .map_err(|e| TransportError::Other(format!("invalid quantity {s}: {e}"))),
        other => Err(TransportError::Other(format!("expected quantity, got {other}"))),
    }
}

/// Ethereum and EVM-compatible chains.
#[derive(Debug, Default, Clone, Copy)]
pub struct EvmAdapter;

#[async_trait]
impl ChainAdapter for EvmAdapter {
    fn family(&self) -> ChainFamily {
        ChainFamily::Evm
    }

    async fn block_height(&self, rpc: &dyn RpcTransport, ids: &RequestIds) -> Result<u64, TransportError> {
        let v = call(rpc, ids, "eth_blockNumber", vec![]).await?;
        let h = parse_hex_u128(&v)?;
        u64::try_from(h).map_err(|_| TransportError::Other(format!("block number out of range: {h}")))
    }

    async fn balance(
        &self,
        rpc: &dyn RpcTransport,
        ids: &RequestIds,
        address: &str,
    ) -> Result<u128, TransportError> {
        let v = call(rpc, ids, "eth_getBalance", vec![json!(address), json!("latest")]).await?;
        parse_hex_u128(&v)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SolanaAdapter;

#[async_trait]
impl ChainAdapter for SolanaAdapter {
    fn family(&self) -> ChainFamily {
        ChainFamily::Solana
    }

    async fn ping(&self, rpc: &dyn RpcTransport, ids: &RequestIds) -> Result<(), TransportError> {
        match call(rpc, ids, "getHealth", vec![]).await? {
            Value::String(s) if s == "ok" => Ok(()),
            other => Err(TransportError::Other(format!("node unhealthy: {other}"))),
        }
    }

    async fn block_height(&self, rpc: &dyn RpcTransport, ids: &RequestIds) -> Result<u64, TransportError> {
        let v = call(rpc, ids, "getSlot", vec![]).await?;
        v.as_u64()
            .ok_or_else(|| TransportError::Other(format!("unexpected slot: {v}")))
    }

    async fn balance(
        &self,
        rpc: &dyn RpcTransport,
        ids: &RequestIds,
        address: &str,
    ) -> Result<u128, TransportError> {
        let v = call(rpc, ids, "getBalance", vec![json!(address)]).await?;
        // `{ "context": {...}, "value": lamports }`
        parse_decimal_u128(v.get("value").unwrap_or(&v))
    }
}

/// Flow access nodes, spoken to over their REST API.
#[derive(Debug, Default, Clone, Copy)]
pub struct FlowAdapter;

#[async_trait]
impl ChainAdapter for FlowAdapter {
    fn family(&self) -> ChainFamily {
        ChainFamily::Flow
    }

    async fn block_height(&self, rpc: &dyn RpcTransport, _ids: &RequestIds) -> Result<u64, TransportError> {
        let v = rpc.fetch("/v1/blocks?height=sealed").await?;
        let height = v
            .get(0)
            .and_then(|b| b.pointer("/header/height"))
            .ok_or_else(|| TransportError::Other(format!("unexpected block response: {v}")))?;
        let h = parse_decimal_u128(height)?;
        u64::try_from(h).map_err(|_| TransportError::Other(format!("height out of range: {h}")))
    }

    async fn balance(
        &self,
        rpc: &dyn RpcTransport,
        _ids: &RequestIds,
        address: &str,
    ) -> Result<u128, TransportError> {
        let address = address.strip_prefix("0x").unwrap_or(address);
        let v = rpc.fetch(&format!("/v1/accounts/{address}")).await?;
        let balance = v
            .get("balance")
            .ok_or_else(|| TransportError::Other(format!("unexpected account response: {v}")))?;
        parse_decimal_u128(balance)
    }
}

/// Resolves the adapter for a network: per-network override first, then by family.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    by_network: HashMap<String, Arc<dyn ChainAdapter>>,
    by_family: HashMap<ChainFamily, Arc<dyn ChainAdapter>>,
}

impl AdapterRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the EVM, Solana and Flow adapters installed.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_family(Arc::new(EvmAdapter));
        registry.register_family(Arc::new(SolanaAdapter));
        registry.register_family(Arc::new(FlowAdapter));
        registry
    }

    pub fn register_family(&mut self, adapter: Arc<dyn ChainAdapter>) {
        self.by_family.insert(adapter.family(), adapter);
    }

    /// Override the adapter for a single network.
    pub fn register(&mut self, network: impl Into<String>, adapter: Arc<dyn ChainAdapter>) {
        self.by_network.insert(network.into(), adapter);
    }

    pub fn resolve(&self, network: &NetworkConfig) -> Result<Arc<dyn ChainAdapter>, ConnectionError> {
        self.by_network
            .get(&network.name)
            .or_else(|| self.by_family.get(&network.chain))
            .cloned()
            .ok_or_else(|| {
                ConnectionError::configuration(
                    &network.name,
                    format!("no adapter registered for chain family '{}'", network.chain),
                )
            })
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("networks", &self.by_network.keys().collect::<Vec<_>>())
            .field("families", &self.by_family.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::JsonRpcResponse;
    use std::sync::Mutex;

    /// Answers every method from a fixed table and records what was asked.
    struct Scripted {
        answers: HashMap<&'static str, Value>,
        seen: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(answers: &[(&'static str, Value)]) -> Self {
            Self {
                answers: answers.iter().cloned().collect(),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RpcTransport for Scripted {
        async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
            self.seen.lock().unwrap().push(req.method.clone());
            let result = self
                .answers
                .get(req.method.as_str())
                .cloned()
                .ok_or_else(|| TransportError::Other(format!("unexpected {}", req.method)))?;
            Ok(JsonRpcResponse::success(req.id, result))
        }

        async fn fetch(&self, path: &str) -> Result<Value, TransportError> {
            self.seen.lock().unwrap().push(path.to_string());
            let key = if path.starts_with("/v1/blocks") { "blocks" } else { "account" };
            self.answers
                .get(key)
                .cloned()
                .ok_or_else(|| TransportError::Other(format!("unexpected {path}")))
        }

        fn url(&self) -> &str {
            "mock://scripted"
        }
    }

    #[tokio::test]
    async fn evm_decodes_hex_quantities() {
        let rpc = Scripted::new(&[
            ("eth_blockNumber", json!("0x12a05f2")),
            ("eth_getBalance", json!("0xde0b6b3a7640000")),
        ]);
        let ids = RequestIds::new();
        assert_eq!(EvmAdapter.block_height(&rpc, &ids).await.unwrap(), 19_531_250);
        assert_eq!(
            EvmAdapter.balance(&rpc, &ids, "0xabc").await.unwrap(),
            1_000_000_000_000_000_000
        );
        EvmAdapter.ping(&rpc, &ids).await.unwrap();
    }

    #[tokio::test]
    async fn solana_ping_uses_get_health() {
        let rpc = Scripted::new(&[
            ("getHealth", json!("ok")),
            ("getSlot", json!(250_000_000u64)),
            ("getBalance", json!({"context": {"slot": 1}, "value": 5_000_000_000u64})),
        ]);
        let ids = RequestIds::new();
        SolanaAdapter.ping(&rpc, &ids).await.unwrap();
        assert_eq!(SolanaAdapter.block_height(&rpc, &ids).await.unwrap(), 250_000_000);
        assert_eq!(SolanaAdapter.balance(&rpc, &ids, "So1").await.unwrap(), 5_000_000_000);
        assert_eq!(rpc.seen.lock().unwrap()[0], "getHealth");
    }

    #[tokio::test]
    async fn solana_unhealthy_node_fails_ping() {
        let rpc = Scripted::new(&[("getHealth", json!("behind"))]);
        assert!(SolanaAdapter.ping(&rpc, &RequestIds::new()).await.is_err());
    }

    #[tokio::test]
    async fn flow_uses_rest_paths() {
        let rpc = Scripted::new(&[
            ("blocks", json!([{"header": {"height": "74512345"}}])),
            ("account", json!({"address": "1654653399040a61", "balance": "100000"})),
        ]);
        let ids = RequestIds::new();
        assert_eq!(FlowAdapter.block_height(&rpc, &ids).await.unwrap(), 74_512_345);
        assert_eq!(
            FlowAdapter.balance(&rpc, &ids, "0x1654653399040a61").await.unwrap(),
            100_000
        );
        let seen = rpc.seen.lock().unwrap();
        assert_eq!(seen[1], "/v1/accounts/1654653399040a61");
    }

    #[test]
    fn registry_prefers_network_override() {
        struct Custom;
        #[async_trait]
        impl ChainAdapter for Custom {
            fn family(&self) -> ChainFamily {
                ChainFamily::Evm
            }
            async fn block_height(&self, _: &dyn RpcTransport, _: &RequestIds) -> Result<u64, TransportError> {
                Ok(7)
            }
            async fn balance(&self, _: &dyn RpcTransport, _: &RequestIds, _: &str) -> Result<u128, TransportError> {
                Ok(0)
            }
        }

        let mut registry = AdapterRegistry::with_defaults();
        registry.register("polygon", Arc::new(Custom));
        let polygon = NetworkConfig::new("polygon", ChainFamily::Evm);
        let ethereum = NetworkConfig::new("ethereum", ChainFamily::Evm);
        assert_eq!(registry.resolve(&polygon).unwrap().family(), ChainFamily::Evm);
        assert!(registry.resolve(&ethereum).is_ok());
        assert!(AdapterRegistry::new().resolve(&ethereum).is_err());
    }
}
