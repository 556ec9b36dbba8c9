//! chainconn-providers: built-in network table and provider profiles.
//!
//! Each provider module knows the URL template, rate limits (compute units)
//! and supported chain IDs for a specific RPC service, and produces
//! [`EndpointConfig`]s. [`default_config`] assembles them into a ready
//! [`ConnectionConfig`] for Ethereum, Polygon, Solana and Flow.
//!
//! # Quick start
//! ```rust,no_run
//! use std::sync::Arc;
//! use chainconn_core::ConnectionManager;
//! use chainconn_http::HttpTransportFactory;
//!
//! let manager = ConnectionManager::new(
//!     chainconn_providers::default_config(),
//!     Arc::new(HttpTransportFactory::default()),
//! );
//! ```

use chainconn_core::config::{ChainFamily, ConnectionConfig, NetworkConfig};
use chainconn_core::endpoint::EndpointConfig;

pub mod alchemy;
pub mod infura;
pub mod public;
pub mod quicknode;

/// Compute unit costs for common Ethereum JSON-RPC methods.
/// Used by provider profiles to size per-minute request budgets.
pub const ETH_METHOD_COSTS: &[(&str, u32)] = &[
    ("eth_blockNumber", 10),
    ("eth_getBalance", 19),
    ("eth_getTransactionCount", 26),
    ("eth_call", 26),
    ("eth_estimateGas", 87),
    ("eth_sendRawTransaction", 250),
    ("eth_getTransactionReceipt", 15),
    ("eth_getBlockByNumber", 16),
    ("eth_getLogs", 75),
    ("eth_subscribe", 10),
    ("eth_getCode", 19),
    ("eth_getStorageAt", 17),
];

/// Compute units of `method`, if known.
pub fn method_cost(method: &str) -> Option<u32> {
    ETH_METHOD_COSTS
        .iter()
        .find(|(m, _)| *m == method)
        .map(|(_, cost)| *cost)
}

/// Mean cost over [`ETH_METHOD_COSTS`].
pub fn average_method_cost() -> u32 {
    let total: u32 = ETH_METHOD_COSTS.iter().map(|(_, c)| c).sum();
    total / ETH_METHOD_COSTS.len() as u32
}

fn with_priorities(mut network: NetworkConfig, endpoints: Vec<EndpointConfig>) -> NetworkConfig {
    for (rank, endpoint) in endpoints.into_iter().enumerate() {
        network = network.with_endpoint(endpoint.with_priority(rank as u32 + 1));
    }
    network
}

/// Ethereum mainnet: Alchemy, Infura, then public gateways.
pub fn ethereum() -> NetworkConfig {
    with_priorities(
        NetworkConfig::new("ethereum", ChainFamily::Evm)
            .with_display_name("Ethereum Mainnet")
            .with_chain_id("1"),
        vec![
            alchemy::endpoint(1),
            infura::endpoint(1),
            public::cloudflare_mainnet(),
            public::ankr(1),
            public::llama_rpc(1),
        ],
    )
}

pub fn polygon() -> NetworkConfig {
    with_priorities(
        NetworkConfig::new("polygon", ChainFamily::Evm)
            .with_display_name("Polygon PoS")
            .with_chain_id("137"),
        vec![
            alchemy::endpoint(137),
            infura::endpoint(137),
            public::ankr(137),
            public::llama_rpc(137),
        ],
    )
}

pub fn solana() -> NetworkConfig {
    with_priorities(
        NetworkConfig::new("solana", ChainFamily::Solana)
            .with_display_name("Solana Mainnet Beta")
            .with_chain_id("mainnet-beta"),
        vec![alchemy::solana_endpoint(), public::solana_mainnet()],
    )
}

pub fn flow() -> NetworkConfig {
    with_priorities(
        NetworkConfig::new("flow", ChainFamily::Flow)
            .with_display_name("Flow Mainnet")
            .with_chain_id("flow-mainnet"),
        vec![public::flow_mainnet()],
    )
}

/// Drop endpoints whose credential is not available in this environment.
fn usable(mut network: NetworkConfig) -> NetworkConfig {
    let name = network.name.clone();
    network.endpoints.retain(|ep| match ep.resolve_credential(&name) {
        Ok(_) => true,
        Err(e) => {
            tracing::debug!(network = %name, url = %ep.url, error = %e, "skipping endpoint without credential");
            false
        }
    });
    network
}

/// The built-in network table.
///
/// Keyed endpoints (Alchemy, Infura) are only included when their API key
/// is set in the environment; the public gateways are always present.
pub fn default_config() -> ConnectionConfig {
    ConnectionConfig::new()
        .with_network(usable(ethereum()))
        .with_network(usable(polygon()))
        .with_network(usable(solana()))
        .with_network(usable(flow()))
}
