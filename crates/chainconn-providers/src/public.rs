//! Public / community RPC endpoints.
//!
//! These are free, no-API-key endpoints suitable for development and as the
//! last entries of a failover list. Rate limits are lower and reliability may vary.

use std::time::Duration;

use chainconn_core::endpoint::EndpointConfig;

/// Conservative budget for shared public endpoints: 5 req/s.
pub const PUBLIC_PER_MINUTE: u32 = 300;

fn conservative(url: &str) -> EndpointConfig {
    EndpointConfig::new(url)
        .with_rate_limit(PUBLIC_PER_MINUTE)
        .with_burst(5)
        .with_timeout(Duration::from_secs(15))
}

/// Cloudflare Ethereum gateway (Ethereum mainnet only).
pub fn cloudflare_mainnet() -> EndpointConfig {
    conservative("https://cloudflare-eth.com")
}

/// Ankr public RPC.
pub fn ankr(chain_id: u64) -> EndpointConfig {
    conservative(ankr_url(chain_id))
}

fn ankr_url(chain_id: u64) -> &'static str {
    match chain_id {
        1 => "https://rpc.ankr.com/eth",
        137 => "https://rpc.ankr.com/polygon",
        42161 => "https://rpc.ankr.com/arbitrum",
        10 => "https://rpc.ankr.com/optimism",
        8453 => "https://rpc.ankr.com/base",
        56 => "https://rpc.ankr.com/bsc",
        _ => "https://rpc.ankr.com/eth",
    }
}

/// LlamaNodes public RPC.
pub fn llama_rpc(chain_id: u64) -> EndpointConfig {
    let url = match chain_id {
        1 => "https://eth.llamarpc.com",
        137 => "https://polygon.llamarpc.com",
        _ => "https://eth.llamarpc.com",
    };
    conservative(url)
}

/// Solana Foundation mainnet-beta endpoint (100 req / 10 s per IP).
pub fn solana_mainnet() -> EndpointConfig {
    EndpointConfig::new("https://api.mainnet-beta.solana.com")
        .with_rate_limit(600)
        .with_burst(10)
}

pub fn solana_devnet() -> EndpointConfig {
    EndpointConfig::new("https://api.devnet.solana.com")
        .with_rate_limit(600)
        .with_burst(10)
}

/// Flow mainnet REST access API.
pub fn flow_mainnet() -> EndpointConfig {
    conservative("https://rest-mainnet.onflow.org")
}

pub fn flow_testnet() -> EndpointConfig {
    conservative("https://rest-testnet.onflow.org")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ankr_url_ethereum() {
        assert_eq!(ankr_url(1), "https://rpc.ankr.com/eth");
    }

    #[test]
    fn ankr_url_polygon() {
        assert_eq!(ankr_url(137), "https://rpc.ankr.com/polygon");
    }

    #[test]
    fn public_endpoints_need_no_credentials() {
        for ep in [cloudflare_mainnet(), llama_rpc(137), solana_mainnet(), flow_mainnet()] {
            assert!(!ep.requires_auth, "{}", ep.url);
            assert_eq!(ep.resolved_url("any").unwrap(), ep.url);
        }
    }
}
