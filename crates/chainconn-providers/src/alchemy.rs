//! Alchemy provider profile.
//!
//! Rate limits: 300 CU/s on free tier, 660 CU/s on Growth, unlimited on Enterprise.
//! <https://docs.alchemy.com/reference/throughput>

use chainconn_core::endpoint::{CredentialRef, EndpointConfig};

use crate::average_method_cost;

/// Alchemy compute unit rates (free tier = 300 CU/s).
pub const FREE_TIER_CU_PER_SEC: u32 = 300;
pub const GROWTH_TIER_CU_PER_SEC: u32 = 660;

/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "ALCHEMY_API_KEY";

/// URL template for the HTTP JSON-RPC endpoint; `{api_key}` is filled in at connect time.
pub fn http_url(chain_id: u64) -> String {
    let network = chain_id_to_network(chain_id);
    format!("https://{network}.g.alchemy.com/v2/{{api_key}}")
}

/// Endpoint for an EVM chain on the free tier.
pub fn endpoint(chain_id: u64) -> EndpointConfig {
    endpoint_with_cu(chain_id, FREE_TIER_CU_PER_SEC)
}

/// Endpoint for an EVM chain with a custom CU rate.
pub fn endpoint_with_cu(chain_id: u64, cu_per_sec: u32) -> EndpointConfig {
    with_budget(EndpointConfig::new(http_url(chain_id)), cu_per_sec)
}

/// Solana mainnet-beta through Alchemy.
pub fn solana_endpoint() -> EndpointConfig {
    with_budget(
        EndpointConfig::new("https://solana-mainnet.g.alchemy.com/v2/{api_key}"),
        FREE_TIER_CU_PER_SEC,
    )
}

/// Convert a CU/s allowance into a request budget per minute at the average method cost.
pub fn requests_per_minute(cu_per_sec: u32) -> u32 {
    (cu_per_sec * 60 / average_method_cost()).max(1)
}

fn with_budget(endpoint: EndpointConfig, cu_per_sec: u32) -> EndpointConfig {
    endpoint
        .with_credential(CredentialRef::env(API_KEY_ENV))
        .with_rate_limit(requests_per_minute(cu_per_sec))
        .with_burst((cu_per_sec / average_method_cost()).max(1))
}

fn chain_id_to_network(chain_id: u64) -> &'static str {
    match chain_id {
        1 => "eth-mainnet",
        11155111 => "eth-sepolia",
        137 => "polygon-mainnet",
        80002 => "polygon-amoy",
        42161 => "arb-mainnet",
        421614 => "arb-sepolia",
        10 => "opt-mainnet",
        11155420 => "opt-sepolia",
        8453 => "base-mainnet",
        84532 => "base-sepolia",
        _ => "eth-mainnet",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_url_mainnet() {
        assert_eq!(http_url(1), "https://eth-mainnet.g.alchemy.com/v2/{api_key}");
    }

    #[test]
    fn http_url_arbitrum() {
        assert!(http_url(42161).contains("arb-mainnet"));
    }

    #[test]
    fn endpoint_requires_key_and_budgets_cu() {
        let ep = endpoint(8453);
        assert!(ep.requires_auth);
        assert_eq!(ep.credential, Some(CredentialRef::env(API_KEY_ENV)));
        assert!(ep.url.contains("base-mainnet"));
        assert_eq!(ep.max_requests_per_minute, requests_per_minute(FREE_TIER_CU_PER_SEC));
        assert!(endpoint_with_cu(1, GROWTH_TIER_CU_PER_SEC).max_requests_per_minute > ep.max_requests_per_minute);
    }
}
