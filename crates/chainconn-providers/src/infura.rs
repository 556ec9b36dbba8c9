//! Infura provider profile.

use chainconn_core::endpoint::{CredentialRef, EndpointConfig};

/// Environment variable holding the project id.
pub const PROJECT_ID_ENV: &str = "INFURA_PROJECT_ID";

/// Free tier: 10 requests per second.
pub const FREE_TIER_PER_MINUTE: u32 = 600;

/// Infura endpoint for the given chain; the project id is filled in at connect time.
pub fn endpoint(chain_id: u64) -> EndpointConfig {
    EndpointConfig::new(http_url(chain_id))
        .with_credential(CredentialRef::env(PROJECT_ID_ENV))
        .with_rate_limit(FREE_TIER_PER_MINUTE)
        .with_burst(10)
}

pub fn http_url(chain_id: u64) -> String {
    let network = chain_id_to_network(chain_id);
    format!("https://{network}.infura.io/v3/{{api_key}}")
}

fn chain_id_to_network(chain_id: u64) -> &'static str {
    match chain_id {
        1 => "mainnet",
        11155111 => "sepolia",
        137 => "polygon-mainnet",
        80002 => "polygon-amoy",
        42161 => "arbitrum-mainnet",
        10 => "optimism-mainnet",
        8453 => "base-mainnet",
        _ => "mainnet",
    }
}
