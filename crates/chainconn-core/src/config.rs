//! Static network configuration table and component tuning knobs.
//!
//! The table is keyed by logical network name. It is loaded once (JSON or
//! YAML) and never written back; all runtime state is rebuilt from it.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::endpoint::EndpointConfig;
use crate::error::ConnectionError;

/// Chain family; selects the default [`ChainAdapter`](crate::adapter::ChainAdapter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainFamily {
    Evm,
    Solana,
    Flow,
}

impl std::fmt::Display for ChainFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Evm => write!(f, "evm"),
            Self::Solana => write!(f, "solana"),
            Self::Flow => write!(f, "flow"),
        }
    }
}

impl std::str::FromStr for ChainFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "evm" | "ethereum" => Ok(Self::Evm),
            "solana" => Ok(Self::Solana),
            "flow" => Ok(Self::Flow),
            other => Err(format!("unknown chain family: {other}")),
        }
    }
}

/// How a FAILED endpoint is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReconnectionStrategy {
    /// `min(base * 2^attempt, cap)` between attempts.
    #[default]
    ExponentialBackoff,
    /// First attempt right away, then once per health-check interval.
    Immediate,
}

/// One logical network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Logical name; filled from the table key when loaded from a file.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    pub chain: ChainFamily,
    /// Chain id (EVM) or cluster name (Solana, Flow).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<String>,
    /// Endpoints in preference order.
    pub endpoints: Vec<EndpointConfig>,
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,
    #[serde(default)]
    pub reconnection: ReconnectionStrategy,
}

fn default_health_check_interval_ms() -> u64 {
    30_000
}

impl NetworkConfig {
    pub fn new(name: impl Into<String>, chain: ChainFamily) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            chain,
            chain_id: None,
            endpoints: Vec::new(),
            health_check_interval_ms: default_health_check_interval_ms(),
            reconnection: ReconnectionStrategy::default(),
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn with_chain_id(mut self, chain_id: impl Into<String>) -> Self {
        self.chain_id = Some(chain_id.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: EndpointConfig) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_reconnection(mut self, strategy: ReconnectionStrategy) -> Self {
        self.reconnection = strategy;
        self
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    /// Check the entry is usable. Errors are scoped to this network.
    pub fn validate(&self, pool: &PoolConfig) -> Result<(), ConnectionError> {
        let fail = |reason: String| Err(ConnectionError::configuration(&self.name, reason));

        if self.name.is_empty() {
            return fail("network name is empty".into());
        }
        if self.endpoints.is_empty() {
            return fail("no endpoints configured".into());
        }
        if self.endpoints.len() > pool.max_size {
            return fail(format!(
                "{} endpoints exceed the pool limit of {}",
                self.endpoints.len(),
                pool.max_size
            ));
        }
        if self.health_check_interval_ms == 0 {
            return fail("health_check_interval_ms must be positive".into());
        }

        let mut seen = HashSet::new();
        for ep in &self.endpoints {
            if ep.url.trim().is_empty() {
                return fail("endpoint with empty url".into());
            }
            if !seen.insert(ep.url.as_str()) {
                return fail(format!("duplicate endpoint {}", ep.url));
            }
            if ep.max_requests_per_minute == 0 {
                return fail(format!("{}: max_requests_per_minute must be positive", ep.url));
            }
            if ep.burst_size == Some(0) {
                return fail(format!("{}: burst_size must be positive", ep.url));
            }
            if ep.timeout_ms == 0 {
                return fail(format!("{}: timeout_ms must be positive", ep.url));
            }
        }
        Ok(())
    }
}

/// Health monitor tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Consecutive failures before an endpoint is FAILED.
    pub failure_threshold: u32,
    /// Latency above which an ACTIVE endpoint is DEGRADED.
    pub high_latency_ms: u64,
    /// Error-rate EMA above which an ACTIVE endpoint is DEGRADED.
    pub degraded_error_rate: f64,
    /// Weight of the newest sample in the error-rate EMA.
    pub error_rate_weight: f64,
    /// Samples kept per endpoint.
    pub history_size: usize,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            high_latency_ms: 2_000,
            degraded_error_rate: 0.5,
            error_rate_weight: 0.3,
            history_size: 100,
            reconnect_base_ms: 1_000,
            reconnect_max_ms: 60_000,
        }
    }
}

/// Rate limiter tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterConfig {
    /// Queued requests per endpoint.
    pub max_queue_size: usize,
    /// Burst size for endpoints that do not set one (capped at the per-minute budget).
    pub default_burst_size: u32,
    /// Slack added to every computed token wait.
    pub dispatch_buffer_ms: u64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 100,
            default_burst_size: 10,
            dispatch_buffer_ms: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub max_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { max_size: 10 }
    }
}

/// The whole configuration table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkConfig>,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub limiter: LimiterConfig,
    #[serde(default)]
    pub pool: PoolConfig,
}

/// Failure to read a configuration file.
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("unsupported config format '{0}' (expected .json, .yaml or .yml)")]
    UnsupportedFormat(String),
}

impl ConnectionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a network entry.
    pub fn with_network(mut self, network: NetworkConfig) -> Self {
        self.networks.insert(network.name.clone(), network);
        self
    }

    pub fn network(&self, name: &str) -> Option<&NetworkConfig> {
        self.networks.get(name)
    }

    pub fn from_json_str(s: &str) -> Result<Self, ConfigLoadError> {
        Ok(serde_json::from_str::<Self>(s)?.normalized())
    }

    pub fn from_yaml_str(s: &str) -> Result<Self, ConfigLoadError> {
        Ok(serde_yaml::from_str::<Self>(s)?.normalized())
    }

    /// Load from a `.json`, `.yaml` or `.yml` file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        match ext.as_str() {
            "json" => Self::from_json_str(&text),
            "yaml" | "yml" => Self::from_yaml_str(&text),
            other => Err(ConfigLoadError::UnsupportedFormat(other.to_string())),
        }
    }

    /// Fill each entry's `name` (and empty `display_name`) from its table key.
    pub(crate) fn normalized(mut self) -> Self {
        for (key, net) in self.networks.iter_mut() {
            net.name = key.clone();
            if net.display_name.is_empty() {
                net.display_name = key.clone();
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
networks:
  ethereum:
    display_name: Ethereum Mainnet
    chain: evm
    chain_id: "1"
    reconnection: immediate
    endpoints:
      - url: https://cloudflare-eth.com
        priority: 2
      - url: https://eth-mainnet.g.alchemy.com/v2/{api_key}
        priority: 1
        credential: env:ALCHEMY_API_KEY
        requires_auth: true
        max_requests_per_minute: 600
  solana:
    chain: solana
    endpoints:
      - url: https://api.mainnet-beta.solana.com
health:
  failure_threshold: 5
"#;

    #[test]
    fn yaml_table_loads_with_defaults() {
        let cfg = ConnectionConfig::from_yaml_str(YAML).unwrap();
        assert_eq!(cfg.networks.len(), 2);

        let eth = cfg.network("ethereum").unwrap();
        assert_eq!(eth.name, "ethereum");
        assert_eq!(eth.display_name, "Ethereum Mainnet");
        assert_eq!(eth.reconnection, ReconnectionStrategy::Immediate);
        assert_eq!(eth.endpoints[1].max_requests_per_minute, 600);
        assert_eq!(eth.health_check_interval(), Duration::from_secs(30));

        let sol = cfg.network("solana").unwrap();
        assert_eq!(sol.display_name, "solana");
        assert_eq!(sol.reconnection, ReconnectionStrategy::ExponentialBackoff);

        assert_eq!(cfg.health.failure_threshold, 5);
        assert_eq!(cfg.health.history_size, 100);
        assert_eq!(cfg.limiter.max_queue_size, 100);
        assert_eq!(cfg.pool.max_size, 10);
    }

    #[test]
    fn json_and_yaml_agree() {
        let yaml = ConnectionConfig::from_yaml_str(YAML).unwrap();
        let json = serde_json::to_string(&yaml).unwrap();
        assert_eq!(ConnectionConfig::from_json_str(&json).unwrap(), yaml);
    }

    #[test]
    fn validate_rejects_empty_endpoint_list() {
        let net = NetworkConfig::new("flow", ChainFamily::Flow);
        let err = net.validate(&PoolConfig::default()).unwrap_err();
        assert!(err.to_string().contains("no endpoints"));
    }

    #[test]
    fn validate_rejects_duplicates_and_zero_budget() {
        let dup = NetworkConfig::new("ethereum", ChainFamily::Evm)
            .with_endpoint(EndpointConfig::new("https://a"))
            .with_endpoint(EndpointConfig::new("https://a"));
        assert!(dup.validate(&PoolConfig::default()).is_err());

        let zero = NetworkConfig::new("ethereum", ChainFamily::Evm)
            .with_endpoint(EndpointConfig::new("https://a").with_rate_limit(0));
        assert!(zero.validate(&PoolConfig::default()).is_err());
    }

    #[test]
    fn validate_enforces_pool_size() {
        let mut net = NetworkConfig::new("ethereum", ChainFamily::Evm);
        for i in 0..3 {
            net = net.with_endpoint(EndpointConfig::new(format!("https://rpc{i}")));
        }
        assert!(net.validate(&PoolConfig { max_size: 2 }).is_err());
        assert!(net.validate(&PoolConfig { max_size: 3 }).is_ok());
    }

    #[test]
    fn unknown_extension_rejected() {
        let dir = std::env::temp_dir().join("chainconn-config-test.toml");
        std::fs::write(&dir, "x = 1").unwrap();
        let err = ConnectionConfig::from_path(&dir).unwrap_err();
        assert!(matches!(err, ConfigLoadError::UnsupportedFormat(_)));
        let _ = std::fs::remove_file(dir);
    }

    #[test]
    fn chain_family_from_str() {
        assert_eq!("EVM".parse::<ChainFamily>().unwrap(), ChainFamily::Evm);
        assert!("cosmos".parse::<ChainFamily>().is_err());
    }
}
