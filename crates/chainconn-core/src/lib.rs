//! chainconn-core: endpoint mediation for multi-chain RPC access.
//!
//! # Overview
//!
//! An application talks to several blockchain networks (EVM chains, Solana,
//! Flow), each reachable through a prioritized list of RPC endpoints. This
//! crate keeps one usable provider per network and shields callers from
//! endpoint failures and provider rate limits:
//!
//! - [`RateLimiter`]: per-endpoint token bucket with a bounded priority queue
//! - [`HealthMonitor`]: periodic liveness checks and the
//!   ACTIVE/DEGRADED/FAILED/RECOVERING state machine with backoff reconnection
//! - [`ConnectionPool`]: per-network endpoint set, ranked by priority, usage and latency
//! - [`ConnectionManager`]: connect, execute with failover, status, events
//!
//! Transports are pluggable through [`RpcTransport`] and [`TransportFactory`];
//! the `chainconn-http` crate provides the HTTP implementation.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use chainconn_core::{ConnectionConfig, ConnectionManager, Priority};
//! use chainconn_http::HttpTransportFactory;
//!
//! let config = ConnectionConfig::from_path("networks.yaml")?;
//! let manager = ConnectionManager::new(config, Arc::new(HttpTransportFactory::default()));
//! manager.connect("ethereum").await?;
//! let height = manager
//!     .execute("ethereum", Priority::High, |p| async move { p.block_height().await })
//!     .await?;
//! ```

pub mod adapter;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod health;
pub mod limiter;
pub mod manager;
pub mod policy;
pub mod pool;
pub mod provider;
pub mod request;
pub mod transport;

pub use adapter::{AdapterRegistry, ChainAdapter, EvmAdapter, FlowAdapter, SolanaAdapter};
pub use config::{
    ChainFamily, ConfigLoadError, ConnectionConfig, HealthConfig, LimiterConfig, NetworkConfig,
    PoolConfig, ReconnectionStrategy,
};
pub use endpoint::{CredentialRef, EndpointConfig, EndpointId};
pub use error::{ConnectionError, QueueRejection, TransportError};
pub use events::{NetworkEvent, NetworkEventKind};
pub use health::{
    EndpointHealth, EndpointStatus, HealthEvent, HealthEventKind, HealthMonitor, HealthProbe,
    HealthSample, ProbeSettings,
};
pub use limiter::{Priority, RateLimiter, ScheduledRequest};
pub use manager::{ConnectionManager, InitReport, NetworkConnectionStatus};
pub use pool::{ConnectionPool, EndpointReport};
pub use provider::ProviderHandle;
pub use request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RequestIds, RpcId};
pub use transport::{RpcTransport, TransportFactory};
