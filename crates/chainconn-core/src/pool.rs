//! Per-network connection pool with priority/health/latency selection.
//!
//! The pool is the single place endpoints are added to or removed from a
//! network. Adding an endpoint registers it with the network's
//! [`HealthMonitor`] and [`RateLimiter`]; removing it deregisters it from
//! both, so the three never disagree about which endpoints exist.

use std::sync::{Arc, RwLock};

use futures::future::join_all;
use serde::Serialize;

use crate::endpoint::EndpointId;
use crate::error::ConnectionError;
use crate::health::{EndpointHealth, HealthMonitor, ProbeSettings};
use crate::limiter::RateLimiter;
use crate::provider::ProviderHandle;

struct PoolEntry {
    handle: ProviderHandle,
    in_use: bool,
}

/// Snapshot of one pooled endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointReport {
    pub url: String,
    pub priority: u32,
    pub in_use: bool,
    pub health: EndpointHealth,
    pub queue_len: usize,
    pub available_tokens: f64,
}

/// Endpoints of one network plus the monitor and limiter that watch them.
pub struct ConnectionPool {
    network: String,
    max_size: usize,
    monitor: HealthMonitor,
    limiter: RateLimiter,
    entries: RwLock<Vec<PoolEntry>>,
}

impl ConnectionPool {
    pub fn new(
        network: impl Into<String>,
        max_size: usize,
        monitor: HealthMonitor,
        limiter: RateLimiter,
    ) -> Self {
        Self {
            network: network.into(),
            max_size,
            monitor,
            limiter,
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn monitor(&self) -> &HealthMonitor {
        &self.monitor
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add an endpoint and register it with the monitor and the limiter.
    ///
    /// Either all three registrations happen or none do.
    pub async fn add_endpoint(
        &self,
        handle: ProviderHandle,
        probe: ProbeSettings,
    ) -> Result<(), ConnectionError> {
        {
            let entries = self.entries.read().unwrap();
            if entries.len() >= self.max_size {
                return Err(ConnectionError::PoolCapacity {
                    network: self.network.clone(),
                    max: self.max_size,
                });
            }
            if entries.iter().any(|e| e.handle.url() == handle.url()) {
                return Err(ConnectionError::DuplicateEndpoint {
                    url: handle.url().to_string(),
                });
            }
        }

        let id = handle.id().clone();
        let config = handle.config();
        self.limiter
            .register_endpoint(id.clone(), config.max_requests_per_minute, config.burst_size)?;
        if let Err(e) = self
            .monitor
            .register_endpoint(id.clone(), Arc::new(handle.clone()), probe)
        {
            let _ = self.limiter.unregister_endpoint(&id).await;
            return Err(e);
        }

        tracing::debug!(
            network = %self.network,
            url = %handle.url(),
            priority = handle.priority(),
            "endpoint added to pool"
        );
        self.entries.write().unwrap().push(PoolEntry {
            handle,
            in_use: false,
        });
        Ok(())
    }

    /// Remove an endpoint, rejecting anything still queued on it.
    pub async fn remove_endpoint(&self, url: &str) -> Result<ProviderHandle, ConnectionError> {
        let entry = {
            let mut entries = self.entries.write().unwrap();
            let pos = entries
                .iter()
                .position(|e| e.handle.url() == url)
                .ok_or_else(|| ConnectionError::UnknownEndpoint { url: url.to_string() })?;
            entries.remove(pos)
        };
        let id = entry.handle.id();
        let rejected = self.limiter.unregister_endpoint(id).await.unwrap_or(0);
        let _ = self.monitor.unregister_endpoint(id).await;
        tracing::debug!(network = %self.network, url, rejected, "endpoint removed from pool");
        Ok(entry.handle)
    }

    pub fn get(&self, url: &str) -> Option<ProviderHandle> {
        self.entries
            .read()
            .unwrap()
            .iter()
            .find(|e| e.handle.url() == url)
            .map(|e| e.handle.clone())
    }

    pub fn handles(&self) -> Vec<ProviderHandle> {
        self.entries.read().unwrap().iter().map(|e| e.handle.clone()).collect()
    }

    /// Healthy endpoints, best first: priority, then not-in-use, then latency.
    pub fn list_healthy(&self) -> Vec<ProviderHandle> {
        self.ranked(None)
    }

    /// The best healthy endpoint.
    pub fn acquire(&self) -> Result<ProviderHandle, ConnectionError> {
        self.acquire_excluding(None)
    }

    /// The best healthy endpoint other than `exclude`.
    pub fn acquire_excluding(&self, exclude: Option<&str>) -> Result<ProviderHandle, ConnectionError> {
        self.ranked(exclude)
            .into_iter()
            .next()
            .ok_or_else(|| ConnectionError::NoHealthyProvider {
                network: self.network.clone(),
            })
    }

    fn ranked(&self, exclude: Option<&str>) -> Vec<ProviderHandle> {
        let entries = self.entries.read().unwrap();
        let mut candidates: Vec<(u32, bool, u64, &PoolEntry)> = entries
            .iter()
            .filter(|e| Some(e.handle.url()) != exclude)
            .filter_map(|e| {
                let health = self.monitor.health(e.handle.id())?;
                health.is_healthy.then(|| {
                    (
                        e.handle.priority(),
                        e.in_use,
                        health.response_time_ms.unwrap_or(u64::MAX),
                        e,
                    )
                })
            })
            .collect();
        candidates.sort_by_key(|(priority, in_use, latency, _)| (*priority, *in_use, *latency));
        candidates.into_iter().map(|(_, _, _, e)| e.handle.clone()).collect()
    }

    /// Mark `url` as the endpoint currently serving traffic (`None` clears).
    pub fn set_in_use(&self, url: Option<&str>) {
        for entry in self.entries.write().unwrap().iter_mut() {
            entry.in_use = Some(entry.handle.url()) == url;
        }
    }

    /// Start periodic health checks for every endpoint.
    pub fn start_monitoring(&self) -> Result<(), ConnectionError> {
        for handle in self.handles() {
            self.monitor.start(handle.id())?;
        }
        Ok(())
    }

    /// Check every endpoint once, concurrently.
    pub async fn check_all(&self) -> Vec<(String, Result<EndpointHealth, ConnectionError>)> {
        let handles = self.handles();
        let checks = handles.iter().map(|h| self.monitor.check_endpoint(h.id()));
        let results = join_all(checks).await;
        handles
            .iter()
            .map(|h| h.url().to_string())
            .zip(results)
            .collect()
    }

    pub fn report(&self) -> Vec<EndpointReport> {
        let entries = self.entries.read().unwrap();
        entries
            .iter()
            .map(|e| {
                let id: &EndpointId = e.handle.id();
                EndpointReport {
                    url: e.handle.url().to_string(),
                    priority: e.handle.priority(),
                    in_use: e.in_use,
                    health: self.monitor.health(id).unwrap_or_default(),
                    queue_len: self.limiter.queue_len(id).unwrap_or(0),
                    available_tokens: self.limiter.available_tokens(id).unwrap_or(0.0),
                }
            })
            .collect()
    }

    /// Remove every endpoint.
    pub async fn close(&self) {
        let urls: Vec<String> = self
            .entries
            .read()
            .unwrap()
            .iter()
            .map(|e| e.handle.url().to_string())
            .collect();
        for url in urls {
            let _ = self.remove_endpoint(&url).await;
        }
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("network", &self.network)
            .field("endpoints", &self.len())
            .field("max_size", &self.max_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::EvmAdapter;
    use crate::config::{ChainFamily, HealthConfig, LimiterConfig, ReconnectionStrategy};
    use crate::endpoint::EndpointConfig;
    use crate::error::TransportError;
    use crate::policy::BackoffPolicy;
    use crate::request::{JsonRpcRequest, JsonRpcResponse};
    use crate::transport::RpcTransport;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct Node {
        url: String,
        up: AtomicBool,
        delay: Duration,
    }

    #[async_trait]
    impl RpcTransport for Node {
        async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
            tokio::time::sleep(self.delay).await;
            if self.up.load(Ordering::SeqCst) {
                Ok(JsonRpcResponse::success(req.id, serde_json::json!("0x10")))
            } else {
                Err(TransportError::Http("connection refused".into()))
            }
        }

        fn url(&self) -> &str {
            &self.url
        }
    }

    fn node(url: &str, delay_ms: u64) -> Arc<Node> {
        Arc::new(Node {
            url: url.to_string(),
            up: AtomicBool::new(true),
            delay: Duration::from_millis(delay_ms),
        })
    }

    fn handle(node: &Arc<Node>, priority: u32) -> ProviderHandle {
        ProviderHandle::new(
            EndpointId::new("ethereum", node.url.clone()),
            EndpointConfig::new(node.url.clone()).with_priority(priority),
            ChainFamily::Evm,
            node.clone(),
            Arc::new(EvmAdapter),
        )
    }

    fn probe() -> ProbeSettings {
        let interval = Duration::from_secs(30);
        ProbeSettings {
            timeout: Duration::from_secs(5),
            interval,
            backoff: BackoffPolicy::new(
                ReconnectionStrategy::ExponentialBackoff,
                &HealthConfig::default(),
                interval,
            ),
        }
    }

    fn pool(max: usize) -> ConnectionPool {
        let (monitor, _rx) = HealthMonitor::with_channel(HealthConfig::default(), 64);
        ConnectionPool::new("ethereum", max, monitor, RateLimiter::new(LimiterConfig::default()))
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_prefers_priority_then_falls_over() {
        let pool = pool(10);
        let a = node("https://a", 5);
        let b = node("https://b", 5);
        pool.add_endpoint(handle(&b, 2), probe()).await.unwrap();
        pool.add_endpoint(handle(&a, 1), probe()).await.unwrap();

        assert_eq!(pool.acquire().unwrap().url(), "https://a");

        a.up.store(false, Ordering::SeqCst);
        for _ in 0..3 {
            pool.check_all().await;
        }
        assert_eq!(pool.acquire().unwrap().url(), "https://b");
        assert_eq!(pool.list_healthy().len(), 1);

        b.up.store(false, Ordering::SeqCst);
        for _ in 0..3 {
            pool.check_all().await;
        }
        assert!(pool.acquire().unwrap_err().is_no_provider());
    }

    #[tokio::test(start_paused = true)]
    async fn equal_priority_ranks_idle_then_fast() {
        let pool = pool(10);
        let slow = node("https://slow", 300);
        let fast = node("https://fast", 20);
        pool.add_endpoint(handle(&slow, 1), probe()).await.unwrap();
        pool.add_endpoint(handle(&fast, 1), probe()).await.unwrap();
        pool.check_all().await;

        assert_eq!(pool.acquire().unwrap().url(), "https://fast");
        pool.set_in_use(Some("https://fast"));
        assert_eq!(pool.acquire().unwrap().url(), "https://slow");
        assert_eq!(
            pool.acquire_excluding(Some("https://slow")).unwrap().url(),
            "https://fast"
        );
    }

    #[tokio::test]
    async fn capacity_and_duplicates_rejected() {
        let small = pool(1);
        let a = node("https://a", 0);
        small.add_endpoint(handle(&a, 1), probe()).await.unwrap();
        let full = small.add_endpoint(handle(&a, 1), probe()).await.unwrap_err();
        assert!(matches!(full, ConnectionError::PoolCapacity { max: 1, .. }));

        let pool = pool(5);
        pool.add_endpoint(handle(&a, 1), probe()).await.unwrap();
        let dup = pool.add_endpoint(handle(&a, 2), probe()).await.unwrap_err();
        assert!(matches!(dup, ConnectionError::DuplicateEndpoint { .. }));
    }

    #[tokio::test]
    async fn add_then_remove_leaves_no_residue() {
        let pool = pool(10);
        let a = node("https://a", 0);
        let h = handle(&a, 1);
        let id = h.id().clone();
        pool.add_endpoint(h, probe()).await.unwrap();
        assert!(pool.limiter().is_registered(&id));
        assert!(pool.monitor().is_registered(&id));

        pool.remove_endpoint("https://a").await.unwrap();
        assert!(pool.is_empty());
        assert!(!pool.limiter().is_registered(&id));
        assert!(!pool.monitor().is_registered(&id));
        assert!(pool.report().is_empty());
    }

    #[tokio::test]
    async fn zero_rate_limit_rejected_before_registration() {
        let pool = pool(10);
        let a = node("https://a", 0);
        let id = EndpointId::new("ethereum", "https://a");
        let h = ProviderHandle::new(
            id.clone(),
            EndpointConfig::new("https://a").with_rate_limit(0),
            ChainFamily::Evm,
            a.clone(),
            Arc::new(EvmAdapter),
        );
        let err = pool.add_endpoint(h, probe()).await.unwrap_err();
        assert!(matches!(err, ConnectionError::Configuration { .. }));
        assert!(pool.is_empty());
        assert!(!pool.limiter().is_registered(&id));
        assert!(!pool.monitor().is_registered(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn close_after_failed_start_stops_everything() {
        let pool = pool(10);
        let a = node("https://a", 0);
        let b = node("https://b", 0);
        let (ha, hb) = (handle(&a, 1), handle(&b, 2));
        let (ida, idb) = (ha.id().clone(), hb.id().clone());
        pool.add_endpoint(ha, probe()).await.unwrap();
        pool.add_endpoint(hb, probe()).await.unwrap();

        // b vanished from the monitor behind the pool's back.
        pool.monitor().unregister_endpoint(&idb).await.unwrap();
        let err = pool.start_monitoring().unwrap_err();
        assert!(matches!(err, ConnectionError::UnknownEndpoint { .. }));

        pool.close().await;
        assert!(pool.is_empty());
        for id in [&ida, &idb] {
            assert!(!pool.limiter().is_registered(id));
            assert!(!pool.monitor().is_registered(id));
        }
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(pool.monitor().health(&ida).is_none());
    }
}
