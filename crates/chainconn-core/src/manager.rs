//! Top-level connection management across networks.
//!
//! Each connected network owns a [`ConnectionPool`] (and through it a
//! [`HealthMonitor`] and a [`RateLimiter`]), the currently active
//! [`ProviderHandle`], and one task consuming the monitor's health events.
//! That task is the only writer of the active provider after `connect`
//! returns, so failover, failback and queue hand-over never race each other.
//!
//! ```text
//!  execute(network, priority, op)
//!     │
//!     ▼
//!  RateLimiter queue of the active endpoint ──▶ op(active provider at dispatch time)
//!                    ▲                                   │ outcome
//!      transfer on   │                                   ▼
//!      failover      │                           HealthMonitor ──events──▶ network task
//!                    └────────────────────────────────────────────────────── switch / notify
//! ```

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::adapter::AdapterRegistry;
use crate::config::{ChainFamily, ConnectionConfig, NetworkConfig};
use crate::endpoint::EndpointId;
use crate::error::{ConnectionError, TransportError};
use crate::events::{NetworkEvent, NetworkEventKind};
use crate::health::{EndpointStatus, HealthEvent, HealthEventKind, HealthMonitor, HealthSample, ProbeSettings};
use crate::limiter::{Priority, RateLimiter, ScheduledRequest};
use crate::policy::BackoffPolicy;
use crate::pool::{ConnectionPool, EndpointReport};
use crate::provider::ProviderHandle;
use crate::transport::TransportFactory;

const HEALTH_EVENT_BUFFER: usize = 64;
const NETWORK_EVENT_BUFFER: usize = 256;

/// Point-in-time view of one network.
#[derive(Debug, Clone, Serialize)]
pub struct NetworkConnectionStatus {
    pub network: String,
    pub display_name: String,
    pub chain: ChainFamily,
    /// Whether the network currently has an active provider.
    pub connected: bool,
    pub active_endpoint: Option<String>,
    pub healthy_endpoints: usize,
    pub endpoints: Vec<EndpointReport>,
    pub provider_switches: u64,
    pub connected_at: Option<DateTime<Utc>>,
}

/// Outcome of [`ConnectionManager::initialize`].
#[derive(Debug, Default)]
pub struct InitReport {
    pub connected: Vec<String>,
    pub failed: Vec<(String, ConnectionError)>,
}

impl InitReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

struct NetworkState {
    config: NetworkConfig,
    pool: ConnectionPool,
    active: RwLock<Option<ProviderHandle>>,
    events: broadcast::Sender<NetworkEvent>,
    event_task: Mutex<Option<JoinHandle<()>>>,
    switches: AtomicU64,
    connected_at: DateTime<Utc>,
}

impl NetworkState {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn current(&self) -> Option<ProviderHandle> {
        self.active.read().unwrap().clone()
    }

    fn emit(&self, event: NetworkEvent) {
        tracing::debug!(network = %event.network, kind = %event.kind, "network event");
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn status_of(&self, id: &EndpointId) -> Option<EndpointStatus> {
        self.pool.monitor().health(id).map(|h| h.status)
    }

    /// Make `next` the active provider, moving queued work over from the old
    /// one. Coming back from no provider, work left on any endpoint moves.
    fn switch_to(&self, next: ProviderHandle, reason: Option<String>) {
        let previous = self.active.write().unwrap().replace(next.clone());
        self.pool.set_in_use(Some(next.url()));

        let Some(previous) = previous else {
            let moved: usize = self
                .pool
                .handles()
                .iter()
                .filter(|h| h.id() != next.id())
                .map(|h| self.pool.limiter().transfer(h.id(), next.id()))
                .sum();
            tracing::info!(network = %self.name(), url = %next.url(), moved, "network connected");
            self.emit(NetworkEvent::new(NetworkEventKind::NetworkConnected, self.name()).with_endpoint(next.url()));
            return;
        };
        if previous.url() == next.url() {
            return;
        }

        let moved = self.pool.limiter().transfer(previous.id(), next.id());
        self.switches.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            network = %self.name(),
            from = %previous.url(),
            to = %next.url(),
            moved,
            reason = reason.as_deref().unwrap_or(""),
            "switching provider"
        );
        let mut event = NetworkEvent::new(NetworkEventKind::ProviderSwitched, self.name())
            .with_endpoint(next.url())
            .with_previous(Some(previous.url().to_string()));
        if let Some(reason) = reason {
            event = event.with_error(reason);
        }
        self.emit(event);
    }

    fn lose_provider(&self, error: Option<String>) {
        let previous = self.active.write().unwrap().take();
        self.pool.set_in_use(None);
        tracing::error!(
            network = %self.name(),
            last = previous.as_ref().map(|p| p.url()).unwrap_or(""),
            "no healthy provider left"
        );
        let mut event = NetworkEvent::new(NetworkEventKind::NetworkDisconnected, self.name());
        if let Some(previous) = previous {
            event = event.with_endpoint(previous.url());
        }
        if let Some(error) = error {
            event = event.with_error(error);
        }
        self.emit(event);
    }

    fn on_health_event(&self, event: HealthEvent) {
        let active = self.current();
        let is_active = active.as_ref().map(|a| a.id()) == Some(&event.endpoint);

        match event.kind {
            HealthEventKind::Failed if is_active => {
                match self.pool.acquire_excluding(Some(&event.endpoint.url)) {
                    Ok(next) => self.switch_to(next, event.error),
                    Err(_) => self.lose_provider(event.error),
                }
            }
            HealthEventKind::Failed => {
                tracing::debug!(network = %self.name(), url = %event.endpoint.url, "standby endpoint failed");
            }
            HealthEventKind::Degraded => {
                let mut notice = NetworkEvent::new(NetworkEventKind::HealthDegraded, self.name())
                    .with_endpoint(&event.endpoint.url);
                if let Some(error) = &event.error {
                    notice = notice.with_error(error.clone());
                }
                self.emit(notice);
                if is_active {
                    self.move_off_degraded(&event.endpoint);
                }
            }
            HealthEventKind::HighLatency => {
                tracing::debug!(
                    network = %self.name(),
                    url = %event.endpoint.url,
                    latency_ms = event.response_time_ms.unwrap_or(0),
                    "endpoint still slow"
                );
                if is_active {
                    self.move_off_degraded(&event.endpoint);
                }
            }
            HealthEventKind::Recovered => self.on_recovered(&event.endpoint),
        }
    }

    /// Re-run selection with the degraded endpoint marked in use. Only a
    /// fully ACTIVE peer of equal or better rank replaces it.
    fn move_off_degraded(&self, degraded: &EndpointId) {
        let Ok(candidate) = self.pool.acquire() else { return };
        if candidate.id() != degraded && self.status_of(candidate.id()) == Some(EndpointStatus::Active) {
            self.switch_to(candidate, Some(format!("{} degraded", degraded.url)));
        }
    }

    fn on_recovered(&self, recovered: &EndpointId) {
        let Some(handle) = self.pool.get(&recovered.url) else { return };
        match self.current() {
            None => {
                tracing::info!(network = %self.name(), url = %recovered.url, "endpoint recovered; reconnecting");
                self.switch_to(handle, None);
            }
            Some(active) if handle.priority() < active.priority() => {
                self.switch_to(handle, Some(format!("{} recovered", recovered.url)));
            }
            Some(active) if active.id() == recovered && self.status_of(active.id()) == Some(EndpointStatus::Active) => {
                tracing::info!(network = %self.name(), url = %recovered.url, "active endpoint healthy again");
            }
            Some(_) => {}
        }
    }
}

/// Queue `op` on `endpoint`'s limiter and run it against the active provider
/// once a token is granted. If a different endpoint is active by then, the
/// request queues again on that endpoint, so the call is always paid for by
/// the bucket of the endpoint that serves it.
fn dispatch<F, Fut, T>(
    state: Arc<NetworkState>,
    endpoint: EndpointId,
    priority: Priority,
    op: F,
) -> ScheduledRequest<T>
where
    F: FnOnce(ProviderHandle) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, TransportError>> + Send + 'static,
    T: Send + 'static,
{
    let limiter = state.pool.limiter().clone();
    limiter.schedule_with_endpoint(&endpoint, priority, move |charged| async move {
        let provider = state.current().ok_or_else(|| ConnectionError::NoHealthyProvider {
            network: state.name().to_string(),
        })?;
        if provider.id() != &charged {
            tracing::debug!(
                network = %state.name(),
                from = %charged.url,
                to = %provider.url(),
                "request follows the active provider"
            );
            let next = provider.id().clone();
            return dispatch(state, next, priority, op).await;
        }
        let started = Instant::now();
        let result = op(provider.clone()).await;
        state
            .pool
            .monitor()
            .record_outcome(provider.id(), started.elapsed(), result.as_ref().map(|_| ()))
            .await;
        result.map_err(ConnectionError::from)
    })
}

async fn consume_health_events(state: Weak<NetworkState>, mut rx: mpsc::Receiver<HealthEvent>) {
    while let Some(event) = rx.recv().await {
        let Some(state) = state.upgrade() else { break };
        state.on_health_event(event);
    }
}

struct ManagerInner {
    config: ConnectionConfig,
    factory: Arc<dyn TransportFactory>,
    adapters: AdapterRegistry,
    networks: RwLock<HashMap<String, Arc<NetworkState>>>,
    /// Serializes connect/disconnect per network.
    locks: HashMap<String, Arc<tokio::sync::Mutex<()>>>,
    events: broadcast::Sender<NetworkEvent>,
}

/// Entry point: connects networks, hands out providers and runs requests with failover.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl ConnectionManager {
    /// Manager with the default EVM/Solana/Flow adapters.
    pub fn new(config: ConnectionConfig, factory: Arc<dyn TransportFactory>) -> Self {
        Self::with_adapters(config, factory, AdapterRegistry::with_defaults())
    }

    pub fn with_adapters(
        config: ConnectionConfig,
        factory: Arc<dyn TransportFactory>,
        adapters: AdapterRegistry,
    ) -> Self {
        let config = config.normalized();
        let locks = config
            .networks
            .keys()
            .map(|name| (name.clone(), Arc::new(tokio::sync::Mutex::new(()))))
            .collect();
        let (events, _) = broadcast::channel(NETWORK_EVENT_BUFFER);
        Self {
            inner: Arc::new(ManagerInner {
                config,
                factory,
                adapters,
                networks: RwLock::new(HashMap::new()),
                locks,
                events,
            }),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// Receive `provider:switched`, `network:connected`, `network:disconnected`
    /// and `health:degraded` notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<NetworkEvent> {
        self.inner.events.subscribe()
    }

    /// Connect every configured network. One network failing does not stop the others.
    pub async fn initialize(&self) -> InitReport {
        let names: Vec<String> = self.inner.config.networks.keys().cloned().collect();
        let results = join_all(names.iter().map(|name| self.connect(name))).await;

        let mut report = InitReport::default();
        for (name, result) in names.into_iter().zip(results) {
            match result {
                Ok(_) => report.connected.push(name),
                Err(e) => {
                    tracing::warn!(network = %name, error = %e, "network failed to connect");
                    report.failed.push((name, e));
                }
            }
        }
        tracing::info!(
            connected = report.connected.len(),
            failed = report.failed.len(),
            "connection manager initialized"
        );
        report
    }

    /// Connect a configured network and return its active provider.
    ///
    /// Connecting an already connected network returns its current provider.
    /// If no endpoint passes the first health round the network stays
    /// registered (so recovery keeps running) and `NoHealthyProvider` is returned.
    pub async fn connect(&self, network: &str) -> Result<ProviderHandle, ConnectionError> {
        let lock = self
            .inner
            .locks
            .get(network)
            .cloned()
            .ok_or_else(|| ConnectionError::UnknownNetwork { network: network.to_string() })?;
        let _guard = lock.lock().await;

        if let Some(state) = self.state(network) {
            return state
                .current()
                .ok_or_else(|| ConnectionError::NoHealthyProvider { network: network.to_string() });
        }

        let config = self
            .inner
            .config
            .network(network)
            .cloned()
            .ok_or_else(|| ConnectionError::UnknownNetwork { network: network.to_string() })?;
        config.validate(&self.inner.config.pool)?;
        let adapter = self.inner.adapters.resolve(&config)?;

        let (monitor, health_rx) = HealthMonitor::with_channel(self.inner.config.health.clone(), HEALTH_EVENT_BUFFER);
        let limiter = RateLimiter::new(self.inner.config.limiter.clone());
        let pool = ConnectionPool::new(&config.name, self.inner.config.pool.max_size, monitor, limiter);

        let interval = config.health_check_interval();
        let backoff = BackoffPolicy::new(config.reconnection, &self.inner.config.health, interval);
        for endpoint in &config.endpoints {
            let built = self.inner.factory.create(&config, endpoint).map(|transport| {
                ProviderHandle::new(
                    EndpointId::new(&config.name, &endpoint.url),
                    endpoint.clone(),
                    config.chain,
                    transport,
                    Arc::clone(&adapter),
                )
            });
            let probe = ProbeSettings {
                timeout: endpoint.timeout(),
                interval,
                backoff,
            };
            let added = match built {
                Ok(handle) => pool.add_endpoint(handle, probe).await,
                Err(e) => Err(e),
            };
            if let Err(e) = added {
                pool.close().await;
                return Err(e);
            }
        }

        for (url, result) in pool.check_all().await {
            match result {
                Ok(health) => tracing::debug!(
                    network,
                    url = %url,
                    status = %health.status,
                    latency_ms = health.response_time_ms.unwrap_or(0),
                    "initial health check"
                ),
                Err(e) => tracing::debug!(network, url = %url, error = %e, "initial health check failed"),
            }
        }

        if let Err(e) = pool.start_monitoring() {
            pool.close().await;
            return Err(e);
        }

        let state = Arc::new(NetworkState {
            config,
            pool,
            active: RwLock::new(None),
            events: self.inner.events.clone(),
            event_task: Mutex::new(None),
            switches: AtomicU64::new(0),
            connected_at: Utc::now(),
        });

        let selected = state.pool.acquire().ok();

        let task = tokio::spawn(consume_health_events(Arc::downgrade(&state), health_rx));
        *state.event_task.lock().unwrap() = Some(task);
        self.inner
            .networks
            .write()
            .unwrap()
            .insert(network.to_string(), Arc::clone(&state));

        match selected {
            Some(provider) => {
                state.switch_to(provider.clone(), None);
                Ok(provider)
            }
            None => {
                tracing::error!(network, endpoints = state.pool.len(), "no endpoint passed the initial health check");
                state.lose_provider(Some("no endpoint passed the initial health check".into()));
                Err(ConnectionError::NoHealthyProvider { network: network.to_string() })
            }
        }
    }

    /// The network's active provider.
    pub fn get_provider(&self, network: &str) -> Result<ProviderHandle, ConnectionError> {
        self.connected_state(network)?
            .current()
            .ok_or_else(|| ConnectionError::NoHealthyProvider { network: network.to_string() })
    }

    /// Run `op` against the network's active provider, through its rate limiter.
    ///
    /// The provider is resolved when the request leaves the queue, so a
    /// request queued before a failover runs against the replacement, after
    /// waiting for a token of the replacement's own bucket. The outcome feeds
    /// the endpoint's health record.
    pub async fn execute<F, Fut, T>(
        &self,
        network: &str,
        priority: Priority,
        op: F,
    ) -> Result<T, ConnectionError>
    where
        F: FnOnce(ProviderHandle) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, TransportError>> + Send + 'static,
        T: Send + 'static,
    {
        let state = self.connected_state(network)?;
        let queued_on = state
            .current()
            .ok_or_else(|| ConnectionError::NoHealthyProvider { network: network.to_string() })?;

        dispatch(state, queued_on.id().clone(), priority, op).await
    }

    /// `execute` for a plain JSON-RPC call.
    pub async fn request(
        &self,
        network: &str,
        priority: Priority,
        method: impl Into<String>,
        params: Vec<Value>,
    ) -> Result<Value, ConnectionError> {
        let method = method.into();
        self.execute(network, priority, move |provider| async move {
            provider.request(&method, params).await
        })
        .await
    }

    /// Status of a configured network. Networks that are not connected report
    /// `connected: false` and no endpoints.
    pub fn status(&self, network: &str) -> Result<NetworkConnectionStatus, ConnectionError> {
        if let Some(state) = self.state(network) {
            return Ok(snapshot(&state));
        }
        let config = self
            .inner
            .config
            .network(network)
            .ok_or_else(|| ConnectionError::UnknownNetwork { network: network.to_string() })?;
        Ok(NetworkConnectionStatus {
            network: config.name.clone(),
            display_name: config.display_name.clone(),
            chain: config.chain,
            connected: false,
            active_endpoint: None,
            healthy_endpoints: 0,
            endpoints: Vec::new(),
            provider_switches: 0,
            connected_at: None,
        })
    }

    /// Status of every configured network, by name.
    pub fn all_statuses(&self) -> BTreeMap<String, NetworkConnectionStatus> {
        self.inner
            .config
            .networks
            .keys()
            .filter_map(|name| self.status(name).ok().map(|s| (name.clone(), s)))
            .collect()
    }

    /// Retained health samples for one endpoint of a connected network.
    pub fn health_history(&self, network: &str, url: &str) -> Result<Vec<HealthSample>, ConnectionError> {
        let state = self.connected_state(network)?;
        let handle = state
            .pool
            .get(url)
            .ok_or_else(|| ConnectionError::UnknownEndpoint { url: url.to_string() })?;
        Ok(state.pool.monitor().history(handle.id()))
    }

    /// Disconnect one network: stop its checks, reject its queued requests
    /// with `Disconnected` and forget its endpoints.
    pub async fn disconnect(&self, network: &str) -> Result<(), ConnectionError> {
        let lock = self
            .inner
            .locks
            .get(network)
            .cloned()
            .ok_or_else(|| ConnectionError::UnknownNetwork { network: network.to_string() })?;
        let _guard = lock.lock().await;

        let state = self
            .inner
            .networks
            .write()
            .unwrap()
            .remove(network)
            .ok_or_else(|| ConnectionError::NotConnected { network: network.to_string() })?;
        teardown(&state).await;
        tracing::info!(network, "network disconnected");
        state.emit(NetworkEvent::new(NetworkEventKind::NetworkDisconnected, network));
        Ok(())
    }

    /// Disconnect every network. Every pending request settles before this returns.
    pub async fn shutdown(&self) {
        let names: Vec<String> = self.inner.networks.read().unwrap().keys().cloned().collect();
        for name in names {
            if let Err(e) = self.disconnect(&name).await {
                tracing::debug!(network = %name, error = %e, "already disconnected");
            }
        }
        tracing::info!("connection manager shut down");
    }

    pub fn connected_networks(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.networks.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    fn state(&self, network: &str) -> Option<Arc<NetworkState>> {
        self.inner.networks.read().unwrap().get(network).cloned()
    }

    fn connected_state(&self, network: &str) -> Result<Arc<NetworkState>, ConnectionError> {
        if let Some(state) = self.state(network) {
            return Ok(state);
        }
        if self.inner.config.network(network).is_some() {
            Err(ConnectionError::NotConnected { network: network.to_string() })
        } else {
            Err(ConnectionError::UnknownNetwork { network: network.to_string() })
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("networks", &self.inner.config.networks.keys().collect::<Vec<_>>())
            .field("connected", &self.connected_networks())
            .finish()
    }
}

async fn teardown(state: &NetworkState) {
    let task = state.event_task.lock().unwrap().take();
    if let Some(task) = task {
        task.abort();
        let _ = task.await;
    }
    state.active.write().unwrap().take();
    state.pool.close().await;
}

fn snapshot(state: &NetworkState) -> NetworkConnectionStatus {
    let endpoints = state.pool.report();
    let active = state.current();
    NetworkConnectionStatus {
        network: state.config.name.clone(),
        display_name: state.config.display_name.clone(),
        chain: state.config.chain,
        connected: active.is_some(),
        active_endpoint: active.map(|p| p.url().to_string()),
        healthy_endpoints: endpoints.iter().filter(|e| e.health.is_healthy).count(),
        endpoints,
        provider_switches: state.switches.load(Ordering::Relaxed),
        connected_at: Some(state.connected_at),
    }
}
