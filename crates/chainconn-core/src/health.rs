//! Periodic liveness checks and the per-endpoint health state machine.
//!
//! ```text
//!            high latency / error rate          N consecutive failures
//!   ACTIVE ─────────────────────────▶ DEGRADED ───────────────────────▶ FAILED
//!     ▲  ◀───────── clean check ──────────┘                               │ backoff
//!     │                                                                   ▼ attempt ok
//!     └──────────────── confirming check ok ──────────────────────── RECOVERING
//! ```
//!
//! Any state reaches FAILED after `failure_threshold` consecutive failures.
//! An endpoint whose very first check fails is FAILED right away.
//! While FAILED, checks become reconnection attempts spaced by the
//! network's [`BackoffPolicy`]; a failed attempt stays FAILED, a successful
//! one moves to RECOVERING, and the next clean check confirms ACTIVE.
//!
//! Transitions are published as [`HealthEvent`]s on a bounded channel owned
//! by whoever created the monitor.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::HealthConfig;
use crate::endpoint::EndpointId;
use crate::error::{ConnectionError, TransportError};
use crate::policy::BackoffPolicy;

/// Lifecycle state of one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EndpointStatus {
    Active,
    Degraded,
    Failed,
    Recovering,
}

impl std::fmt::Display for EndpointStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "ACTIVE"),
            Self::Degraded => write!(f, "DEGRADED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Recovering => write!(f, "RECOVERING"),
        }
    }
}

/// Mutable health record for one endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointHealth {
    /// Whether the pool may hand this endpoint out (ACTIVE or DEGRADED).
    pub is_healthy: bool,
    pub status: EndpointStatus,
    pub last_checked: Option<DateTime<Utc>>,
    pub response_time_ms: Option<u64>,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    /// Exponentially weighted error rate in `[0, 1]`.
    pub error_rate: f64,
    pub last_error: Option<String>,
    /// Reconnection attempts made since the endpoint last entered FAILED.
    pub reconnect_attempts: u32,
}

impl Default for EndpointHealth {
    fn default() -> Self {
        Self {
            is_healthy: true,
            status: EndpointStatus::Active,
            last_checked: None,
            response_time_ms: None,
            consecutive_failures: 0,
            consecutive_successes: 0,
            error_rate: 0.0,
            last_error: None,
            reconnect_attempts: 0,
        }
    }
}

/// Kinds of transition published by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HealthEventKind {
    Degraded,
    Failed,
    Recovered,
    HighLatency,
}

impl std::fmt::Display for HealthEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Degraded => write!(f, "degraded"),
            Self::Failed => write!(f, "failed"),
            Self::Recovered => write!(f, "recovered"),
            Self::HighLatency => write!(f, "high-latency"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HealthEvent {
    pub endpoint: EndpointId,
    pub kind: HealthEventKind,
    pub status: EndpointStatus,
    pub response_time_ms: Option<u64>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// One entry of an endpoint's bounded health history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSample {
    pub at: DateTime<Utc>,
    pub latency_ms: u64,
    pub ok: bool,
    pub error: Option<String>,
}

impl EndpointHealth {
    fn blend_error_rate(&mut self, sample: f64, weight: f64) {
        self.error_rate = (weight * sample + (1.0 - weight) * self.error_rate).clamp(0.0, 1.0);
    }

    fn set_status(&mut self, status: EndpointStatus) {
        self.status = status;
        self.is_healthy = matches!(status, EndpointStatus::Active | EndpointStatus::Degraded);
    }

    /// Apply a successful check. Returns the event to publish, if any.
    pub fn record_success(&mut self, latency: Duration, cfg: &HealthConfig) -> Option<HealthEventKind> {
        let latency_ms = latency.as_millis() as u64;
        self.consecutive_failures = 0;
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.blend_error_rate(0.0, cfg.error_rate_weight);
        self.response_time_ms = Some(latency_ms);
        self.last_checked = Some(Utc::now());

        let slow = latency_ms > cfg.high_latency_ms;
        let erroring = self.error_rate > cfg.degraded_error_rate;

        match self.status {
            EndpointStatus::Failed => {
                self.reconnect_attempts = 0;
                self.set_status(EndpointStatus::Recovering);
                None
            }
            EndpointStatus::Recovering => {
                self.set_status(EndpointStatus::Active);
                Some(HealthEventKind::Recovered)
            }
            EndpointStatus::Active if slow || erroring => {
                self.set_status(EndpointStatus::Degraded);
                Some(HealthEventKind::Degraded)
            }
            EndpointStatus::Active => None,
            EndpointStatus::Degraded if slow => Some(HealthEventKind::HighLatency),
            EndpointStatus::Degraded if erroring => None,
            EndpointStatus::Degraded => {
                self.set_status(EndpointStatus::Active);
                Some(HealthEventKind::Recovered)
            }
        }
    }

    /// Apply a failed check. Returns the event to publish, if any.
    pub fn record_failure(&mut self, error: String, cfg: &HealthConfig) -> Option<HealthEventKind> {
        let never_checked = self.last_checked.is_none();
        self.consecutive_successes = 0;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.blend_error_rate(1.0, cfg.error_rate_weight);
        self.last_error = Some(error);
        self.last_checked = Some(Utc::now());

        match self.status {
            EndpointStatus::Failed => {
                self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);
                None
            }
            EndpointStatus::Recovering => {
                self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);
                self.set_status(EndpointStatus::Failed);
                Some(HealthEventKind::Failed)
            }
            _ if never_checked || self.consecutive_failures >= cfg.failure_threshold => {
                self.reconnect_attempts = 0;
                self.set_status(EndpointStatus::Failed);
                Some(HealthEventKind::Failed)
            }
            EndpointStatus::Active if self.error_rate > cfg.degraded_error_rate => {
                self.set_status(EndpointStatus::Degraded);
                Some(HealthEventKind::Degraded)
            }
            _ => None,
        }
    }
}

/// A cheap liveness call against one endpoint.
#[async_trait]
pub trait HealthProbe: Send + Sync + 'static {
    async fn probe(&self) -> Result<(), TransportError>;
}

/// Per-endpoint check settings.
#[derive(Debug, Clone, Copy)]
pub struct ProbeSettings {
    /// Timeout for a single liveness call.
    pub timeout: Duration,
    /// Regular check interval.
    pub interval: Duration,
    /// Spacing of reconnection attempts while FAILED.
    pub backoff: BackoffPolicy,
}

struct MonitoredEndpoint {
    probe: Arc<dyn HealthProbe>,
    settings: ProbeSettings,
    health: EndpointHealth,
    history: VecDeque<HealthSample>,
    task: Option<JoinHandle<()>>,
}

impl MonitoredEndpoint {
    fn next_delay(&self) -> Duration {
        match self.health.status {
            EndpointStatus::Failed => self.settings.backoff.delay(self.health.reconnect_attempts),
            _ => self.settings.interval,
        }
    }
}

struct MonitorInner {
    config: HealthConfig,
    endpoints: Mutex<HashMap<EndpointId, MonitoredEndpoint>>,
    events: mpsc::Sender<HealthEvent>,
}

/// Health monitor for a set of endpoints.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct HealthMonitor {
    inner: Arc<MonitorInner>,
}

impl HealthMonitor {
    /// Create a monitor publishing on `events`.
    pub fn new(config: HealthConfig, events: mpsc::Sender<HealthEvent>) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                config,
                endpoints: Mutex::new(HashMap::new()),
                events,
            }),
        }
    }

    /// Create a monitor together with the receiving half of its event channel.
    pub fn with_channel(config: HealthConfig, capacity: usize) -> (Self, mpsc::Receiver<HealthEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(config, tx), rx)
    }

    pub fn config(&self) -> &HealthConfig {
        &self.inner.config
    }

    /// Create the health record for an endpoint. Checks start with [`start`](Self::start).
    pub fn register_endpoint(
        &self,
        id: EndpointId,
        probe: Arc<dyn HealthProbe>,
        settings: ProbeSettings,
    ) -> Result<(), ConnectionError> {
        let mut endpoints = self.inner.endpoints.lock().unwrap();
        if endpoints.contains_key(&id) {
            return Err(ConnectionError::DuplicateEndpoint { url: id.url });
        }
        endpoints.insert(
            id,
            MonitoredEndpoint {
                probe,
                settings,
                health: EndpointHealth::default(),
                history: VecDeque::with_capacity(self.inner.config.history_size.min(128)),
                task: None,
            },
        );
        Ok(())
    }

    /// Start the periodic check loop for a registered endpoint.
    pub fn start(&self, id: &EndpointId) -> Result<(), ConnectionError> {
        let mut endpoints = self.inner.endpoints.lock().unwrap();
        let entry = endpoints
            .get_mut(id)
            .ok_or_else(|| ConnectionError::UnknownEndpoint { url: id.url.clone() })?;
        if entry.task.is_none() {
            let weak = Arc::downgrade(&self.inner);
            entry.task = Some(tokio::spawn(check_loop(weak, id.clone())));
        }
        Ok(())
    }

    /// Stop checks and drop the health record and history.
    pub async fn unregister_endpoint(&self, id: &EndpointId) -> Result<(), ConnectionError> {
        let removed = self
            .inner
            .endpoints
            .lock()
            .unwrap()
            .remove(id)
            .ok_or_else(|| ConnectionError::UnknownEndpoint { url: id.url.clone() })?;
        if let Some(task) = removed.task {
            task.abort();
            let _ = task.await;
        }
        Ok(())
    }

    pub fn is_registered(&self, id: &EndpointId) -> bool {
        self.inner.endpoints.lock().unwrap().contains_key(id)
    }

    pub fn health(&self, id: &EndpointId) -> Option<EndpointHealth> {
        self.inner
            .endpoints
            .lock()
            .unwrap()
            .get(id)
            .map(|e| e.health.clone())
    }

    /// Oldest-first copy of the endpoint's retained samples.
    pub fn history(&self, id: &EndpointId) -> Vec<HealthSample> {
        self.inner
            .endpoints
            .lock()
            .unwrap()
            .get(id)
            .map(|e| e.history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Run one liveness check now and apply its outcome.
    pub async fn check_endpoint(&self, id: &EndpointId) -> Result<EndpointHealth, ConnectionError> {
        let (probe, timeout) = {
            let endpoints = self.inner.endpoints.lock().unwrap();
            let entry = endpoints
                .get(id)
                .ok_or_else(|| ConnectionError::UnknownEndpoint { url: id.url.clone() })?;
            (Arc::clone(&entry.probe), entry.settings.timeout)
        };

        let started = Instant::now();
        let outcome = match tokio::time::timeout(timeout, probe.probe()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(TransportError::Timeout {
                ms: timeout.as_millis() as u64,
            }
            .to_string()),
        };
        let latency = started.elapsed();
        self.apply(id, latency, outcome, true).await
    }

    /// Feed the outcome of a regular request into the state machine.
    ///
    /// Only ACTIVE/DEGRADED endpoints are affected; recovery is driven by
    /// checks alone. Node-side execution errors are ignored.
    pub async fn record_outcome(
        &self,
        id: &EndpointId,
        latency: Duration,
        result: Result<(), &TransportError>,
    ) {
        let outcome = match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_execution_error() => Ok(()),
            Err(e) => Err(e.to_string()),
        };
        let _ = self.apply(id, latency, outcome, false).await;
    }

    /// Stop every check loop and drop all health state.
    pub async fn shutdown(&self) {
        let tasks: Vec<JoinHandle<()>> = self
            .inner
            .endpoints
            .lock()
            .unwrap()
            .drain()
            .filter_map(|(_, e)| e.task)
            .collect();
        for task in tasks {
            task.abort();
            let _ = task.await;
        }
    }

    async fn apply(
        &self,
        id: &EndpointId,
        latency: Duration,
        outcome: Result<(), String>,
        from_check: bool,
    ) -> Result<EndpointHealth, ConnectionError> {
        let cfg = &self.inner.config;
        let (event, snapshot) = {
            let mut endpoints = self.inner.endpoints.lock().unwrap();
            let entry = endpoints
                .get_mut(id)
                .ok_or_else(|| ConnectionError::UnknownEndpoint { url: id.url.clone() })?;

            if !from_check && !entry.health.is_healthy {
                return Ok(entry.health.clone());
            }

            let previous = entry.health.status;
            let kind = match &outcome {
                Ok(()) => entry.health.record_success(latency, cfg),
                Err(e) => entry.health.record_failure(e.clone(), cfg),
            };

            entry.history.push_back(HealthSample {
                at: Utc::now(),
                latency_ms: latency.as_millis() as u64,
                ok: outcome.is_ok(),
                error: outcome.as_ref().err().cloned(),
            });
            while entry.history.len() > cfg.history_size {
                entry.history.pop_front();
            }

            let health = &entry.health;
            if previous != health.status {
                match health.status {
                    EndpointStatus::Failed | EndpointStatus::Degraded => tracing::warn!(
                        endpoint = %id,
                        from = %previous,
                        to = %health.status,
                        failures = health.consecutive_failures,
                        error_rate = health.error_rate,
                        error = health.last_error.as_deref().unwrap_or(""),
                        "endpoint health changed"
                    ),
                    _ => tracing::info!(
                        endpoint = %id,
                        from = %previous,
                        to = %health.status,
                        latency_ms = latency.as_millis() as u64,
                        "endpoint health changed"
                    ),
                }
            } else {
                tracing::debug!(
                    endpoint = %id,
                    status = %health.status,
                    ok = outcome.is_ok(),
                    latency_ms = latency.as_millis() as u64,
                    "health sample"
                );
            }

            let event = kind.map(|kind| HealthEvent {
                endpoint: id.clone(),
                kind,
                status: health.status,
                response_time_ms: health.response_time_ms,
                error: outcome.as_ref().err().cloned(),
                timestamp: Utc::now(),
            });
            (event, health.clone())
        };

        if let Some(event) = event {
            // A closed channel means nobody is listening any more.
            let _ = self.inner.events.send(event).await;
        }
        Ok(snapshot)
    }
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("endpoints", &self.inner.endpoints.lock().unwrap().len())
            .finish()
    }
}

async fn check_loop(inner: Weak<MonitorInner>, id: EndpointId) {
    loop {
        let delay = {
            let Some(inner) = inner.upgrade() else { return };
            let endpoints = inner.endpoints.lock().unwrap();
            let Some(entry) = endpoints.get(&id) else { return };
            entry.next_delay()
        };
        tokio::time::sleep(delay).await;

        let Some(inner) = inner.upgrade() else { return };
        let monitor = HealthMonitor { inner };
        if monitor.check_endpoint(&id).await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReconnectionStrategy;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    fn cfg() -> HealthConfig {
        HealthConfig::default()
    }

    fn assert_exclusive(h: &EndpointHealth) {
        assert!(
            h.consecutive_failures == 0 || h.consecutive_successes == 0,
            "counters overlap: {h:?}"
        );
    }

    fn checked_ok() -> EndpointHealth {
        let mut h = EndpointHealth::default();
        h.record_success(Duration::from_millis(10), &cfg());
        h
    }

    #[test]
    fn first_check_failing_is_decisive() {
        let mut h = EndpointHealth::default();
        assert_eq!(h.record_failure("refused".into(), &cfg()), Some(HealthEventKind::Failed));
        assert!(!h.is_healthy);
    }

    #[test]
    fn three_failures_fail_the_endpoint() {
        let mut h = checked_ok();
        let c = cfg();
        assert_eq!(h.record_failure("boom".into(), &c), None);
        assert_eq!(h.record_failure("boom".into(), &c), Some(HealthEventKind::Degraded));
        assert_eq!(h.status, EndpointStatus::Degraded);
        assert!(h.is_healthy);
        assert_eq!(h.record_failure("boom".into(), &c), Some(HealthEventKind::Failed));
        assert_eq!(h.status, EndpointStatus::Failed);
        assert!(!h.is_healthy);
        assert_exclusive(&h);
    }

    #[test]
    fn success_and_failure_counters_are_exclusive() {
        let mut h = EndpointHealth::default();
        let c = cfg();
        for step in 0..20u32 {
            if step % 3 == 0 {
                h.record_failure("x".into(), &c);
            } else {
                h.record_success(Duration::from_millis(10), &c);
            }
            assert_exclusive(&h);
            assert!((0.0..=1.0).contains(&h.error_rate));
        }
    }

    #[test]
    fn error_rate_is_ema_with_newest_weight() {
        let mut h = checked_ok();
        let c = cfg();
        h.record_failure("x".into(), &c);
        assert!((h.error_rate - 0.3).abs() < 1e-9);
        h.record_success(Duration::from_millis(5), &c);
        assert!((h.error_rate - 0.21).abs() < 1e-9);
    }

    #[test]
    fn high_latency_degrades_and_clean_check_restores() {
        let mut h = checked_ok();
        let c = cfg();
        let slow = Duration::from_millis(c.high_latency_ms + 1);
        assert_eq!(h.record_success(slow, &c), Some(HealthEventKind::Degraded));
        assert_eq!(h.record_success(slow, &c), Some(HealthEventKind::HighLatency));
        assert_eq!(
            h.record_success(Duration::from_millis(20), &c),
            Some(HealthEventKind::Recovered)
        );
        assert_eq!(h.status, EndpointStatus::Active);
    }

    #[test]
    fn recovery_needs_a_confirming_cycle() {
        let mut h = checked_ok();
        let c = cfg();
        for _ in 0..3 {
            h.record_failure("down".into(), &c);
        }
        assert_eq!(h.status, EndpointStatus::Failed);

        // Failed reconnection attempt: stays FAILED, attempt counter grows.
        assert_eq!(h.record_failure("still down".into(), &c), None);
        assert_eq!(h.reconnect_attempts, 1);

        // Successful attempt: RECOVERING, failures reset, not yet usable.
        assert_eq!(h.record_success(Duration::from_millis(30), &c), None);
        assert_eq!(h.status, EndpointStatus::Recovering);
        assert_eq!(h.consecutive_failures, 0);
        assert!(!h.is_healthy);

        // Confirming check.
        assert_eq!(
            h.record_success(Duration::from_millis(30), &c),
            Some(HealthEventKind::Recovered)
        );
        assert_eq!(h.status, EndpointStatus::Active);
        assert!(h.is_healthy);
    }

    #[test]
    fn failed_confirmation_returns_to_failed() {
        let mut h = checked_ok();
        let c = cfg();
        for _ in 0..3 {
            h.record_failure("down".into(), &c);
        }
        h.record_success(Duration::from_millis(30), &c);
        assert_eq!(h.record_failure("flap".into(), &c), Some(HealthEventKind::Failed));
        assert_eq!(h.status, EndpointStatus::Failed);
    }

    struct SwitchProbe {
        up: AtomicBool,
        calls: AtomicU64,
    }

    #[async_trait]
    impl HealthProbe for SwitchProbe {
        async fn probe(&self) -> Result<(), TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.up.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(TransportError::Http("connection refused".into()))
            }
        }
    }

    fn settings(interval_ms: u64) -> ProbeSettings {
        let c = cfg();
        let interval = Duration::from_millis(interval_ms);
        ProbeSettings {
            timeout: Duration::from_millis(500),
            interval,
            backoff: BackoffPolicy::new(ReconnectionStrategy::ExponentialBackoff, &c, interval),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_checks_emit_failed_then_recovered() {
        let (monitor, mut events) = HealthMonitor::with_channel(cfg(), 16);
        let probe = Arc::new(SwitchProbe {
            up: AtomicBool::new(true),
            calls: AtomicU64::new(0),
        });
        let id = EndpointId::new("ethereum", "https://a");
        monitor
            .register_endpoint(id.clone(), probe.clone(), settings(1_000))
            .unwrap();
        monitor.check_endpoint(&id).await.unwrap();
        probe.up.store(false, Ordering::SeqCst);
        monitor.start(&id).unwrap();

        let degraded = events.recv().await.unwrap();
        assert_eq!(degraded.kind, HealthEventKind::Degraded);
        let failed = events.recv().await.unwrap();
        assert_eq!(failed.kind, HealthEventKind::Failed);
        assert_eq!(failed.endpoint, id);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 4);

        probe.up.store(true, Ordering::SeqCst);
        let recovered = events.recv().await.unwrap();
        assert_eq!(recovered.kind, HealthEventKind::Recovered);
        assert_eq!(monitor.health(&id).unwrap().status, EndpointStatus::Active);

        monitor.shutdown().await;
        assert!(!monitor.is_registered(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_attempts_follow_backoff() {
        let (monitor, _events) = HealthMonitor::with_channel(cfg(), 16);
        let probe = Arc::new(SwitchProbe {
            up: AtomicBool::new(false),
            calls: AtomicU64::new(0),
        });
        let id = EndpointId::new("solana", "https://b");
        monitor
            .register_endpoint(id.clone(), probe.clone(), settings(1_000))
            .unwrap();
        monitor.check_endpoint(&id).await.unwrap();
        assert_eq!(monitor.health(&id).unwrap().status, EndpointStatus::Failed);

        monitor.start(&id).unwrap();
        // Attempts 1s, 2s and 4s apart.
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
        tokio::time::sleep(Duration::from_millis(2_000)).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
        tokio::time::sleep(Duration::from_millis(3_000)).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 4);
        assert_eq!(monitor.health(&id).unwrap().reconnect_attempts, 3);

        monitor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_as_failure() {
        struct Hang;
        #[async_trait]
        impl HealthProbe for Hang {
            async fn probe(&self) -> Result<(), TransportError> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
        }

        let (monitor, _events) = HealthMonitor::with_channel(cfg(), 4);
        let id = EndpointId::new("flow", "https://c");
        monitor.register_endpoint(id.clone(), Arc::new(Hang), settings(1_000)).unwrap();
        let h = monitor.check_endpoint(&id).await.unwrap();
        assert_eq!(h.consecutive_failures, 1);
        assert!(h.last_error.unwrap().contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn history_is_bounded() {
        let config = HealthConfig {
            history_size: 5,
            ..cfg()
        };
        let (monitor, _events) = HealthMonitor::with_channel(config, 4);
        let probe = Arc::new(SwitchProbe {
            up: AtomicBool::new(true),
            calls: AtomicU64::new(0),
        });
        let id = EndpointId::new("ethereum", "https://d");
        monitor.register_endpoint(id.clone(), probe, settings(1_000)).unwrap();
        for _ in 0..12 {
            monitor.check_endpoint(&id).await.unwrap();
        }
        let history = monitor.history(&id);
        assert_eq!(history.len(), 5);
        assert!(history.iter().all(|s| s.ok));
    }

    #[tokio::test(start_paused = true)]
    async fn passive_outcomes_ignore_execution_errors() {
        let (monitor, _events) = HealthMonitor::with_channel(cfg(), 4);
        let probe = Arc::new(SwitchProbe {
            up: AtomicBool::new(true),
            calls: AtomicU64::new(0),
        });
        let id = EndpointId::new("ethereum", "https://e");
        monitor.register_endpoint(id.clone(), probe, settings(1_000)).unwrap();

        let revert = TransportError::Rpc(crate::request::JsonRpcError {
            code: 3,
            message: "execution reverted".into(),
            data: None,
        });
        monitor.record_outcome(&id, Duration::from_millis(5), Err(&revert)).await;
        assert_eq!(monitor.health(&id).unwrap().consecutive_failures, 0);

        let down = TransportError::Http("502".into());
        monitor.record_outcome(&id, Duration::from_millis(5), Err(&down)).await;
        assert_eq!(monitor.health(&id).unwrap().consecutive_failures, 1);
    }

    #[tokio::test]
    async fn register_then_unregister_leaves_nothing() {
        let (monitor, _events) = HealthMonitor::with_channel(cfg(), 4);
        let probe = Arc::new(SwitchProbe {
            up: AtomicBool::new(true),
            calls: AtomicU64::new(0),
        });
        let id = EndpointId::new("ethereum", "https://f");
        monitor.register_endpoint(id.clone(), probe, settings(30_000)).unwrap();
        monitor.start(&id).unwrap();
        monitor.unregister_endpoint(&id).await.unwrap();
        assert!(monitor.health(&id).is_none());
        assert!(monitor.history(&id).is_empty());
        assert!(monitor.check_endpoint(&id).await.is_err());
    }
}
