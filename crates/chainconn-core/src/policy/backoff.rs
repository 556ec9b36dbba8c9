//! Reconnection delay schedule for FAILED endpoints.

use std::time::Duration;

use crate::config::{HealthConfig, ReconnectionStrategy};

/// Computes the wait before the `attempt`-th reconnection attempt (0-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub strategy: ReconnectionStrategy,
    pub base: Duration,
    pub cap: Duration,
    /// Regular check interval; `Immediate` falls back to it after the first attempt.
    pub interval: Duration,
}

impl BackoffPolicy {
    pub fn new(strategy: ReconnectionStrategy, health: &HealthConfig, interval: Duration) -> Self {
        Self {
            strategy,
            base: Duration::from_millis(health.reconnect_base_ms),
            cap: Duration::from_millis(health.reconnect_max_ms),
            interval,
        }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        match self.strategy {
            ReconnectionStrategy::ExponentialBackoff => {
                let base_ms = self.base.as_millis() as f64 * 2f64.powi(attempt.min(32) as i32);
                let cap_ms = self.cap.as_millis() as f64;
                Duration::from_millis(base_ms.min(cap_ms) as u64)
            }
            ReconnectionStrategy::Immediate if attempt == 0 => Duration::ZERO,
            ReconnectionStrategy::Immediate => self.interval,
        }
    }
}
