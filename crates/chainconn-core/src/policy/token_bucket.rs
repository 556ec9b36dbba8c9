//! Token bucket.
//!
//! Tokens accrue at `per_minute / 60_000` tokens per millisecond up to
//! `max_tokens` (the burst size). Refill is lazy: it happens on access,
//! computed from the time elapsed since the previous access. Tokens are
//! only ever taken one whole token at a time.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Token bucket configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenBucketConfig {
    /// Burst size; the bucket starts full.
    pub max_tokens: u32,
    /// Long-run request budget per minute.
    pub per_minute: u32,
}

impl TokenBucketConfig {
    /// Refill rate in tokens per millisecond.
    pub fn refill_per_ms(&self) -> f64 {
        self.per_minute as f64 / 60_000.0
    }
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Thread-safe token bucket.
pub struct TokenBucket {
    config: TokenBucketConfig,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(config: TokenBucketConfig) -> Self {
        Self {
            state: Mutex::new(BucketState {
                tokens: config.max_tokens as f64,
                last_refill: Instant::now(),
            }),
            config,
        }
    }

    pub fn config(&self) -> TokenBucketConfig {
        self.config
    }

    /// Take one token if available.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        self.refill(&mut state);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Exact time until the next whole token is available; zero if one is available now.
    pub fn time_until_next(&self) -> Duration {
        let mut state = self.state.lock().unwrap();
        self.refill(&mut state);
        let deficit = 1.0 - state.tokens;
        let rate = self.config.refill_per_ms();
        if deficit <= 0.0 {
            Duration::ZERO
        } else if rate <= 0.0 {
            Duration::MAX
        } else {
            Duration::from_secs_f64(deficit / rate / 1_000.0)
        }
    }

    /// Currently available tokens (fractional).
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock().unwrap();
        self.refill(&mut state);
        state.tokens
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed_ms = now.duration_since(state.last_refill).as_secs_f64() * 1_000.0;
        let max = self.config.max_tokens as f64;
        state.tokens = (state.tokens + elapsed_ms * self.config.refill_per_ms()).clamp(0.0, max);
        state.last_refill = now;
    }
}

impl std::fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucket")
            .field("config", &self.config)
            .field("available", &self.available())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket(max_tokens: u32, per_minute: u32) -> TokenBucket {
        TokenBucket::new(TokenBucketConfig {
            max_tokens,
            per_minute,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn burst_then_empty() {
        let b = bucket(5, 60);
        for _ in 0..5 {
            assert!(b.try_acquire());
        }
        assert!(!b.try_acquire());
        assert!(b.available() >= 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_matches_refill_rate() {
        let b = bucket(1, 60); // one token per second
        assert!(b.try_acquire());
        let wait = b.time_until_next();
        assert!(
            wait >= Duration::from_millis(999) && wait <= Duration::from_millis(1000),
            "unexpected wait: {wait:?}"
        );

        tokio::time::advance(Duration::from_millis(500)).await;
        let wait = b.time_until_next();
        assert!(wait <= Duration::from_millis(501), "unexpected wait: {wait:?}");
        assert!(!b.try_acquire());

        tokio::time::advance(Duration::from_millis(501)).await;
        assert!(b.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn refill_capped_at_burst() {
        let b = bucket(3, 600);
        assert!(b.try_acquire());
        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(b.available() <= 3.0);
        assert_eq!(b.time_until_next(), Duration::ZERO);
    }
}
