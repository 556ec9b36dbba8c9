//! Timing policies shared by the rate limiter and the health monitor.
//!
//! ```text
//! execute → [RateLimiter: TokenBucket per endpoint] → transport
//! health check fails N times → FAILED → [BackoffPolicy] → reconnect attempt
//! ```

pub mod backoff;
pub mod token_bucket;

pub use backoff::BackoffPolicy;
pub use token_bucket::{TokenBucket, TokenBucketConfig};
