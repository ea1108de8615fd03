//! Store-backed rate limiters
//!
//! Each check is one atomic store operation, so limits hold across
//! processes sharing the store and concurrent callers cannot overshoot.
//!
//! | Limiter              | State                            | Burst at window edge |
//! |----------------------|----------------------------------|----------------------|
//! | `FixedWindowLimiter` | counter per window, expiring     | up to 2x limit       |
//! | `SlidingWindowLimiter` | sorted set of request timestamps | none               |
//! | `TokenBucketLimiter` | hash `{tokens, ts}`              | up to capacity       |

use async_trait::async_trait;
use errors::LeaseResult;
use serde::Serialize;
use std::time::Duration;

mod fixed_window;
mod sliding_window;
mod token_bucket;

pub use fixed_window::FixedWindowLimiter;
pub use sliding_window::SlidingWindowLimiter;
pub use token_bucket::TokenBucketLimiter;

/// Result of a rate limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateDecision {
    pub allowed: bool,
    /// Further requests the caller may make right now
    pub remaining: u64,
    /// When a rejected caller may expect to be admitted
    pub retry_after: Option<Duration>,
}

impl RateDecision {
    pub(crate) fn allow(remaining: u64) -> Self {
        Self {
            allowed: true,
            remaining,
            retry_after: None,
        }
    }

    pub(crate) fn deny(retry_after: Duration) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            retry_after: Some(retry_after.max(Duration::from_millis(1))),
        }
    }
}

/// Admission control keyed by caller identity (user, IP, API key ...)
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Record one request from `id` and decide whether to admit it
    async fn check(&self, id: &str) -> LeaseResult<RateDecision>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}

pub(crate) fn window_millis(window: Duration) -> LeaseResult<i64> {
    let ms = i64::try_from(window.as_millis())
        .map_err(|_| errors::LeaseError::invalid_argument("window", "too large"))?;
    if ms == 0 {
        return Err(errors::LeaseError::invalid_argument(
            "window",
            "must be at least 1ms",
        ));
    }
    Ok(ms)
}

pub(crate) fn validate_limit(limit: u64) -> LeaseResult<()> {
    if limit == 0 {
        return Err(errors::LeaseError::invalid_argument("limit", "must be > 0"));
    }
    Ok(())
}
