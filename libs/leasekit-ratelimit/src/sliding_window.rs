//! Sliding window log over a sorted set

use crate::{validate_limit, window_millis, RateDecision, RateLimiter};
use async_trait::async_trait;
use errors::LeaseResult;
use leasekit_store::{KeySpace, KvStore, SystemTimeProvider, TimeProvider};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// At most `limit` requests in any `window`-long interval
///
/// Key: `rl:sw:{id}`, a sorted set scored by request time in ms. Rejected
/// requests are not recorded.
pub struct SlidingWindowLimiter<S: KvStore + ?Sized> {
    store: Arc<S>,
    keys: KeySpace,
    clock: Arc<dyn TimeProvider>,
    limit: u64,
    window: Duration,
    window_ms: i64,
}

impl<S: KvStore + ?Sized> SlidingWindowLimiter<S> {
    pub fn new(store: Arc<S>, limit: u64, window: Duration) -> LeaseResult<Self> {
        validate_limit(limit)?;
        let window_ms = window_millis(window)?;
        Ok(Self {
            store,
            keys: KeySpace::new(),
            clock: Arc::new(SystemTimeProvider),
            limit,
            window,
            window_ms,
        })
    }

    pub fn with_keys(mut self, keys: KeySpace) -> Self {
        self.keys = keys;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn TimeProvider>) -> Self {
        self.clock = clock;
        self
    }
}

#[async_trait]
impl<S: KvStore + ?Sized> RateLimiter for SlidingWindowLimiter<S> {
    async fn check(&self, id: &str) -> LeaseResult<RateDecision> {
        let now_ms = self.clock.now_millis();
        let key = self.keys.limiter_key("sw", id);
        // Unique member so same-millisecond requests are all counted
        let member = format!("{}-{}", now_ms, uuid::Uuid::new_v4().simple());

        let outcome = self
            .store
            .sliding_window_admit(&key, now_ms, self.window, self.limit, &member)
            .await?;
        if outcome.admitted {
            return Ok(RateDecision::allow(self.limit.saturating_sub(outcome.count)));
        }

        // Admission reopens when the oldest entry leaves the window
        let retry_ms = outcome
            .oldest_ms
            .map_or(self.window_ms, |oldest| oldest + self.window_ms - now_ms);
        debug!(id, count = outcome.count, limit = self.limit, "Sliding window limit exceeded");
        Ok(RateDecision::deny(Duration::from_millis(retry_ms.max(0) as u64)))
    }

    fn name(&self) -> &'static str {
        "sliding_window"
    }
}
