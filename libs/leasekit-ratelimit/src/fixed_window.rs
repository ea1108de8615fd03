//! Fixed window counter

use crate::{validate_limit, window_millis, RateDecision, RateLimiter};
use async_trait::async_trait;
use errors::LeaseResult;
use leasekit_store::{KeySpace, KvStore, SystemTimeProvider, TimeProvider};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// `limit` requests per aligned `window`
///
/// Key: `rl:fw:{id}:{window_index}`, expiring with the window.
pub struct FixedWindowLimiter<S: KvStore + ?Sized> {
    store: Arc<S>,
    keys: KeySpace,
    clock: Arc<dyn TimeProvider>,
    limit: u64,
    window: Duration,
    window_ms: i64,
}

impl<S: KvStore + ?Sized> FixedWindowLimiter<S> {
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
impl<S: KvStore + ?Sized> RateLimiter for FixedWindowLimiter<S> {
    async fn check(&self, id: &str) -> LeaseResult<RateDecision> {
        let now_ms = self.clock.now_millis();
        let index = now_ms.div_euclid(self.window_ms);
        let key = self.keys.limiter_key("fw", &format!("{}:{}", id, index));

        let count = self.store.incr_window(&key, self.window).await?;
        if count <= self.limit {
            return Ok(RateDecision::allow(self.limit - count));
        }

        let until_next = self.window_ms - now_ms.rem_euclid(self.window_ms);
        debug!(id, count, limit = self.limit, "Fixed window limit exceeded");
        Ok(RateDecision::deny(Duration::from_millis(until_next as u64)))
    }

    fn name(&self) -> &'static str {
        "fixed_window"
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use leasekit_store::{ManualTimeProvider, MemoryStore};

    #[tokio::test]
    async fn test_admits_up_to_limit_then_resets() {
        let clock = Arc::new(ManualTimeProvider::new(1_000_000));
        let limiter = FixedWindowLimiter::new(Arc::new(MemoryStore::new()), 3, Duration::from_secs(1))
            .unwrap()
            .with_clock(clock.clone());

        for expected_remaining in [2, 1, 0] {
            let decision = limiter.check("ip1").await.unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
        }

        clock.advance(Duration::from_millis(400));
        let denied = limiter.check("ip1").await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after, Some(Duration::from_millis(600)));

        // Other identities are unaffected
        assert!(limiter.check("ip2").await.unwrap().allowed);

        clock.advance(Duration::from_millis(600));
        assert!(limiter.check("ip1").await.unwrap().allowed);
    }

    #[test]
    fn test_rejects_bad_parameters() {
        let store = Arc::new(MemoryStore::new());
        assert!(FixedWindowLimiter::new(store.clone(), 0, Duration::from_secs(1)).is_err());
        assert!(FixedWindowLimiter::new(store, 1, Duration::ZERO).is_err());
    }
}
