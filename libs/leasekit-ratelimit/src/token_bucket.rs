//! Token bucket

use crate::{RateDecision, RateLimiter};
use async_trait::async_trait;
use errors::{LeaseError, LeaseResult};
use leasekit_store::{KeySpace, KvStore, SystemTimeProvider, TimeProvider};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Bursts up to `capacity`, sustained rate `refill_per_sec`
///
/// Key: `rl:tb:{id}`, a hash of `tokens` and last refill `ts`. A fresh
/// bucket starts full.
pub struct TokenBucketLimiter<S: KvStore + ?Sized> {
    store: Arc<S>,
    keys: KeySpace,
    clock: Arc<dyn TimeProvider>,
    capacity: u64,
    refill_per_sec: f64,
}

impl<S: KvStore + ?Sized> TokenBucketLimiter<S> {
    pub fn new(store: Arc<S>, capacity: u64, refill_per_sec: f64) -> LeaseResult<Self> {
        if capacity == 0 {
            return Err(LeaseError::invalid_argument("capacity", "must be > 0"));
        }
        if !(refill_per_sec.is_finite() && refill_per_sec > 0.0) {
            return Err(LeaseError::invalid_argument(
                "refill_per_sec",
                "must be a positive number",
            ));
        }
        Ok(Self {
            store,
            keys: KeySpace::new(),
            clock: Arc::new(SystemTimeProvider),
            capacity,
            refill_per_sec,
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
impl<S: KvStore + ?Sized> RateLimiter for TokenBucketLimiter<S> {
    async fn check(&self, id: &str) -> LeaseResult<RateDecision> {
        let now_ms = self.clock.now_millis();
        let key = self.keys.limiter_key("tb", id);

        let outcome = self
            .store
            .token_bucket_take(&key, now_ms, self.capacity as f64, self.refill_per_sec)
            .await?;
        if outcome.allowed {
            return Ok(RateDecision::allow(outcome.tokens.floor().max(0.0) as u64));
        }

        let missing = (1.0 - outcome.tokens).max(0.0);
        let retry_ms = (missing / self.refill_per_sec * 1000.0).ceil() as u64;
        debug!(id, tokens = outcome.tokens, "Token bucket empty");
        Ok(RateDecision::deny(Duration::from_millis(retry_ms)))
    }

    fn name(&self) -> &'static str {
        "token_bucket"
    }
}
