//! Cache configuration

use errors::{LeaseError, LeaseResult};
use leasekit_lock::RetryPolicy;
use leasekit_store::KeySpace;
use std::time::Duration;

/// What a caller does when another caller holds the population lock and
/// no entry has appeared after its retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentionPolicy {
    /// Return `LeaseError::Contended` at once
    #[default]
    Fail,
    /// Keep polling for the entry (and for the lock) up to `max_wait`
    Wait { max_wait: Duration },
}

/// Stampede-guarded cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Base expiry of cache entries
    pub base_ttl: Duration,
    /// Expiry jitter bound (entries expire within `base_ttl ± jitter`)
    pub jitter: Duration,
    /// Lease of the population lock; short, independent of `base_ttl`
    pub lock_lease: Duration,
    /// Retries when the population lock is busy
    pub lock_retry: RetryPolicy,
    pub contention: ContentionPolicy,
    pub keys: KeySpace,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            base_ttl: Duration::from_secs(300),
            jitter: Duration::from_secs(30),
            lock_lease: Duration::from_secs(5),
            lock_retry: RetryPolicy::new(5, Duration::from_millis(50)),
            contention: ContentionPolicy::Fail,
            keys: KeySpace::new(),
        }
    }
}

impl CacheConfig {
    pub fn with_ttl(mut self, base_ttl: Duration, jitter: Duration) -> Self {
        self.base_ttl = base_ttl;
        self.jitter = jitter;
        self
    }

    pub fn with_lock(mut self, lock_lease: Duration, lock_retry: RetryPolicy) -> Self {
        self.lock_lease = lock_lease;
        self.lock_retry = lock_retry;
        self
    }

    pub fn with_contention(mut self, contention: ContentionPolicy) -> Self {
        self.contention = contention;
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.keys = KeySpace::with_namespace(namespace);
        self
    }

    pub fn validate(&self) -> LeaseResult<()> {
        if self.base_ttl.is_zero() {
            return Err(LeaseError::invalid_argument("base_ttl", "must be > 0"));
        }
        if self.lock_lease.is_zero() {
            return Err(LeaseError::invalid_argument("lock_lease", "must be > 0"));
        }
        self.lock_retry.validate()?;
        Ok(())
    }
}
