//! Single-flight cache population

use crate::config::{CacheConfig, ContentionPolicy};
use crate::jitter::jittered;
use crate::stats::{CacheStats, CacheStatsSnapshot};
use bytes::Bytes;
use errors::{LeaseError, LeaseResult};
use leasekit_lock::{LockLease, LockManager};
use leasekit_store::KvStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Outcome of waiting out a busy population lock
enum Contention {
    Filled(Bytes),
    Acquired(LockLease),
}

/// Read-through cache that runs at most one loader per key at a time
pub struct StampedeCache<S: KvStore + ?Sized> {
    store: Arc<S>,
    locks: LockManager<S>,
    config: CacheConfig,
    stats: Arc<CacheStats>,
}

impl<S: KvStore + ?Sized> Clone for StampedeCache<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            locks: self.locks.clone(),
            config: self.config.clone(),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<S: KvStore + ?Sized> StampedeCache<S> {
    /// Build over a lock manager; entries live in the same store as the locks
    pub fn new(locks: LockManager<S>, config: CacheConfig) -> LeaseResult<Self> {
        config.validate()?;
        Ok(Self {
            store: Arc::clone(locks.store()),
            locks,
            config,
            stats: Arc::new(CacheStats::default()),
        })
    }

    pub fn from_store(store: Arc<S>, config: CacheConfig) -> LeaseResult<Self> {
        Self::new(LockManager::new(store), config)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    /// Store key for a cache key
    pub fn entry_key(&self, key: &str) -> String {
        self.config.keys.cache_key(key)
    }

    /// Lock key guarding population of a cache key
    pub fn lock_key(&self, key: &str) -> String {
        self.config.keys.lock_key(key)
    }

    /// Read an entry without loading on miss
    pub async fn peek(&self, key: &str) -> LeaseResult<Option<Bytes>> {
        self.store.get(&self.entry_key(key)).await
    }

    /// Write an entry with jittered expiry
    pub async fn set(&self, key: &str, value: Bytes) -> LeaseResult<()> {
        let ttl = jittered(self.config.base_ttl, self.config.jitter);
        self.store.set(&self.entry_key(key), value, Some(ttl)).await
    }

    /// Delete an entry. `true` if one existed.
    pub async fn invalidate(&self, key: &str) -> LeaseResult<bool> {
        let removed = self.store.del(&self.entry_key(key)).await?;
        debug!(key, removed, "Cache invalidate");
        Ok(removed)
    }

    /// Return the cached value, running `loader` on a miss if no other
    /// caller is already doing so.
    ///
    /// Loader errors become [`LeaseError::LoaderFailed`] and nothing is
    /// cached. A busy lock with no entry appearing is resolved per
    /// [`ContentionPolicy`]. Cancellation aborts retries, waits and the
    /// loader itself with [`LeaseError::Cancelled`]; the population lock is
    /// released on every path.
    pub async fn get<F, Fut>(
        &self,
        key: &str,
        loader: F,
        cancel: &CancellationToken,
    ) -> LeaseResult<Bytes>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Bytes>>,
    {
        let entry_key = self.entry_key(key);
        if let Some(value) = self.store.get(&entry_key).await? {
            CacheStats::incr(&self.stats.hits);
            return Ok(value);
        }
        CacheStats::incr(&self.stats.misses);

        let lock_key = self.lock_key(key);
        let acquired = self
            .locks
            .try_acquire(
                &lock_key,
                self.config.lock_lease,
                &self.config.lock_retry,
                cancel,
            )
            .await?;

        let lease = match acquired {
            Some(lease) => lease,
            None => {
                // The holder may have finished while we were retrying
                if let Some(value) = self.store.get(&entry_key).await? {
                    CacheStats::incr(&self.stats.coalesced);
                    return Ok(value);
                }
                match self
                    .wait_out_contention(key, &entry_key, &lock_key, cancel)
                    .await?
                {
                    Contention::Filled(value) => {
                        CacheStats::incr(&self.stats.coalesced);
                        return Ok(value);
                    },
                    Contention::Acquired(lease) => lease,
                }
            },
        };

        let guard = ReleaseGuard::new(self.locks.clone(), lease);
        let result = self.populate(key, &entry_key, loader, cancel).await;
        guard.release().await;
        result
    }

    /// Typed [`get`](Self::get) with JSON payloads
    pub async fn get_json<T, F, Fut>(
        &self,
        key: &str,
        loader: F,
        cancel: &CancellationToken,
    ) -> LeaseResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let bytes = self
            .get(
                key,
                || async move {
                    let value = loader().await?;
                    let encoded = serde_json::to_vec(&value)?;
                    Ok::<_, anyhow::Error>(Bytes::from(encoded))
                },
                cancel,
            )
            .await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Typed [`set`](Self::set) with a JSON payload
    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T) -> LeaseResult<()> {
        self.set(key, Bytes::from(serde_json::to_vec(value)?)).await
    }

    /// Runs with the population lock held
    async fn populate<F, Fut>(
        &self,
        key: &str,
        entry_key: &str,
        loader: F,
        cancel: &CancellationToken,
    ) -> LeaseResult<Bytes>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Bytes>>,
    {
        if let Some(value) = self.store.get(entry_key).await? {
            CacheStats::incr(&self.stats.coalesced);
            return Ok(value);
        }

        let started = Instant::now();
        let loaded = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LeaseError::Cancelled),
            loaded = loader() => loaded,
        };
        let value = match loaded {
            Ok(value) => value,
            Err(e) => {
                CacheStats::incr(&self.stats.load_failures);
                warn!(key, "Loader failed: {:#}", e);
                return Err(LeaseError::LoaderFailed(e));
            },
        };

        let ttl = jittered(self.config.base_ttl, self.config.jitter);
        self.store
            .set(entry_key, value.clone(), Some(ttl))
            .await?;
        CacheStats::incr(&self.stats.loads);
        debug!(
            key,
            load_ms = started.elapsed().as_millis() as u64,
            ttl_ms = ttl.as_millis() as u64,
            "Cache populated"
        );
        Ok(value)
    }

    async fn wait_out_contention(
        &self,
        key: &str,
        entry_key: &str,
        lock_key: &str,
        cancel: &CancellationToken,
    ) -> LeaseResult<Contention> {
        let max_wait = match self.config.contention {
            ContentionPolicy::Fail => return Err(self.contended(key)),
            ContentionPolicy::Wait { max_wait } => max_wait,
        };

        let deadline = Instant::now() + max_wait;
        let interval = self.config.lock_retry.interval.max(Duration::from_millis(1));

        while Instant::now() < deadline {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(LeaseError::Cancelled),
                _ = tokio::time::sleep(interval) => {},
            }
            if let Some(value) = self.store.get(entry_key).await? {
                return Ok(Contention::Filled(value));
            }
            // The holder gave up without writing (loader error, crash)
            if let Some(lease) = self
                .locks
                .acquire(lock_key, self.config.lock_lease)
                .await?
            {
                return Ok(Contention::Acquired(lease));
            }
        }

        Err(self.contended(key))
    }

    fn contended(&self, key: &str) -> LeaseError {
        CacheStats::incr(&self.stats.contended);
        debug!(key, "Cache population contended");
        LeaseError::Contended {
            key: key.to_string(),
        }
    }
}

/// Releases the population lock if the `get` future is dropped mid-flight
struct ReleaseGuard<S: KvStore + ?Sized> {
    locks: LockManager<S>,
    lease: Option<LockLease>,
}

impl<S: KvStore + ?Sized> ReleaseGuard<S> {
    fn new(locks: LockManager<S>, lease: LockLease) -> Self {
        Self {
            locks,
            lease: Some(lease),
        }
    }

    /// Release now. Failures only cost the other callers a wait until the
    /// lease expires, so they are logged and not returned.
    async fn release(mut self) {
        if let Some(lease) = self.lease.take() {
            if let Err(e) = self.locks.release_lease(&lease).await {
                warn!(resource = lease.resource_key(), "Lock release failed: {}", e);
            }
        }
    }
}

impl<S: KvStore + ?Sized> Drop for ReleaseGuard<S> {
    fn drop(&mut self) {
        let Some(lease) = self.lease.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let locks = self.locks.clone();
                handle.spawn(async move {
                    if let Err(e) = locks.release_lease(&lease).await {
                        warn!(resource = lease.resource_key(), "Lock release failed: {}", e);
                    }
                });
            },
            Err(_) => {
                warn!(
                    resource = lease.resource_key(),
                    "No runtime to release lock; it expires with its lease"
                );
            },
        }
    }
}
