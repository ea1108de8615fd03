//! In-memory key-value store implementation
//!
//! Uses DashMap so each conditional operation runs under the owning shard's
//! write lock, which gives the same per-key atomicity as the Redis scripts.
//! Perfect for testing and single-process deployments.
//!
//! Each value kind lives in its own map, but a key belongs to one kind at a
//! time as in Redis: `set` replaces a key of any kind, `set_if_absent` sees
//! a live key of any kind as occupied, and typed operations on a key of
//! another kind fail with a `WRONGTYPE` store error. The kind check runs
//! before the target map is locked, so a concurrent write of a different
//! kind to the same key can still slip in between.

use crate::traits::*;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use errors::{LeaseError, LeaseResult};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A stored value with an optional absolute expiry
#[derive(Debug, Clone)]
struct Expiring<T> {
    value: T,
    expires_at: Option<Instant>,
}

impl<T> Expiring<T> {
    fn new(value: T, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Which map currently holds a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyKind {
    String,
    Counter,
    SortedSet,
    Bucket,
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    ts_ms: i64,
}

/// In-memory store with concurrent access support
pub struct MemoryStore {
    kv_store: Arc<DashMap<String, Expiring<Bytes>>>,
    counter_store: Arc<DashMap<String, Expiring<u64>>>,
    zset_store: Arc<DashMap<String, Expiring<Vec<(i64, String)>>>>,
    bucket_store: Arc<DashMap<String, Expiring<Bucket>>>,
}

impl MemoryStore {
    /// Create new in-memory store instance
    pub fn new() -> Self {
        Self {
            kv_store: Arc::new(DashMap::new()),
            counter_store: Arc::new(DashMap::new()),
            zset_store: Arc::new(DashMap::new()),
            bucket_store: Arc::new(DashMap::new()),
        }
    }

    /// Clear all data (useful for testing)
    pub fn clear(&self) {
        self.kv_store.clear();
        self.counter_store.clear();
        self.zset_store.clear();
        self.bucket_store.clear();
    }

    /// Drop every expired entry. Returns how many were removed.
    ///
    /// Reads already treat expired entries as absent; this only reclaims memory.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.total_len();
        self.kv_store.retain(|_, e| e.is_live(now));
        self.counter_store.retain(|_, e| e.is_live(now));
        self.zset_store.retain(|_, e| e.is_live(now));
        self.bucket_store.retain(|_, e| e.is_live(now));
        let removed = before - self.total_len();
        if removed > 0 {
            tracing::debug!(removed, "Purged expired entries");
        }
        removed
    }

    /// Get statistics about stored data (expired entries included until purged)
    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            kv_count: self.kv_store.len(),
            counter_count: self.counter_store.len(),
            zset_count: self.zset_store.len(),
            bucket_count: self.bucket_store.len(),
        }
    }

    fn total_len(&self) -> usize {
        self.kv_store.len()
            + self.counter_store.len()
            + self.zset_store.len()
            + self.bucket_store.len()
    }

    /// Kind of the live value under `key`, if any
    fn live_kind(&self, key: &str, now: Instant) -> Option<KeyKind> {
        if self.kv_store.get(key).is_some_and(|e| e.is_live(now)) {
            Some(KeyKind::String)
        } else if self.counter_store.get(key).is_some_and(|e| e.is_live(now)) {
            Some(KeyKind::Counter)
        } else if self.zset_store.get(key).is_some_and(|e| e.is_live(now)) {
            Some(KeyKind::SortedSet)
        } else if self.bucket_store.get(key).is_some_and(|e| e.is_live(now)) {
            Some(KeyKind::Bucket)
        } else {
            None
        }
    }

    fn ensure_kind(&self, key: &str, expected: KeyKind, now: Instant) -> LeaseResult<()> {
        match self.live_kind(key, now) {
            Some(kind) if kind != expected => Err(wrong_type(key)),
            _ => Ok(()),
        }
    }

    fn live_keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = Vec::new();
        keys.extend(
            self.kv_store
                .iter()
                .filter(|e| e.value().is_live(now))
                .map(|e| e.key().clone()),
        );
        keys.extend(
            self.counter_store
                .iter()
                .filter(|e| e.value().is_live(now))
                .map(|e| e.key().clone()),
        );
        keys.extend(
            self.zset_store
                .iter()
                .filter(|e| e.value().is_live(now))
                .map(|e| e.key().clone()),
        );
        keys.extend(
            self.bucket_store
                .iter()
                .filter(|e| e.value().is_live(now))
                .map(|e| e.key().clone()),
        );
        keys
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics about memory store usage
#[derive(Debug, Clone)]
pub struct MemoryStats {
    pub kv_count: usize,
    pub counter_count: usize,
    pub zset_count: usize,
    pub bucket_count: usize,
}

fn wrong_type(key: &str) -> LeaseError {
    LeaseError::store(format!(
        "WRONGTYPE Operation against a key holding the wrong kind of value: {}",
        key
    ))
}

fn bytes_eq(stored: &Bytes, expected: &str) -> bool {
    stored.as_ref() == expected.as_bytes()
}

#[async_trait]
impl KvStore for MemoryStore {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> LeaseResult<()> {
        Ok(())
    }

    async fn get(&self, key: &str) -> LeaseResult<Option<Bytes>> {
        let now = Instant::now();
        match self.live_kind(key, now) {
            // INCR counters are strings in Redis
            Some(KeyKind::Counter) => {
                return Ok(self
                    .counter_store
                    .get(key)
                    .filter(|e| e.is_live(now))
                    .map(|e| Bytes::from(e.value.to_string())));
            },
            Some(KeyKind::SortedSet | KeyKind::Bucket) => return Err(wrong_type(key)),
            Some(KeyKind::String) | None => {},
        }
        Ok(self
            .kv_store
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> LeaseResult<()> {
        self.counter_store.remove(key);
        self.zset_store.remove(key);
        self.bucket_store.remove(key);
        self.kv_store
            .insert(key.to_string(), Expiring::new(value, ttl));
        Ok(())
    }

    async fn del(&self, key: &str) -> LeaseResult<bool> {
        let now = Instant::now();
        let removed = [
            self.kv_store.remove(key).map(|(_, e)| e.is_live(now)),
            self.counter_store.remove(key).map(|(_, e)| e.is_live(now)),
            self.zset_store.remove(key).map(|(_, e)| e.is_live(now)),
            self.bucket_store.remove(key).map(|(_, e)| e.is_live(now)),
        ];
        Ok(removed.into_iter().any(|r| r == Some(true)))
    }

    async fn ttl(&self, key: &str) -> LeaseResult<Option<Duration>> {
        let now = Instant::now();
        let expires_at = match self.live_kind(key, now) {
            Some(KeyKind::String) => self.kv_store.get(key).and_then(|e| e.expires_at),
            Some(KeyKind::Counter) => self.counter_store.get(key).and_then(|e| e.expires_at),
            Some(KeyKind::SortedSet) => self.zset_store.get(key).and_then(|e| e.expires_at),
            Some(KeyKind::Bucket) => self.bucket_store.get(key).and_then(|e| e.expires_at),
            None => None,
        };
        Ok(expires_at.map(|at| at.saturating_duration_since(now)))
    }

    async fn scan_match(&self, pattern: &str) -> LeaseResult<Vec<String>> {
        Ok(self
            .live_keys()
            .into_iter()
            .filter(|k| glob_match(pattern, k))
            .collect())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> LeaseResult<bool> {
        let now = Instant::now();
        if matches!(self.live_kind(key, now), Some(kind) if kind != KeyKind::String) {
            return Ok(false);
        }
        let fresh = Expiring::new(Bytes::copy_from_slice(value.as_bytes()), Some(ttl));
        match self.kv_store.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    Ok(false)
                } else {
                    occupied.insert(fresh);
                    Ok(true)
                }
            },
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                Ok(true)
            },
        }
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> LeaseResult<bool> {
        let now = Instant::now();
        Ok(self
            .kv_store
            .remove_if(key, |_, e| e.is_live(now) && bytes_eq(&e.value, expected))
            .is_some())
    }

    async fn compare_and_expire(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> LeaseResult<bool> {
        let now = Instant::now();
        match self.kv_store.get_mut(key) {
            Some(mut entry) if entry.is_live(now) && bytes_eq(&entry.value, expected) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            },
            _ => Ok(false),
        }
    }

    async fn incr_window(&self, key: &str, window: Duration) -> LeaseResult<u64> {
        let now = Instant::now();
        self.ensure_kind(key, KeyKind::Counter, now)?;
        let mut entry = self
            .counter_store
            .entry(key.to_string())
            .or_insert_with(|| Expiring::new(0, Some(window)));
        if !entry.is_live(now) {
            *entry = Expiring::new(0, Some(window));
        }
        entry.value += 1;
        Ok(entry.value)
    }

    async fn sliding_window_admit(
        &self,
        key: &str,
        now_ms: i64,
        window: Duration,
        limit: u64,
        member: &str,
    ) -> LeaseResult<SlidingWindowOutcome> {
        let window_ms = i64::try_from(window.as_millis())
            .map_err(|_| LeaseError::invalid_argument("window", "too large"))?;
        let now = Instant::now();
        self.ensure_kind(key, KeyKind::SortedSet, now)?;
        let mut entry = self
            .zset_store
            .entry(key.to_string())
            .or_insert_with(|| Expiring::new(Vec::new(), Some(window)));
        if !entry.is_live(now) {
            entry.value.clear();
        }

        let cutoff = now_ms - window_ms;
        entry.value.retain(|(score, _)| *score > cutoff);

        let admitted = (entry.value.len() as u64) < limit;
        if admitted {
            entry.value.push((now_ms, member.to_string()));
            entry.value.sort_by_key(|(score, _)| *score);
        }
        entry.expires_at = Some(now + window);

        Ok(SlidingWindowOutcome {
            admitted,
            count: entry.value.len() as u64,
            oldest_ms: entry.value.first().map(|(score, _)| *score),
        })
    }

    async fn token_bucket_take(
        &self,
        key: &str,
        now_ms: i64,
        capacity: f64,
        refill_per_sec: f64,
    ) -> LeaseResult<TokenBucketOutcome> {
        let now = Instant::now();
        self.ensure_kind(key, KeyKind::Bucket, now)?;
        let idle_ttl = bucket_idle_ttl(capacity, refill_per_sec);
        let mut entry = self.bucket_store.entry(key.to_string()).or_insert_with(|| {
            Expiring::new(
                Bucket {
                    tokens: capacity,
                    ts_ms: now_ms,
                },
                Some(idle_ttl),
            )
        });
        if !entry.is_live(now) {
            entry.value = Bucket {
                tokens: capacity,
                ts_ms: now_ms,
            };
        }

        let elapsed_ms = (now_ms - entry.value.ts_ms).max(0) as f64;
        let mut tokens = (entry.value.tokens + elapsed_ms * refill_per_sec / 1000.0).min(capacity);
        let allowed = tokens >= 1.0;
        if allowed {
            tokens -= 1.0;
        }
        entry.value = Bucket {
            tokens,
            ts_ms: now_ms,
        };
        entry.expires_at = Some(now + idle_ttl);

        Ok(TokenBucketOutcome { allowed, tokens })
    }
}

/// Time for an idle bucket to refill completely, plus one second of slack.
pub(crate) fn bucket_idle_ttl(capacity: f64, refill_per_sec: f64) -> Duration {
    let full_ms = if refill_per_sec > 0.0 {
        (capacity / refill_per_sec * 1000.0).ceil() as u64
    } else {
        0
    };
    Duration::from_millis(full_ms + 1000)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_if_absent_respects_existing() {
        let store = MemoryStore::new();
        assert!(store
            .set_if_absent("lock:a", "t1", Duration::from_secs(10))
            .await
            .unwrap());
        assert!(!store
            .set_if_absent("lock:a", "t2", Duration::from_secs(10))
            .await
            .unwrap());
        assert_eq!(store.get("lock:a").await.unwrap(), Some(Bytes::from("t1")));
    }

    #[tokio::test]
    async fn test_set_if_absent_replaces_expired() {
        let store = MemoryStore::new();
        store
            .set_if_absent("lock:a", "t1", Duration::from_millis(20))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store
            .set_if_absent("lock:a", "t2", Duration::from_secs(10))
            .await
            .unwrap());
        assert_eq!(store.get("lock:a").await.unwrap(), Some(Bytes::from("t2")));
    }

    #[tokio::test]
    async fn test_expired_entry_reads_as_missing() {
        let store = MemoryStore::new();
        store
            .set("k", Bytes::from("v"), Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(store.get("k").await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.ttl("k").await.unwrap(), None);
        assert!(!store.del("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_compare_and_delete() {
        let store = MemoryStore::new();
        store
            .set_if_absent("lock:a", "t1", Duration::from_secs(10))
            .await
            .unwrap();
        assert!(!store.compare_and_delete("lock:a", "t2").await.unwrap());
        assert!(store.get("lock:a").await.unwrap().is_some());
        assert!(store.compare_and_delete("lock:a", "t1").await.unwrap());
        assert!(store.get("lock:a").await.unwrap().is_none());
        assert!(!store.compare_and_delete("lock:a", "t1").await.unwrap());
    }

    #[tokio::test]
    async fn test_compare_and_expire() {
        let store = MemoryStore::new();
        store
            .set_if_absent("lock:a", "t1", Duration::from_millis(50))
            .await
            .unwrap();
        assert!(!store
            .compare_and_expire("lock:a", "t2", Duration::from_secs(10))
            .await
            .unwrap());
        assert!(store
            .compare_and_expire("lock:a", "t1", Duration::from_secs(10))
            .await
            .unwrap());
        let ttl = store.ttl("lock:a").await.unwrap().unwrap();
        assert!(ttl > Duration::from_secs(9));
    }

    #[tokio::test]
    async fn test_incr_window_resets_after_expiry() {
        let store = MemoryStore::new();
        let window = Duration::from_millis(30);
        assert_eq!(store.incr_window("c", window).await.unwrap(), 1);
        assert_eq!(store.incr_window("c", window).await.unwrap(), 2);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.incr_window("c", window).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sliding_window_admit() {
        let store = MemoryStore::new();
        let window = Duration::from_millis(1000);

        for (i, now) in [0_i64, 100, 200].into_iter().enumerate() {
            let out = store
                .sliding_window_admit("z", now, window, 3, &format!("m{}", i))
                .await
                .unwrap();
            assert!(out.admitted);
        }
        let out = store
            .sliding_window_admit("z", 300, window, 3, "m3")
            .await
            .unwrap();
        assert!(!out.admitted);
        assert_eq!(out.count, 3);
        assert_eq!(out.oldest_ms, Some(0));

        // The entry at t=0 leaves the window at t=1000
        let out = store
            .sliding_window_admit("z", 1000, window, 3, "m4")
            .await
            .unwrap();
        assert!(out.admitted);
        assert_eq!(out.oldest_ms, Some(100));
    }

    #[tokio::test]
    async fn test_token_bucket_take() {
        let store = MemoryStore::new();
        for _ in 0..2 {
            assert!(store
                .token_bucket_take("b", 0, 2.0, 1.0)
                .await
                .unwrap()
                .allowed);
        }
        assert!(!store.token_bucket_take("b", 0, 2.0, 1.0).await.unwrap().allowed);

        // One second refills one token
        let out = store.token_bucket_take("b", 1000, 2.0, 1.0).await.unwrap();
        assert!(out.allowed);
        assert!(out.tokens.abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_key_holds_one_kind_at_a_time() {
        let store = MemoryStore::new();
        let window = Duration::from_secs(10);

        // A live counter occupies the key for conditional writes
        assert_eq!(store.incr_window("k", window).await.unwrap(), 1);
        assert!(!store.set_if_absent("k", "token", window).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some(Bytes::from("1")));
        assert!(store.ttl("k").await.unwrap().is_some());

        // Typed operations on a key of another kind are rejected
        let err = store
            .sliding_window_admit("k", 0, window, 5, "m")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("WRONGTYPE"));
        assert!(store.token_bucket_take("k", 0, 2.0, 1.0).await.is_err());

        // Plain set replaces whatever kind was there
        store.set("k", Bytes::from("v"), None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(Bytes::from("v")));
        assert_eq!(store.stats().counter_count, 0);
        assert!(store.incr_window("k", window).await.is_err());

        store
            .sliding_window_admit("z", 0, window, 5, "m")
            .await
            .unwrap();
        assert!(store.get("z").await.is_err());
    }

    #[tokio::test]
    async fn test_purge_expired_and_scan() {
        let store = MemoryStore::new();
        store
            .set("lock:a", Bytes::from("x"), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        store.set("lock:b", Bytes::from("y"), None).await.unwrap();
        store.set("cache:c", Bytes::from("z"), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let mut keys = store.scan_match("lock:*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["lock:b".to_string()]);

        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.stats().kv_count, 2);
    }
}
