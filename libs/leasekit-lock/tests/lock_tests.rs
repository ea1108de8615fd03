//! Lock manager behaviour under concurrency and time
//!
//! Memory-backed tests always run. Redis tests are ignored by default.
//!
//! Run all tests (including Redis): `cargo test --package leasekit-lock --test lock_tests -- --ignored`

// Allow unwrap() in tests for cleaner test code
#![allow(clippy::disallowed_methods)]

use leasekit_lock::{CancellationToken, LeaseError, LockManager, RetryPolicy};
use leasekit_store::{KvStore, MemoryStore};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Helper to create a unique test key
fn test_key(suffix: &str) -> String {
    format!("test:lock:{}:{}", uuid::Uuid::new_v4(), suffix)
}

fn memory_locks() -> LockManager<MemoryStore> {
    LockManager::new(Arc::new(MemoryStore::new()))
}

// ============================================================================
// Shared scenarios
// ============================================================================

async fn scenario_mutual_exclusion<S: KvStore>(locks: LockManager<S>, key: &str) {
    let handles: Vec<_> = (0..50)
        .map(|_| {
            let locks = locks.clone();
            let key = key.to_string();
            tokio::spawn(async move {
                locks
                    .acquire(&key, Duration::from_secs(10))
                    .await
                    .unwrap()
            })
        })
        .collect();

    let winners: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .filter_map(|r| r.unwrap())
        .collect();
    assert_eq!(winners.len(), 1);

    locks.release_lease(&winners[0]).await.unwrap();
}

async fn scenario_lease_expiry<S: KvStore>(locks: LockManager<S>, key: &str) {
    let first = locks
        .acquire(key, Duration::from_millis(200))
        .await
        .unwrap();
    assert!(first.is_some());
    assert!(locks
        .acquire(key, Duration::from_millis(200))
        .await
        .unwrap()
        .is_none());

    tokio::time::sleep(Duration::from_millis(300)).await;

    let second = locks
        .acquire(key, Duration::from_secs(5))
        .await
        .unwrap();
    assert!(second.is_some(), "expired lease should be acquirable");
    locks.release_lease(&second.unwrap()).await.unwrap();
}

async fn scenario_renewal_extends<S: KvStore>(locks: LockManager<S>, key: &str) {
    let lease = Duration::from_millis(200);
    let held = locks.acquire(key, lease).await.unwrap().unwrap();

    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(500) {
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(locks.renew(key, held.token(), lease).await.unwrap());
        assert!(
            locks.acquire(key, lease).await.unwrap().is_none(),
            "lock must stay held while renewed"
        );
    }

    assert!(locks.release_lease(&held).await.unwrap());
}

// ============================================================================
// MemoryStore
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_memory_mutual_exclusion() {
    scenario_mutual_exclusion(memory_locks(), "res:contended").await;
}

#[tokio::test]
async fn test_memory_lease_expiry() {
    scenario_lease_expiry(memory_locks(), "res:expiring").await;
}

#[tokio::test]
async fn test_memory_renewal_extends_lifetime() {
    scenario_renewal_extends(memory_locks(), "res:renewed").await;
}

#[tokio::test]
async fn test_try_acquire_waits_for_release() {
    let locks = memory_locks();
    let held = locks
        .acquire("res", Duration::from_secs(10))
        .await
        .unwrap()
        .unwrap();

    let releaser = {
        let locks = locks.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            locks.release_lease(&held).await.unwrap()
        })
    };

    let retry = RetryPolicy::new(20, Duration::from_millis(20));
    let acquired = locks
        .try_acquire("res", Duration::from_secs(10), &retry, &CancellationToken::new())
        .await
        .unwrap();
    assert!(acquired.is_some());
    assert!(releaser.await.unwrap());
}

#[tokio::test]
async fn test_try_acquire_gives_up_after_max_attempts() {
    let locks = memory_locks();
    locks
        .acquire("res", Duration::from_secs(10))
        .await
        .unwrap()
        .unwrap();

    let retry = RetryPolicy::new(3, Duration::from_millis(30));
    let start = Instant::now();
    let acquired = locks
        .try_acquire("res", Duration::from_secs(10), &retry, &CancellationToken::new())
        .await
        .unwrap();
    let elapsed = start.elapsed();

    assert!(acquired.is_none());
    // Two sleeps between three attempts, none after the last
    assert!(elapsed >= Duration::from_millis(60));
    assert!(elapsed < Duration::from_millis(500), "took {:?}", elapsed);
}

#[tokio::test]
async fn test_try_acquire_cancelled_mid_wait() {
    let locks = memory_locks();
    locks
        .acquire("res", Duration::from_secs(10))
        .await
        .unwrap()
        .unwrap();

    let cancel = CancellationToken::new();
    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        })
    };

    let retry = RetryPolicy::new(1_000, Duration::from_secs(1));
    let start = Instant::now();
    let err = locks
        .try_acquire("res", Duration::from_secs(10), &retry, &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, LeaseError::Cancelled));
    assert!(start.elapsed() < Duration::from_millis(500));
    canceller.await.unwrap();
}

#[tokio::test]
async fn test_try_acquire_already_cancelled() {
    let locks = memory_locks();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = locks
        .try_acquire("res", Duration::from_secs(1), &RetryPolicy::default(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, LeaseError::Cancelled));

    // No attempt was made
    assert!(locks
        .acquire("res", Duration::from_secs(1))
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_try_acquire_rejects_zero_attempts() {
    let locks = memory_locks();
    let retry = RetryPolicy::new(0, Duration::from_millis(10));
    let err = locks
        .try_acquire("res", Duration::from_secs(1), &retry, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, LeaseError::InvalidArgument { .. }));
}

#[tokio::test]
async fn test_auto_renew_outlives_lease() {
    let locks = memory_locks();
    let lock = locks
        .acquire_with_auto_renew("job", Duration::from_millis(150))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(lock.is_held());
    assert!(locks
        .acquire("job", Duration::from_secs(1))
        .await
        .unwrap()
        .is_none());

    assert!(lock.release().await.unwrap());
    assert!(locks
        .acquire("job", Duration::from_secs(1))
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_auto_renew_not_acquired() {
    let locks = memory_locks();
    locks
        .acquire("job", Duration::from_secs(10))
        .await
        .unwrap()
        .unwrap();

    let err = locks
        .acquire_with_auto_renew("job", Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, LeaseError::NotAcquired { ref resource } if resource == "job"));
}

#[tokio::test]
async fn test_auto_renew_drop_stops_renewal() {
    let locks = memory_locks();
    let lock = locks
        .acquire_with_auto_renew("job", Duration::from_millis(120))
        .await
        .unwrap();
    drop(lock);

    // Without renewal the lease runs out on its own
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(locks
        .acquire("job", Duration::from_secs(1))
        .await
        .unwrap()
        .is_some());
}

/// Store wrapper whose lock primitives fail on demand
struct FlakyStore {
    inner: MemoryStore,
    fail_acquire: AtomicBool,
    fail_release: AtomicBool,
    fail_renew: AtomicBool,
    renew_calls: AtomicUsize,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            fail_acquire: AtomicBool::new(false),
            fail_release: AtomicBool::new(false),
            fail_renew: AtomicBool::new(false),
            renew_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait::async_trait]
impl KvStore for FlakyStore {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn backend_name(&self) -> &'static str {
        "flaky"
    }

    async fn ping(&self) -> leasekit_lock::LeaseResult<()> {
        self.inner.ping().await
    }

    async fn get(&self, key: &str) -> leasekit_lock::LeaseResult<Option<bytes::Bytes>> {
        self.inner.get(key).await
    }

    async fn set(
        &self,
        key: &str,
        value: bytes::Bytes,
        ttl: Option<Duration>,
    ) -> leasekit_lock::LeaseResult<()> {
        self.inner.set(key, value, ttl).await
    }

    async fn del(&self, key: &str) -> leasekit_lock::LeaseResult<bool> {
        self.inner.del(key).await
    }

    async fn ttl(&self, key: &str) -> leasekit_lock::LeaseResult<Option<Duration>> {
        self.inner.ttl(key).await
    }

    async fn scan_match(&self, pattern: &str) -> leasekit_lock::LeaseResult<Vec<String>> {
        self.inner.scan_match(pattern).await
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> leasekit_lock::LeaseResult<bool> {
        if self.fail_acquire.load(Ordering::SeqCst) {
            return Err(LeaseError::store("connection refused"));
        }
        self.inner.set_if_absent(key, value, ttl).await
    }

    async fn compare_and_delete(
        &self,
        key: &str,
        expected: &str,
    ) -> leasekit_lock::LeaseResult<bool> {
        if self.fail_release.load(Ordering::SeqCst) {
            return Err(LeaseError::store("broken pipe"));
        }
        self.inner.compare_and_delete(key, expected).await
    }

    async fn compare_and_expire(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> leasekit_lock::LeaseResult<bool> {
        self.renew_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_renew.load(Ordering::SeqCst) {
            return Err(LeaseError::store("connection reset"));
        }
        self.inner.compare_and_expire(key, expected, ttl).await
    }

    async fn incr_window(&self, key: &str, window: Duration) -> leasekit_lock::LeaseResult<u64> {
        self.inner.incr_window(key, window).await
    }

    async fn sliding_window_admit(
        &self,
        key: &str,
        now_ms: i64,
        window: Duration,
        limit: u64,
        member: &str,
    ) -> leasekit_lock::LeaseResult<leasekit_store::SlidingWindowOutcome> {
        self.inner
            .sliding_window_admit(key, now_ms, window, limit, member)
            .await
    }

    async fn token_bucket_take(
        &self,
        key: &str,
        now_ms: i64,
        capacity: f64,
        refill_per_sec: f64,
    ) -> leasekit_lock::LeaseResult<leasekit_store::TokenBucketOutcome> {
        self.inner
            .token_bucket_take(key, now_ms, capacity, refill_per_sec)
            .await
    }
}

#[tokio::test]
async fn test_auto_renew_gives_up_after_persistent_store_errors() {
    let store = Arc::new(FlakyStore::new());
    store.fail_renew.store(true, Ordering::SeqCst);
    let locks = LockManager::new(Arc::clone(&store));
    let lock = locks
        .acquire_with_auto_renew("job", Duration::from_millis(90))
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(1), lock.lost())
        .await
        .unwrap();
    assert!(!lock.is_held());
    // Errors were retried before giving up
    assert!(store.renew_calls.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn test_acquire_store_failure_is_not_contention() {
    let store = Arc::new(FlakyStore::new());
    store.fail_acquire.store(true, Ordering::SeqCst);
    let locks = LockManager::new(Arc::clone(&store));

    let err = locks
        .acquire("job", Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, LeaseError::StoreUnavailable(_)));

    // Retries stop at the first store error rather than burning attempts
    let started = Instant::now();
    let err = locks
        .try_acquire(
            "job",
            Duration::from_secs(1),
            &RetryPolicy::new(20, Duration::from_millis(50)),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LeaseError::StoreUnavailable(_)));
    assert!(started.elapsed() < Duration::from_millis(500));
}

#[tokio::test]
async fn test_release_store_failure_propagates() {
    let store = Arc::new(FlakyStore::new());
    let locks = LockManager::new(Arc::clone(&store));
    let lease = locks
        .acquire("job", Duration::from_secs(5))
        .await
        .unwrap()
        .unwrap();

    store.fail_release.store(true, Ordering::SeqCst);
    let err = locks.release_lease(&lease).await.unwrap_err();
    assert!(matches!(err, LeaseError::StoreUnavailable(_)));

    // The failed release left the claim in place
    store.fail_release.store(false, Ordering::SeqCst);
    assert!(locks
        .acquire("job", Duration::from_secs(1))
        .await
        .unwrap()
        .is_none());
    assert!(locks.release_lease(&lease).await.unwrap());
}

// ============================================================================
// RedisStore
// ============================================================================

async fn redis_locks() -> LockManager<leasekit_store::RedisStore> {
    let store = leasekit_store::RedisStore::new(REDIS_URL).await.unwrap();
    LockManager::new(Arc::new(store))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires Redis"]
async fn test_redis_mutual_exclusion() {
    scenario_mutual_exclusion(redis_locks().await, &test_key("mutex")).await;
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_lease_expiry() {
    scenario_lease_expiry(redis_locks().await, &test_key("expiry")).await;
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_renewal_extends_lifetime() {
    scenario_renewal_extends(redis_locks().await, &test_key("renew")).await;
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_order_42_scenario() {
    let locks = redis_locks().await;
    let key = test_key("order:42");

    let first = locks
        .acquire(&key, Duration::from_secs(10))
        .await
        .unwrap()
        .unwrap();
    assert!(locks
        .acquire(&key, Duration::from_secs(10))
        .await
        .unwrap()
        .is_none());
    assert!(locks.release(&key, first.token()).await.unwrap());
    assert!(!locks.release(&key, first.token()).await.unwrap());

    let third = locks
        .acquire(&key, Duration::from_secs(10))
        .await
        .unwrap()
        .unwrap();

    // Cleanup
    locks.release_lease(&third).await.ok();
}
