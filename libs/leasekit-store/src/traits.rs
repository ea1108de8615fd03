//! Trait definitions for the key-value store abstraction

use async_trait::async_trait;
use bytes::Bytes;
use errors::LeaseResult;
use std::any::Any;
use std::time::Duration;

/// Outcome of a sliding-window admission attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlidingWindowOutcome {
    /// Whether the request was recorded in the window
    pub admitted: bool,
    /// Requests in the window after this attempt
    pub count: u64,
    /// Timestamp (ms) of the oldest request still in the window
    pub oldest_ms: Option<i64>,
}

/// Outcome of a token-bucket take attempt
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenBucketOutcome {
    /// Whether a token was consumed
    pub allowed: bool,
    /// Tokens left in the bucket after this attempt
    pub tokens: f64,
}

/// Shared key-value store collaborator
///
/// Every conditional operation is a single atomic step against the
/// store: there is no read-then-write window another client can slip into.
/// Expired keys are indistinguishable from missing keys.
///
/// Implementations:
/// - `RedisStore`: production Redis backend (`SET NX PX` and Lua scripts)
/// - `MemoryStore`: in-process backend for tests and embedded use
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    // ========== Introspection ==========

    /// Allow downcasting to concrete types
    fn as_any(&self) -> &dyn Any;

    /// Short backend name for logs
    fn backend_name(&self) -> &'static str;

    /// Check the store is reachable
    async fn ping(&self) -> LeaseResult<()>;

    // ========== Basic Key-Value Operations ==========

    /// Get value by key. `None` for missing or expired keys.
    async fn get(&self, key: &str) -> LeaseResult<Option<Bytes>>;

    /// Set value for key, overwriting any previous value and expiry
    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> LeaseResult<()>;

    /// Delete key
    async fn del(&self, key: &str) -> LeaseResult<bool>;

    /// Remaining time to live. `None` for missing keys or keys without expiry.
    async fn ttl(&self, key: &str) -> LeaseResult<Option<Duration>>;

    /// Scan keys matching a glob pattern (`*` wildcard only)
    async fn scan_match(&self, pattern: &str) -> LeaseResult<Vec<String>>;

    // ========== Conditional Operations ==========

    /// Set `key` to `value` with expiry `ttl` only if it is absent.
    ///
    /// Returns true if the key was absent and is now set.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> LeaseResult<bool>;

    /// Delete `key` only if its current value equals `expected`.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> LeaseResult<bool>;

    /// Reset the expiry of `key` to `ttl` only if its current value equals `expected`.
    async fn compare_and_expire(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> LeaseResult<bool>;

    // ========== Rate Limiting Primitives ==========

    /// Increment a window counter, setting its expiry on the first increment.
    ///
    /// Returns the counter value after incrementing.
    async fn incr_window(&self, key: &str, window: Duration) -> LeaseResult<u64>;

    /// Sliding-window log admission over a sorted set of timestamps.
    ///
    /// Drops entries at or before `now_ms - window`, then records `member`
    /// at `now_ms` if fewer than `limit` entries remain.
    async fn sliding_window_admit(
        &self,
        key: &str,
        now_ms: i64,
        window: Duration,
        limit: u64,
        member: &str,
    ) -> LeaseResult<SlidingWindowOutcome>;

    /// Token-bucket take: refill by elapsed time, then consume one token if available.
    async fn token_bucket_take(
        &self,
        key: &str,
        now_ms: i64,
        capacity: f64,
        refill_per_sec: f64,
    ) -> LeaseResult<TokenBucketOutcome>;
}

/// Glob matcher shared by backends that cannot delegate `MATCH` to the server
pub(crate) fn glob_match(pattern: &str, key: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == key;
    }

    let mut rest = key;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }
    true
}
