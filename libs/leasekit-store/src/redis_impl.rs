//! Redis implementation of the store trait
//!
//! Conditional operations run as Lua scripts so the compare and the write
//! happen inside one Redis command. Scripts are hashed once at construction
//! and invoked with EVALSHA (falling back to EVAL on a cold script cache).

use crate::memory_impl::bucket_idle_ttl;
use crate::traits::*;
use async_trait::async_trait;
use bytes::Bytes;
use errors::{LeaseError, LeaseResult};
use leasekit_infra::redis::{ttl_millis, RedisClient, RedisConfig, Script};
use std::sync::Arc;
use std::time::Duration;

const COMPARE_AND_DELETE: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

const COMPARE_AND_EXPIRE: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("PEXPIRE", KEYS[1], ARGV[2])
else
    return 0
end
"#;

const INCR_WINDOW: &str = r#"
local n = redis.call("INCR", KEYS[1])
if n == 1 then
    redis.call("PEXPIRE", KEYS[1], ARGV[1])
end
return n
"#;

const SLIDING_WINDOW_ADMIT: &str = r#"
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
redis.call("ZREMRANGEBYSCORE", KEYS[1], "-inf", now - window)
local count = redis.call("ZCARD", KEYS[1])
local admitted = 0
if count < limit then
    redis.call("ZADD", KEYS[1], now, ARGV[4])
    count = count + 1
    admitted = 1
end
redis.call("PEXPIRE", KEYS[1], window)
local oldest = redis.call("ZRANGE", KEYS[1], 0, 0, "WITHSCORES")
local oldest_ms = -1
if oldest[2] then
    oldest_ms = tonumber(oldest[2])
end
return {admitted, count, oldest_ms}
"#;

const TOKEN_BUCKET_TAKE: &str = r#"
local now = tonumber(ARGV[1])
local capacity = tonumber(ARGV[2])
local rate = tonumber(ARGV[3])
local state = redis.call("HMGET", KEYS[1], "tokens", "ts")
local tokens = tonumber(state[1])
local ts = tonumber(state[2])
if tokens == nil or ts == nil then
    tokens = capacity
    ts = now
end
local elapsed = math.max(0, now - ts)
tokens = math.min(capacity, tokens + elapsed * rate / 1000)
local allowed = 0
if tokens >= 1 then
    tokens = tokens - 1
    allowed = 1
end
redis.call("HSET", KEYS[1], "tokens", tostring(tokens), "ts", tostring(now))
redis.call("PEXPIRE", KEYS[1], ARGV[4])
return {allowed, tostring(tokens)}
"#;

/// Redis-backed store implementation
#[derive(Debug)]
pub struct RedisStore {
    client: Arc<RedisClient>,
    compare_and_delete: Script,
    compare_and_expire: Script,
    incr_window: Script,
    sliding_window_admit: Script,
    token_bucket_take: Script,
}

impl RedisStore {
    /// Create new Redis store from URL
    pub async fn new(url: &str) -> LeaseResult<Self> {
        Self::with_config(RedisConfig::from_url(url)).await
    }

    /// Create new Redis store with custom pool configuration
    pub async fn with_config(config: RedisConfig) -> LeaseResult<Self> {
        let client = RedisClient::with_config(config)
            .await
            .map_err(store_unavailable)?;
        Ok(Self::from_client(Arc::new(client)))
    }

    /// Create from existing RedisClient
    pub fn from_client(client: Arc<RedisClient>) -> Self {
        Self {
            client,
            compare_and_delete: Script::new(COMPARE_AND_DELETE),
            compare_and_expire: Script::new(COMPARE_AND_EXPIRE),
            incr_window: Script::new(INCR_WINDOW),
            sliding_window_admit: Script::new(SLIDING_WINDOW_ADMIT),
            token_bucket_take: Script::new(TOKEN_BUCKET_TAKE),
        }
    }

    /// Get reference to underlying Redis client
    pub fn client(&self) -> &Arc<RedisClient> {
        &self.client
    }
}

fn store_unavailable(err: anyhow::Error) -> LeaseError {
    LeaseError::StoreUnavailable(format!("{:#}", err))
}

#[async_trait]
impl KvStore for RedisStore {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }

    async fn ping(&self) -> LeaseResult<()> {
        self.client.ping().await.map_err(store_unavailable)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> LeaseResult<Option<Bytes>> {
        let value = self.client.get(key).await.map_err(store_unavailable)?;
        Ok(value.map(Bytes::from))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> LeaseResult<()> {
        self.client
            .set(key, &value, ttl)
            .await
            .map_err(store_unavailable)
    }

    async fn del(&self, key: &str) -> LeaseResult<bool> {
        self.client.del(key).await.map_err(store_unavailable)
    }

    async fn ttl(&self, key: &str) -> LeaseResult<Option<Duration>> {
        self.client.pttl(key).await.map_err(store_unavailable)
    }

    async fn scan_match(&self, pattern: &str) -> LeaseResult<Vec<String>> {
        self.client
            .scan_match(pattern)
            .await
            .map_err(store_unavailable)
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> LeaseResult<bool> {
        self.client
            .set_nx_px(key, value.as_bytes(), ttl)
            .await
            .map_err(store_unavailable)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> LeaseResult<bool> {
        let removed: i64 = self
            .client
            .invoke_script(&self.compare_and_delete, &[key], &[expected.to_string()])
            .await
            .map_err(store_unavailable)?;
        Ok(removed == 1)
    }

    async fn compare_and_expire(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> LeaseResult<bool> {
        let updated: i64 = self
            .client
            .invoke_script(
                &self.compare_and_expire,
                &[key],
                &[expected.to_string(), ttl_millis(ttl).to_string()],
            )
            .await
            .map_err(store_unavailable)?;
        Ok(updated == 1)
    }

    async fn incr_window(&self, key: &str, window: Duration) -> LeaseResult<u64> {
        let count: i64 = self
            .client
            .invoke_script(&self.incr_window, &[key], &[ttl_millis(window).to_string()])
            .await
            .map_err(store_unavailable)?;
        Ok(count.max(0) as u64)
    }

    async fn sliding_window_admit(
        &self,
        key: &str,
        now_ms: i64,
        window: Duration,
        limit: u64,
        member: &str,
    ) -> LeaseResult<SlidingWindowOutcome> {
        let (admitted, count, oldest_ms): (i64, i64, i64) = self
            .client
            .invoke_script(
                &self.sliding_window_admit,
                &[key],
                &[
                    now_ms.to_string(),
                    ttl_millis(window).to_string(),
                    limit.to_string(),
                    member.to_string(),
                ],
            )
            .await
            .map_err(store_unavailable)?;
        Ok(SlidingWindowOutcome {
            admitted: admitted == 1,
            count: count.max(0) as u64,
            oldest_ms: (oldest_ms >= 0).then_some(oldest_ms),
        })
    }

    async fn token_bucket_take(
        &self,
        key: &str,
        now_ms: i64,
        capacity: f64,
        refill_per_sec: f64,
    ) -> LeaseResult<TokenBucketOutcome> {
        let idle_ttl = bucket_idle_ttl(capacity, refill_per_sec);
        let (allowed, tokens): (i64, String) = self
            .client
            .invoke_script(
                &self.token_bucket_take,
                &[key],
                &[
                    now_ms.to_string(),
                    capacity.to_string(),
                    refill_per_sec.to_string(),
                    ttl_millis(idle_ttl).to_string(),
                ],
            )
            .await
            .map_err(store_unavailable)?;
        let tokens = tokens
            .parse::<f64>()
            .map_err(|e| LeaseError::Serialization(format!("token bucket state: {}", e)))?;
        Ok(TokenBucketOutcome {
            allowed: allowed == 1,
            tokens,
        })
    }
}
