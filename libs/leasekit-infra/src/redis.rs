//! Redis client module with connection pooling
//!
//! Provides a minimal async Redis client with only the commands leasekit
//! needs: plain and conditional string writes, expiry inspection, key
//! scanning, and atomic Lua script invocation.

use anyhow::{Context, Result};
use bb8::{Pool, PooledConnection};
use bb8_redis::RedisConnectionManager;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

// Re-export commonly used types from redis crate
pub use ::redis::Script;

/// Redis connection pool configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RedisConfig {
    /// Redis URL (e.g., "redis://localhost:6379")
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of idle connections
    pub min_idle: Option<u32>,
    /// Connection timeout in seconds
    pub connection_timeout: u64,
    /// Maximum lifetime of a connection in seconds
    pub max_lifetime: Option<u64>,
    /// Idle timeout in seconds
    pub idle_timeout: Option<u64>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            max_connections: 16,
            min_idle: Some(2),
            connection_timeout: 5,
            max_lifetime: Some(3600), // 1 hour
            idle_timeout: Some(600),  // 10 minutes
        }
    }
}

impl RedisConfig {
    /// Create config from URL with default pool settings
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

/// Redis asynchronous client with connection pooling
pub struct RedisClient {
    pool: Arc<Pool<RedisConnectionManager>>,
    url: String,
}

impl std::fmt::Debug for RedisClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisClient")
            .field("url", &self.url)
            .field("pool_state", &self.pool.state())
            .finish()
    }
}

impl RedisClient {
    /// Create a new client with default configuration
    pub async fn new(url: &str) -> Result<Self> {
        Self::with_config(RedisConfig::from_url(url)).await
    }

    /// Create a new client with custom configuration, verifying it with PING
    pub async fn with_config(config: RedisConfig) -> Result<Self> {
        let client = Self::build_pool(config).await?;
        client
            .ping()
            .await
            .context("Failed to ping Redis server")?;
        Ok(client)
    }

    async fn build_pool(config: RedisConfig) -> Result<Self> {
        let manager = RedisConnectionManager::new(config.url.as_str())
            .context("Failed to create Redis connection manager")?;

        let mut pool_builder = Pool::builder()
            .max_size(config.max_connections)
            .connection_timeout(Duration::from_secs(config.connection_timeout));

        if let Some(min_idle) = config.min_idle {
            pool_builder = pool_builder.min_idle(Some(min_idle));
        }

        if let Some(max_lifetime) = config.max_lifetime {
            pool_builder = pool_builder.max_lifetime(Some(Duration::from_secs(max_lifetime)));
        }

        if let Some(idle_timeout) = config.idle_timeout {
            pool_builder = pool_builder.idle_timeout(Some(Duration::from_secs(idle_timeout)));
        }

        let pool = pool_builder
            .build(manager)
            .await
            .context("Failed to build Redis connection pool")?;

        debug!(url = %config.url, max = config.max_connections, "Redis pool ready");

        Ok(Self {
            pool: Arc::new(pool),
            url: config.url,
        })
    }

    /// Get a connection from the pool
    pub async fn get_connection(&self) -> Result<PooledConnection<'_, RedisConnectionManager>> {
        self.pool
            .get()
            .await
            .context("Failed to get connection from pool")
    }

    /// URL this client was built from
    pub fn url(&self) -> &str {
        &self.url
    }

    /// PING operation - test connection
    pub async fn ping(&self) -> Result<String> {
        let mut conn = self.get_connection().await?;
        let pong: String = ::redis::cmd("PING")
            .query_async(&mut *conn)
            .await
            .context("Failed to PING Redis server")?;
        Ok(pong)
    }

    /// GET operation returning raw bytes
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.get_connection().await?;
        let value: Option<Vec<u8>> = ::redis::cmd("GET")
            .arg(key)
            .query_async(&mut *conn)
            .await
            .with_context(|| format!("Failed to GET key: {}", key))?;
        Ok(value)
    }

    /// SET operation, with `PX` expiry when `ttl` is given
    pub async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.get_connection().await?;
        let mut cmd = ::redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        let _: () = cmd
            .query_async(&mut *conn)
            .await
            .with_context(|| format!("Failed to SET key: {}", key))?;
        Ok(())
    }

    /// `SET key value NX PX ttl` - returns true if the key was absent and is now set
    pub async fn set_nx_px(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool> {
        let mut conn = self.get_connection().await?;
        let reply: Option<String> = ::redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut *conn)
            .await
            .with_context(|| format!("Failed to SET NX key: {}", key))?;
        Ok(reply.is_some())
    }

    /// Delete one key
    pub async fn del(&self, key: &str) -> Result<bool> {
        let mut conn = self.get_connection().await?;
        let removed: i64 = ::redis::cmd("DEL")
            .arg(key)
            .query_async(&mut *conn)
            .await
            .with_context(|| format!("Failed to DEL key: {}", key))?;
        Ok(removed > 0)
    }

    /// PTTL operation
    ///
    /// Returns `None` when the key does not exist or has no expiry.
    pub async fn pttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut conn = self.get_connection().await?;
        let ms: i64 = ::redis::cmd("PTTL")
            .arg(key)
            .query_async(&mut *conn)
            .await
            .with_context(|| format!("Failed to PTTL key: {}", key))?;
        // -2: missing key, -1: no expiry
        Ok((ms >= 0).then(|| Duration::from_millis(ms as u64)))
    }

    /// Use SCAN for production-safe key iteration
    pub async fn scan_match(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.get_connection().await?;
        let mut keys = Vec::new();
        let mut cursor = 0u64;

        loop {
            let (new_cursor, batch): (u64, Vec<String>) = ::redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut *conn)
                .await
                .with_context(|| format!("Failed to SCAN with pattern: {}", pattern))?;

            keys.extend(batch);
            cursor = new_cursor;

            if cursor == 0 {
                break;
            }
        }

        Ok(keys)
    }

    /// Invoke a Lua script atomically (EVALSHA with EVAL fallback)
    pub async fn invoke_script<T: ::redis::FromRedisValue>(
        &self,
        script: &Script,
        keys: &[&str],
        args: &[String],
    ) -> Result<T> {
        let mut conn = self.get_connection().await?;
        let mut invocation = script.prepare_invoke();
        for key in keys {
            invocation.key(*key);
        }
        for arg in args {
            invocation.arg(arg.as_str());
        }
        let value: T = invocation
            .invoke_async(&mut *conn)
            .await
            .with_context(|| format!("Failed to invoke script on keys: {:?}", keys))?;
        Ok(value)
    }
}

// Clones share the connection pool
impl Clone for RedisClient {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
            url: self.url.clone(),
        }
    }
}

/// Redis rejects `PX 0`; sub-millisecond leases round up to 1ms.
pub fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}
