//! Layered configuration for leasekit tools
//!
//! Priority (highest to lowest):
//! 1. Environment variables `LEASEKIT_*` (nested with `__`, e.g.
//!    `LEASEKIT_CACHE__BASE_TTL_MS=60000`)
//! 2. Explicit config file passed by the caller
//! 3. `config/leasekit.toml`, `config/leasekit.yaml`
//! 4. Default values
//!
//! Durations are milliseconds throughout.

use errors::{LeaseError, LeaseResult};
use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use leasekit_cache::{CacheConfig, ContentionPolicy};
use leasekit_infra::redis::RedisConfig;
use leasekit_lock::RetryPolicy;
use leasekit_store::KeySpace;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "LEASEKIT_";

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LeaseKitConfig {
    /// Prefix applied to every key; empty for none
    pub namespace: String,
    pub redis: RedisConfig,
    pub lock: LockSettings,
    pub cache: CacheSettings,
    pub rate_limit: RateLimitSettings,
    pub logging: LoggingSettings,
}

impl LeaseKitConfig {
    pub fn validate(&self) -> LeaseResult<()> {
        if self.redis.url.is_empty() {
            return Err(LeaseError::Configuration("redis.url must not be empty".into()));
        }
        if self.redis.max_connections == 0 {
            return Err(LeaseError::Configuration(
                "redis.max_connections must be > 0".into(),
            ));
        }
        self.lock.validate()?;
        self.cache.validate()?;
        self.rate_limit.validate()?;
        Ok(())
    }

    pub fn keys(&self) -> KeySpace {
        KeySpace::with_namespace(self.namespace.clone())
    }

    /// Cache configuration with this config's namespace
    pub fn cache_config(&self) -> CacheConfig {
        self.cache.to_cache_config(self.keys())
    }
}

/// Lock defaults used by tools
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct LockSettings {
    pub lease_ms: u64,
    pub retry_interval_ms: u64,
    pub max_attempts: u32,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            lease_ms: 10_000,
            retry_interval_ms: 100,
            max_attempts: 10,
        }
    }
}

impl LockSettings {
    pub fn lease(&self) -> Duration {
        Duration::from_millis(self.lease_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.retry_interval_ms),
        )
    }

    pub fn validate(&self) -> LeaseResult<()> {
        if self.lease_ms == 0 {
            return Err(LeaseError::Configuration("lock.lease_ms must be > 0".into()));
        }
        if self.max_attempts == 0 {
            return Err(LeaseError::Configuration(
                "lock.max_attempts must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

/// Behaviour on a busy population lock
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContentionMode {
    #[default]
    Fail,
    Wait,
}

/// Stampede-guarded cache settings
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheSettings {
    pub base_ttl_ms: u64,
    pub jitter_ms: u64,
    pub lock_lease_ms: u64,
    pub lock_retry_interval_ms: u64,
    pub lock_max_attempts: u32,
    pub contention: ContentionMode,
    /// Only used with `contention = "wait"`
    pub max_wait_ms: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            base_ttl_ms: 300_000,
            jitter_ms: 30_000,
            lock_lease_ms: 5_000,
            lock_retry_interval_ms: 50,
            lock_max_attempts: 5,
            contention: ContentionMode::Fail,
            max_wait_ms: 2_000,
        }
    }
}

impl CacheSettings {
    pub fn contention_policy(&self) -> ContentionPolicy {
        match self.contention {
            ContentionMode::Fail => ContentionPolicy::Fail,
            ContentionMode::Wait => ContentionPolicy::Wait {
                max_wait: Duration::from_millis(self.max_wait_ms),
            },
        }
    }

    pub fn to_cache_config(&self, keys: KeySpace) -> CacheConfig {
        CacheConfig {
            base_ttl: Duration::from_millis(self.base_ttl_ms),
            jitter: Duration::from_millis(self.jitter_ms),
            lock_lease: Duration::from_millis(self.lock_lease_ms),
            lock_retry: RetryPolicy::new(
                self.lock_max_attempts,
                Duration::from_millis(self.lock_retry_interval_ms),
            ),
            contention: self.contention_policy(),
            keys,
        }
    }

    pub fn validate(&self) -> LeaseResult<()> {
        if self.base_ttl_ms == 0 {
            return Err(LeaseError::Configuration("cache.base_ttl_ms must be > 0".into()));
        }
        if self.jitter_ms >= self.base_ttl_ms {
            return Err(LeaseError::Configuration(format!(
                "cache.jitter_ms ({}) must be below cache.base_ttl_ms ({})",
                self.jitter_ms, self.base_ttl_ms
            )));
        }
        if self.lock_lease_ms == 0 {
            return Err(LeaseError::Configuration(
                "cache.lock_lease_ms must be > 0".into(),
            ));
        }
        if self.lock_max_attempts == 0 {
            return Err(LeaseError::Configuration(
                "cache.lock_max_attempts must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

/// Rate limiter defaults used by tools
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Requests per window (fixed and sliding window)
    pub limit: u64,
    pub window_ms: u64,
    /// Token bucket burst size
    pub capacity: u64,
    pub refill_per_sec: f64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            limit: 100,
            window_ms: 60_000,
            capacity: 20,
            refill_per_sec: 5.0,
        }
    }
}

impl RateLimitSettings {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn validate(&self) -> LeaseResult<()> {
        if self.limit == 0 || self.window_ms == 0 {
            return Err(LeaseError::Configuration(
                "rate_limit.limit and rate_limit.window_ms must be > 0".into(),
            ));
        }
        if self.capacity == 0 || !self.refill_per_sec.is_finite() || self.refill_per_sec <= 0.0 {
            return Err(LeaseError::Configuration(
                "rate_limit.capacity and rate_limit.refill_per_sec must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Logging settings
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingSettings {
    /// Filter used when `RUST_LOG` is unset
    pub level: String,
    /// JSON file output
    pub json: bool,
    /// Directory for daily log files
    pub dir: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            dir: None,
        }
    }
}

/// Load configuration from defaults, standard files, `file` and environment
pub fn load_config(file: Option<&Path>) -> LeaseResult<LeaseKitConfig> {
    let mut figment = Figment::from(Serialized::defaults(LeaseKitConfig::default()))
        .merge(Toml::file("config/leasekit.toml"))
        .merge(Yaml::file("config/leasekit.yaml"));

    if let Some(path) = file {
        figment = figment.merge(file_provider(path)?);
    }

    let config: LeaseKitConfig = figment
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .map_err(|e| LeaseError::Configuration(format!("Failed to load configuration: {}", e)))?;

    config.validate()?;
    Ok(config)
}

fn file_provider(path: &Path) -> LeaseResult<Figment> {
    if !path.exists() {
        return Err(LeaseError::Configuration(format!(
            "Config file not found: {}",
            path.display()
        )));
    }

    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .ok_or_else(|| LeaseError::Configuration("Config file must have an extension".into()))?;

    match extension {
        "toml" => Ok(Figment::from(Toml::file(path))),
        "yaml" | "yml" => Ok(Figment::from(Yaml::file(path))),
        "json" => Ok(Figment::from(Json::file(path))),
        _ => Err(LeaseError::Configuration(format!(
            "Unsupported config file format: {}",
            extension
        ))),
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn clear_env() {
        for (key, _) in std::env::vars() {
            if key.starts_with(ENV_PREFIX) {
                std::env::remove_var(key);
            }
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        let config = load_config(None).unwrap();
        assert_eq!(config, LeaseKitConfig::default());
        assert_eq!(config.redis.url, "redis://localhost:6379");
        assert_eq!(config.cache.contention, ContentionMode::Fail);
        assert_eq!(config.cache_config().contention, ContentionPolicy::Fail);
    }

    #[test]
    #[serial]
    fn test_file_overrides_defaults() {
        clear_env();
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
namespace = "shop"

[redis]
url = "redis://cache:6380"

[cache]
base_ttl_ms = 60000
jitter_ms = 5000
contention = "wait"
max_wait_ms = 750
"#
        )
        .unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.namespace, "shop");
        assert_eq!(config.redis.url, "redis://cache:6380");
        // Untouched fields keep defaults
        assert_eq!(config.redis.max_connections, RedisConfig::default().max_connections);
        assert_eq!(config.lock, LockSettings::default());

        let cache = config.cache_config();
        assert_eq!(cache.base_ttl, Duration::from_secs(60));
        assert_eq!(
            cache.contention,
            ContentionPolicy::Wait {
                max_wait: Duration::from_millis(750)
            }
        );
        assert_eq!(cache.keys.lock_key("user:7"), "shop:lock:user:7");
    }

    #[test]
    #[serial]
    fn test_yaml_file() {
        clear_env();
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "lock:\n  lease_ms: 2500\n  max_attempts: 4").unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.lock.lease(), Duration::from_millis(2500));
        assert_eq!(config.lock.retry_policy().max_attempts, 4);
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        clear_env();
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[lock]\nlease_ms = 2500").unwrap();

        std::env::set_var("LEASEKIT_LOCK__LEASE_MS", "7000");
        std::env::set_var("LEASEKIT_REDIS__URL", "redis://env-host:6379");
        let result = load_config(Some(file.path()));
        clear_env();

        let config = result.unwrap();
        assert_eq!(config.lock.lease_ms, 7000);
        assert_eq!(config.redis.url, "redis://env-host:6379");
    }

    #[test]
    #[serial]
    fn test_invalid_values_rejected() {
        clear_env();
        std::env::set_var("LEASEKIT_CACHE__JITTER_MS", "999999999");
        let result = load_config(None);
        clear_env();

        let err = result.unwrap_err();
        assert!(matches!(err, LeaseError::Configuration(ref m) if m.contains("jitter_ms")));
    }

    #[test]
    fn test_missing_and_unsupported_files() {
        assert!(load_config(Some(Path::new("/nonexistent/leasekit.toml"))).is_err());

        let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        let err = load_config(Some(file.path())).unwrap_err();
        assert!(err.to_string().contains("Unsupported"));
    }
}
