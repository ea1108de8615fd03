//! Store connection shared by all commands

use anyhow::{Context as _, Result};
use colored::*;
use common::config::LeaseKitConfig;
use leasekit_store::{KeySpace, KvStore, MemoryStore, RedisStore};
use std::sync::Arc;
use tracing::debug;

/// Resolved configuration plus a connected store
pub struct CliContext {
    pub config: LeaseKitConfig,
    pub store: Arc<dyn KvStore>,
}

impl CliContext {
    /// Connect to Redis, or use a process-local store when `memory` is set
    pub async fn connect(config: LeaseKitConfig, memory: bool) -> Result<Self> {
        let store: Arc<dyn KvStore> = if memory {
            println!(
                "{} Using in-process memory store (state is lost on exit)",
                "INFO".bright_cyan()
            );
            Arc::new(MemoryStore::new())
        } else {
            debug!("Connecting to {}", config.redis.url);
            let store = RedisStore::with_config(config.redis.clone())
                .await
                .with_context(|| format!("Failed to connect to {}", config.redis.url))?;
            Arc::new(store)
        };
        Ok(Self { config, store })
    }

    pub fn keys(&self) -> KeySpace {
        self.config.keys()
    }
}
