//! leasekit Store Abstraction
//!
//! Provides the key-value store collaborator that locks, caches and rate
//! limiters are built on, with interchangeable backends (Redis, in-memory).
//!
//! # Key Components
//!
//! - **KvStore trait**: atomic set-if-absent, compare-and-delete,
//!   compare-and-expire, plain get/set with expiry, rate-limit primitives
//! - **KeySpace**: key naming and cache-key to lock-key mapping
//! - **LockToken**: random proof of lock ownership
//! - **TimeProvider**: injectable clock for rate limiter windows

pub mod traits;

#[cfg(feature = "redis-backend")]
pub mod redis_impl;

pub mod memory_impl;

pub mod keyspace;

pub mod time;

pub mod token;

// Re-exports
pub use bytes::Bytes;
pub use errors::{LeaseError, LeaseResult};
pub use traits::{KvStore, SlidingWindowOutcome, TokenBucketOutcome};

pub use keyspace::KeySpace;
pub use token::LockToken;

#[cfg(feature = "redis-backend")]
pub use redis_impl::RedisStore;

pub use memory_impl::{MemoryStats, MemoryStore};

pub use time::{FixedTimeProvider, ManualTimeProvider, SystemTimeProvider, TimeProvider};

/// Helper functions for common setups
pub mod helpers {
    use super::{KvStore, MemoryStore};
    use std::sync::Arc;

    // ==================== Test Support ====================

    /// Create an in-memory store for unit testing
    ///
    /// # Example
    /// ```
    /// use leasekit_store::helpers::create_test_store;
    ///
    /// let store = create_test_store();
    /// assert_eq!(store.backend_name(), "memory");
    /// ```
    pub fn create_test_store() -> Arc<dyn KvStore> {
        Arc::new(MemoryStore::new())
    }

    /// Create a concrete MemoryStore for unit testing
    ///
    /// Use this when you need direct access to MemoryStore methods
    /// (e.g., `purge_expired` or `stats`).
    pub fn create_test_memory_store() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::new())
    }
}
