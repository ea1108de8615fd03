//! Cache counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for monitoring cache behaviour
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Reads answered straight from the store
    pub hits: AtomicU64,
    /// Reads that found nothing on the fast path
    pub misses: AtomicU64,
    /// Misses answered by another caller's population
    pub coalesced: AtomicU64,
    /// Loader executions that wrote an entry
    pub loads: AtomicU64,
    /// Loader executions that failed
    pub load_failures: AtomicU64,
    /// Misses that gave up with `Contended`
    pub contended: AtomicU64,
}

impl CacheStats {
    /// Get a snapshot of current stats
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            load_failures: self.load_failures.load(Ordering::Relaxed),
            contended: self.contended.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Snapshot of cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
    pub loads: u64,
    pub load_failures: u64,
    pub contended: u64,
}
