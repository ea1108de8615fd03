//! Stampede-guarded read-through cache
//!
//! On a miss only one caller per key, across all processes sharing the
//! store, runs the loader. The others wait on the population lock
//! (`lock:{key}`) and then read what it wrote to `cache:{key}`.
//!
//! ```text
//! get(key) ── hit ───────────────────────────────────────────▶ value
//!     │
//!     └─ miss ─ try_acquire(lock:key) ─┬─ acquired ─ re-check ─ loader ─ write ─ release ─▶ value
//!                                      └─ busy ───── re-read ─ (Fail | Wait) ─▶ value | Contended
//! ```

pub mod config;
pub mod jitter;
pub mod stampede;
pub mod stats;

pub use config::{CacheConfig, ContentionPolicy};
pub use jitter::jittered;
pub use stampede::StampedeCache;
pub use stats::{CacheStats, CacheStatsSnapshot};
