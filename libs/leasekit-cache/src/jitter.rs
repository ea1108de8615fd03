//! Expiry jitter
//!
//! Entries written at the same moment with the same base expiry would all
//! expire together and stampede together. Spreading the expiry over
//! `base ± bound` breaks that synchronisation.

use rand::Rng;
use std::time::Duration;

/// Shortest expiry ever produced
pub const MIN_TTL: Duration = Duration::from_millis(1);

/// Uniformly random duration in `[base - bound, base + bound]`, at least 1ms.
///
/// Millisecond resolution. `bound == 0` returns `base` unchanged.
pub fn jittered(base: Duration, bound: Duration) -> Duration {
    if bound.is_zero() {
        return base;
    }

    let base_ms = base.as_millis() as i64;
    let bound_ms = bound.as_millis() as i64;
    let offset = rand::thread_rng().gen_range(-bound_ms..=bound_ms);

    Duration::from_millis((base_ms + offset).max(MIN_TTL.as_millis() as i64) as u64)
}
