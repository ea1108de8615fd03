//! Bounded retry policy for lock acquisition

use errors::{LeaseError, LeaseResult};
use std::time::Duration;

/// How `try_acquire` retries a contended lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total acquisition attempts, including the first
    pub max_attempts: u32,
    /// Pause between consecutive attempts
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            interval: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    /// A single attempt, no waiting
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Upper bound on time spent sleeping between attempts
    pub fn max_wait(&self) -> Duration {
        self.interval
            .saturating_mul(self.max_attempts.saturating_sub(1))
    }

    pub fn validate(&self) -> LeaseResult<()> {
        if self.max_attempts == 0 {
            return Err(LeaseError::invalid_argument(
                "max_attempts",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}
