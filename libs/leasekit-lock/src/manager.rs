//! Lock manager
//!
//! All ownership decisions are made by the store in one atomic step:
//!
//! | Operation  | Store primitive                        |
//! |------------|----------------------------------------|
//! | acquire    | set-if-absent with expiry (`SET NX PX`) |
//! | release    | compare-and-delete                     |
//! | renew      | compare-and-expire (`PEXPIRE`)         |

use crate::auto_renew::AutoRenewLock;
use crate::retry::RetryPolicy;
use errors::{LeaseError, LeaseResult};
use leasekit_store::{KvStore, LockToken};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A successfully acquired lease
#[derive(Debug, Clone)]
pub struct LockLease {
    resource_key: String,
    token: LockToken,
    lease: Duration,
    acquired_at: Instant,
}

impl LockLease {
    pub fn resource_key(&self) -> &str {
        &self.resource_key
    }

    pub fn token(&self) -> &LockToken {
        &self.token
    }

    pub fn lease(&self) -> Duration {
        self.lease
    }

    /// Local estimate of when the store drops the claim unless renewed.
    ///
    /// Measured from after the acquire round trip, so the real expiry is
    /// slightly earlier.
    pub fn expires_at(&self) -> Instant {
        self.acquired_at + self.lease
    }
}

/// Lease-based mutual exclusion over a [`KvStore`]
pub struct LockManager<S: KvStore + ?Sized> {
    store: Arc<S>,
}

impl<S: KvStore + ?Sized> Clone for LockManager<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: KvStore + ?Sized> LockManager<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Shared store handle
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Try once to take `resource_key` for `lease`.
    ///
    /// `Ok(None)` means another holder has it; that is not an error.
    pub async fn acquire(
        &self,
        resource_key: &str,
        lease: Duration,
    ) -> LeaseResult<Option<LockLease>> {
        validate_key(resource_key)?;
        validate_lease(lease)?;

        let token = LockToken::generate();
        let acquired = self
            .store
            .set_if_absent(resource_key, token.as_str(), lease)
            .await?;
        if !acquired {
            debug!(resource = resource_key, "Lock busy");
            return Ok(None);
        }

        debug!(resource = resource_key, lease_ms = lease.as_millis() as u64, "Lock acquired");
        Ok(Some(LockLease {
            resource_key: resource_key.to_string(),
            token,
            lease,
            acquired_at: Instant::now(),
        }))
    }

    /// Acquire with a bounded number of attempts.
    ///
    /// Sleeps `retry.interval` between attempts but not after the last one.
    /// Cancellation is checked before each attempt and interrupts any sleep,
    /// returning [`LeaseError::Cancelled`].
    pub async fn try_acquire(
        &self,
        resource_key: &str,
        lease: Duration,
        retry: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> LeaseResult<Option<LockLease>> {
        retry.validate()?;

        for attempt in 1..=retry.max_attempts {
            if cancel.is_cancelled() {
                return Err(LeaseError::Cancelled);
            }

            if let Some(acquired) = self.acquire(resource_key, lease).await? {
                return Ok(Some(acquired));
            }

            if attempt < retry.max_attempts {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(LeaseError::Cancelled),
                    _ = tokio::time::sleep(retry.interval) => {},
                }
            }
        }

        debug!(
            resource = resource_key,
            attempts = retry.max_attempts,
            "Lock not acquired after retries"
        );
        Ok(None)
    }

    /// Release the lock if `token` still holds it.
    ///
    /// `false` means the lease had already expired or been taken over; the
    /// caller's critical section may have run unprotected, so it is logged.
    pub async fn release(&self, resource_key: &str, token: &LockToken) -> LeaseResult<bool> {
        validate_key(resource_key)?;

        let released = self
            .store
            .compare_and_delete(resource_key, token.as_str())
            .await?;
        if released {
            debug!(resource = resource_key, "Lock released");
        } else {
            warn!(
                resource = resource_key,
                token = ?token,
                "Release rejected: lock not held (lease expired or taken over)"
            );
        }
        Ok(released)
    }

    /// Reset the expiry to `lease` from now if `token` still holds the lock.
    pub async fn renew(
        &self,
        resource_key: &str,
        token: &LockToken,
        lease: Duration,
    ) -> LeaseResult<bool> {
        validate_key(resource_key)?;
        validate_lease(lease)?;

        let renewed = self
            .store
            .compare_and_expire(resource_key, token.as_str(), lease)
            .await?;
        if renewed {
            debug!(resource = resource_key, lease_ms = lease.as_millis() as u64, "Lock renewed");
        } else {
            warn!(
                resource = resource_key,
                token = ?token,
                "Renew rejected: lock not held (lease expired or taken over)"
            );
        }
        Ok(renewed)
    }

    /// [`release`](Self::release), with a lost lock surfaced as [`LeaseError::NotHeld`]
    pub async fn release_checked(&self, resource_key: &str, token: &LockToken) -> LeaseResult<()> {
        if self.release(resource_key, token).await? {
            Ok(())
        } else {
            Err(LeaseError::not_held(resource_key))
        }
    }

    /// [`renew`](Self::renew), with a lost lock surfaced as [`LeaseError::NotHeld`]
    pub async fn renew_checked(
        &self,
        resource_key: &str,
        token: &LockToken,
        lease: Duration,
    ) -> LeaseResult<()> {
        if self.renew(resource_key, token, lease).await? {
            Ok(())
        } else {
            Err(LeaseError::not_held(resource_key))
        }
    }

    /// Release a lease previously returned by this manager
    pub async fn release_lease(&self, lease: &LockLease) -> LeaseResult<bool> {
        self.release(&lease.resource_key, &lease.token).await
    }

    /// Acquire once and keep the lease alive in the background.
    ///
    /// The returned handle renews every `lease / 3` until it is released or
    /// dropped, or until a renewal finds the lock gone.
    pub async fn acquire_with_auto_renew(
        &self,
        resource_key: &str,
        lease: Duration,
    ) -> LeaseResult<AutoRenewLock<S>> {
        match self.acquire(resource_key, lease).await? {
            Some(acquired) => Ok(AutoRenewLock::start(self.clone(), acquired)),
            None => Err(LeaseError::NotAcquired {
                resource: resource_key.to_string(),
            }),
        }
    }
}

fn validate_key(resource_key: &str) -> LeaseResult<()> {
    if resource_key.is_empty() {
        return Err(LeaseError::invalid_argument(
            "resource_key",
            "must not be empty",
        ));
    }
    Ok(())
}

fn validate_lease(lease: Duration) -> LeaseResult<()> {
    if lease.is_zero() {
        return Err(LeaseError::invalid_argument("lease", "must be > 0"));
    }
    Ok(())
}
