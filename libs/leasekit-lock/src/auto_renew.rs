//! Background lease renewal
//!
//! The renewal task owns nothing but a stop signal and a held flag:
//!
//! - `CancellationToken` is cancelled by [`AutoRenewLock::release`] or by drop;
//! - `watch<bool>` flips to `false` once renewal finds the lock gone, and
//!   never flips back.
//!
//! A renewal that returns `false` ends the loop at once. Store errors are
//! tolerated until a full lease has passed since the last confirmed
//! renewal; by then the claim may have expired, so the lock is marked lost.

use crate::manager::{LockLease, LockManager};
use errors::{LeaseError, LeaseResult};
use leasekit_store::{KvStore, LockToken};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info_span, warn, Instrument};

/// Renewal cadence for a lease: a third of it, so two ticks fit before expiry
pub fn renew_interval(lease: Duration) -> Duration {
    (lease / 3).max(Duration::from_millis(1))
}

/// A held lock whose lease is extended in the background
///
/// Dropping the handle stops renewal without releasing; the lease then
/// runs out on its own. Call [`release`](Self::release) to free it at once.
pub struct AutoRenewLock<S: KvStore + ?Sized> {
    manager: LockManager<S>,
    lease: LockLease,
    cancel: CancellationToken,
    held: watch::Receiver<bool>,
    task: Option<JoinHandle<()>>,
}

impl<S: KvStore + ?Sized> AutoRenewLock<S> {
    pub(crate) fn start(manager: LockManager<S>, lease: LockLease) -> Self {
        let cancel = CancellationToken::new();
        let (held_tx, held_rx) = watch::channel(true);

        let span = info_span!("lock_renewal", resource = %lease.resource_key());
        let task = tokio::spawn(
            renew_loop(
                manager.clone(),
                lease.resource_key().to_string(),
                lease.token().clone(),
                lease.lease(),
                cancel.clone(),
                held_tx,
            )
            .instrument(span),
        );

        Self {
            manager,
            lease,
            cancel,
            held: held_rx,
            task: Some(task),
        }
    }

    pub fn resource_key(&self) -> &str {
        self.lease.resource_key()
    }

    pub fn token(&self) -> &LockToken {
        self.lease.token()
    }

    pub fn lease(&self) -> &LockLease {
        &self.lease
    }

    /// Whether renewal still believes the lock is held
    pub fn is_held(&self) -> bool {
        *self.held.borrow()
    }

    /// `Err(NotHeld)` once ownership has been lost.
    ///
    /// Call before each protected step that must not run without the lock.
    pub fn ensure_held(&self) -> LeaseResult<()> {
        if self.is_held() {
            Ok(())
        } else {
            Err(LeaseError::not_held(self.resource_key()))
        }
    }

    /// Resolves when ownership is lost or the renewal loop has stopped
    pub async fn lost(&self) {
        let mut held = self.held.clone();
        // Err means the loop has exited; nothing will renew any more
        let _ = held.wait_for(|held| !*held).await;
    }

    /// Stop renewing and release the lock.
    ///
    /// `Ok(false)` when the lock had already been lost or had expired. Both
    /// that and store errors are logged; neither panics.
    pub async fn release(mut self) -> LeaseResult<bool> {
        self.stop().await;

        let result = self.manager.release_lease(&self.lease).await;
        if let Err(e) = &result {
            error!(resource = self.lease.resource_key(), "Release failed: {}", e);
        }
        result
    }

    async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!(resource = self.lease.resource_key(), "Renewal task failed: {}", e);
            }
        }
    }
}

impl<S: KvStore + ?Sized> Drop for AutoRenewLock<S> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl<S: KvStore + ?Sized> std::fmt::Debug for AutoRenewLock<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoRenewLock")
            .field("lease", &self.lease)
            .field("held", &self.is_held())
            .finish()
    }
}

async fn renew_loop<S: KvStore + ?Sized>(
    manager: LockManager<S>,
    resource_key: String,
    token: LockToken,
    lease: Duration,
    cancel: CancellationToken,
    held: watch::Sender<bool>,
) {
    let interval = renew_interval(lease);
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_confirmed = Instant::now();

    debug!(interval_ms = interval.as_millis() as u64, "Renewal started");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Renewal stopped");
                break;
            }
            _ = ticker.tick() => {
                match manager.renew(&resource_key, &token, lease).await {
                    Ok(true) => last_confirmed = Instant::now(),
                    Ok(false) => {
                        warn!("Lock ownership lost; renewal stopped");
                        held.send_replace(false);
                        break;
                    }
                    Err(e) => {
                        if last_confirmed.elapsed() >= lease {
                            error!("Renewal failing for a full lease, lock presumed lost: {}", e);
                            held.send_replace(false);
                            break;
                        }
                        warn!("Renewal error, will retry: {}", e);
                    }
                }
            }
        }
    }
}
