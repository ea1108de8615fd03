//! Distributed lease locks over a shared key-value store
//!
//! A lock is a key holding a random token with a store-enforced expiry.
//! Acquisition is a single set-if-absent; release and renewal are single
//! compare-and-act operations, so a holder can never remove or extend
//! someone else's claim.
//!
//! ```no_run
//! # async fn demo() -> errors::LeaseResult<()> {
//! use leasekit_lock::LockManager;
//! use leasekit_store::MemoryStore;
//! use std::{sync::Arc, time::Duration};
//!
//! let locks = LockManager::new(Arc::new(MemoryStore::new()));
//! if let Some(lease) = locks.acquire("order:42", Duration::from_secs(10)).await? {
//!     // ... protected work ...
//!     locks.release(lease.resource_key(), lease.token()).await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod auto_renew;
pub mod manager;
pub mod retry;

pub use auto_renew::AutoRenewLock;
pub use manager::{LockLease, LockManager};
pub use retry::RetryPolicy;

pub use errors::{LeaseError, LeaseResult};
pub use leasekit_store::LockToken;
pub use tokio_util::sync::CancellationToken;
