//! Shared runtime plumbing for leasekit tools
//!
//! - [`config`]: layered figment configuration (`LEASEKIT_*` env overrides)
//! - [`logging`]: tracing subscriber setup with daily file rotation
//! - [`shutdown`]: signal handling and cancellation tokens

pub mod config;
pub mod logging;
pub mod shutdown;

pub use config::{load_config, LeaseKitConfig};
