//! leasekit Infrastructure Layer
//!
//! This library provides store infrastructure for leasekit:
//! - Redis client with connection pooling and Lua script invocation
//!
//! # Features
//!
//! - `redis` - Enable Redis client (default)

#[cfg(feature = "redis")]
pub mod redis;
