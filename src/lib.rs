//! flashguard - Cache-Aside Protection and Flash-Sale Coordination
//!
//! A read-through caching layer and a distributed lock for services that run
//! as many instances in front of one shared cache (Redis) and one slower
//! authoritative store.
//!
//! # Architecture
//!
//! ```text
//!            ┌──────────────┐        ┌────────────────────┐
//!  reads ───▶│ CacheClient  │        │ SeckillCoordinator │◀─── purchases
//!            └──────┬───────┘        └─────────┬──────────┘
//!                   │   ┌─────────────────┐    │
//!                   ├──▶│ DistributedLock │◀───┤
//!                   │   └────────┬────────┘    │
//!                   ▼            ▼             ▼
//!            ┌──────────────────────┐   ┌──────────────┐
//!            │     CacheGateway     │   │ SeckillStore │
//!            └──────────────────────┘   └──────────────┘
//! ```
//!
//! # Protections
//!
//! - Cache penetration: missing ids are cached as an absent marker
//! - Cache breakdown: per-key rebuild lock, or logical expiry with a single
//!   background rebuild while stale data is served
//! - Flash-sale races: per-user lock plus a conditional stock decrement
//!
//! # Modules
//!
//! - [`adapters`] - In-memory and Redis implementations of the ports
//! - [`cache`] - Read-through cache client and read policies
//! - [`domain`] - Ports and domain events
//! - [`error`] - Error types
//! - [`lock`] - Leased distributed lock
//! - [`metrics`] - Prometheus counters
//! - [`seckill`] - Flash-sale coordinator

pub mod adapters;
pub mod cache;
pub mod domain;
pub mod error;
pub mod lock;
pub mod metrics;
pub mod seckill;

// Re-export commonly used types
pub use cache::{CacheClient, CacheConfig, KeySpace, ReadPolicy, RebuildExecutor};
pub use domain::{CacheGateway, IdGenerator, SeckillStore};
pub use error::{Error, Result};
pub use lock::{DistributedLock, LockLease, RetryPolicy};
pub use seckill::{RequestContext, SeckillCoordinator, SeckillOutcome};

/// Crate version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
