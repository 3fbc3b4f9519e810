//! Read-Through Cache
//!
//! One `CacheClient` over a shared `CacheGateway`, offering three read
//! policies selected per key space:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          CacheClient                              │
//! │                                                                   │
//! │  PassThrough        MutexRebuild             LogicalExpiry        │
//! │  null caching       null caching +           stale reads +        │
//! │                     per-key rebuild lock     background rebuild   │
//! │                                                  │                │
//! │                                                  ▼                │
//! │                                          RebuildExecutor          │
//! └──────────────────────────────────────────────────────────────────┘
//!            │                    │                     │
//!            ▼                    ▼                     ▼
//!       CacheGateway        DistributedLock        CacheGateway
//! ```
//!
//! Writers update the store first and then call `CacheClient::invalidate`.
//!
//! # Usage
//!
//! ```ignore
//! let shops = KeySpace::new("cache:shop:", ReadPolicy::MutexRebuild, Duration::from_secs(1800));
//! let shop: Option<Shop> = client.get(&shops, 1u64, |id| store.find_shop(id)).await?;
//! ```

mod client;
pub mod envelope;
mod executor;
mod logical;
mod metrics;
mod mutex;
mod pass_through;

#[cfg(test)]
mod proptest;

pub use client::{CacheClient, CacheConfig, KeySpace, ReadPolicy};
pub use envelope::{Cached, LogicalEnvelope, ABSENT_MARKER};
pub use executor::{RebuildExecutor, DEFAULT_REBUILD_WORKERS};
pub use metrics::{CacheMetrics, CacheMetricsSnapshot, Lookup};
