//! Cache Metrics Collection
//!
//! Per-client counters for monitoring read-path health. Every lookup is also
//! mirrored into the process-wide Prometheus counters.

use std::sync::atomic::{AtomicU64, Ordering};

use super::client::ReadPolicy;

/// How a single lookup was answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Hit,
    NullHit,
    Miss,
    Stale,
}

impl Lookup {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lookup::Hit => "hit",
            Lookup::NullHit => "null_hit",
            Lookup::Miss => "miss",
            Lookup::Stale => "stale",
        }
    }
}

/// Cache metrics collector
#[derive(Debug, Default)]
pub struct CacheMetrics {
    // Read path
    hits: AtomicU64,
    null_hits: AtomicU64,
    misses: AtomicU64,
    stale_reads: AtomicU64,
    fallback_calls: AtomicU64,

    // Rebuilds
    rebuilds_spawned: AtomicU64,
    rebuilds_failed: AtomicU64,
    rebuilds_rejected: AtomicU64,

    // Locking
    lock_wait_timeouts: AtomicU64,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_lookup(&self, policy: ReadPolicy, lookup: Lookup) {
        let counter = match lookup {
            Lookup::Hit => &self.hits,
            Lookup::NullHit => &self.null_hits,
            Lookup::Miss => &self.misses,
            Lookup::Stale => &self.stale_reads,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_cache_lookup(policy.as_str(), lookup.as_str());
    }

    pub fn record_fallback_call(&self) {
        self.fallback_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rebuild_spawned(&self) {
        self.rebuilds_spawned.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_rebuild("spawned");
    }

    pub fn record_rebuild_failed(&self) {
        self.rebuilds_failed.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_rebuild("failed");
    }

    pub fn record_rebuild_rejected(&self) {
        self.rebuilds_rejected.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_rebuild("rejected");
    }

    pub fn record_lock_wait_timeout(&self) {
        self.lock_wait_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn fallback_calls(&self) -> u64 {
        self.fallback_calls.load(Ordering::Relaxed)
    }

    /// Share of lookups answered from the cache (value, marker or stale data)
    pub fn hit_ratio(&self) -> f64 {
        let served = (self.hits() + self.null_hits.load(Ordering::Relaxed)
            + self.stale_reads.load(Ordering::Relaxed)) as f64;
        let total = served + self.misses.load(Ordering::Relaxed) as f64;
        if total == 0.0 {
            0.0
        } else {
            served / total
        }
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            hits: self.hits(),
            null_hits: self.null_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stale_reads: self.stale_reads.load(Ordering::Relaxed),
            fallback_calls: self.fallback_calls(),
            rebuilds_spawned: self.rebuilds_spawned.load(Ordering::Relaxed),
            rebuilds_failed: self.rebuilds_failed.load(Ordering::Relaxed),
            rebuilds_rejected: self.rebuilds_rejected.load(Ordering::Relaxed),
            lock_wait_timeouts: self.lock_wait_timeouts.load(Ordering::Relaxed),
            hit_ratio: self.hit_ratio(),
        }
    }

    /// Reset all metrics
    pub fn reset(&self) {
        for counter in [
            &self.hits,
            &self.null_hits,
            &self.misses,
            &self.stale_reads,
            &self.fallback_calls,
            &self.rebuilds_spawned,
            &self.rebuilds_failed,
            &self.rebuilds_rejected,
            &self.lock_wait_timeouts,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Snapshot of all cache metrics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheMetricsSnapshot {
    pub hits: u64,
    pub null_hits: u64,
    pub misses: u64,
    pub stale_reads: u64,
    pub fallback_calls: u64,
    pub rebuilds_spawned: u64,
    pub rebuilds_failed: u64,
    pub rebuilds_rejected: u64,
    pub lock_wait_timeouts: u64,
    pub hit_ratio: f64,
}

// =============================================================================
// Tests
// =============================================================================
