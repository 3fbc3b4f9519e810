//! In-Memory Cache Gateway
//!
//! Implements the `CacheGateway` port on a `DashMap` with per-entry expiry.
//! Every primitive runs under the shard lock of its key, which gives the same
//! per-operation atomicity Redis provides. Used for tests and single-instance
//! deployments.
//!
//! Expired entries are dropped when their key is read, and a full sweep runs
//! every `sweep_interval` writes so keys that are never read again (absent
//! markers for one-off ids, leases of crashed holders) do not accumulate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use crate::domain::ports::CacheGateway;
use crate::error::{Error, Result};

/// Writes between two full sweeps of expired entries.
pub const DEFAULT_SWEEP_INTERVAL: u64 = 1024;

/// A stored value with optional expiry.
#[derive(Debug, Clone)]
struct StoredValue {
    data: Bytes,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn new(data: Bytes, ttl: Option<Duration>) -> Self {
        Self {
            data,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at
            .map(|deadline| Instant::now() >= deadline)
            .unwrap_or(false)
    }
}

/// Gateway statistics
#[derive(Debug, Clone, Default)]
pub struct GatewayStats {
    /// Read operations
    pub reads: u64,
    /// Write operations (set, set_if_absent, incr)
    pub writes: u64,
    /// Delete operations (delete, compare_and_delete)
    pub deletes: u64,
    /// Expired entries reclaimed by sweeps
    pub swept: u64,
}

/// DashMap-backed gateway.
#[derive(Debug)]
pub struct InMemoryGateway {
    entries: DashMap<String, StoredValue>,
    sweep_interval: u64,
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
    swept: AtomicU64,
}

impl Default for InMemoryGateway {
    fn default() -> Self {
        Self::with_sweep_interval(DEFAULT_SWEEP_INTERVAL)
    }
}

impl InMemoryGateway {
    /// Create an empty gateway
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty gateway that sweeps every `writes` writes (at least 1).
    pub fn with_sweep_interval(writes: u64) -> Self {
        Self {
            entries: DashMap::new(),
            sweep_interval: writes.max(1),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            swept: AtomicU64::new(0),
        }
    }

    /// Number of stored keys, including expired ones not reclaimed yet
    pub fn stored_len(&self) -> usize {
        self.entries.len()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, v| !v.is_expired());
        let removed = before.saturating_sub(self.entries.len());
        self.swept.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Count a write and sweep on every `sweep_interval`-th one.
    ///
    /// Must run before the caller takes any entry guard: `retain` locks
    /// every shard.
    fn record_write(&self) {
        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % self.sweep_interval == 0 {
            let removed = self.purge_expired();
            if removed > 0 {
                debug!(removed, remaining = self.entries.len(), "expired entries swept");
            }
        }
    }

    /// Number of live (non-expired) keys
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_expired()).count()
    }

    /// Whether no live key is stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remaining TTL of a key. `None` when missing or stored without expiry.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let entry = self.entries.get(key)?;
        if entry.is_expired() {
            return None;
        }
        entry
            .expires_at
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Operation counters
    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            swept: self.swept.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl CacheGateway for InMemoryGateway {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.reads.fetch_add(1, Ordering::Relaxed);

        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired() {
                return Ok(Some(entry.data.clone()));
            }
        } else {
            return Ok(None);
        }

        // Lazily drop the expired entry
        self.entries.remove_if(key, |_, v| v.is_expired());
        Ok(None)
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()> {
        self.record_write();
        self.entries
            .insert(key.to_string(), StoredValue::new(value, ttl));
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: Bytes, ttl: Duration) -> Result<bool> {
        self.record_write();

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(StoredValue::new(value, Some(ttl)));
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoredValue::new(value, Some(ttl)));
                Ok(true)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        Ok(self
            .entries
            .remove(key)
            .map(|(_, v)| !v.is_expired())
            .unwrap_or(false))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired() => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> Result<bool> {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        Ok(self
            .entries
            .remove_if(key, |_, v| !v.is_expired() && v.data.as_ref() == expected)
            .is_some())
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        self.record_write();

        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| StoredValue::new(Bytes::from_static(b"0"), None));
        if entry.is_expired() {
            *entry = StoredValue::new(Bytes::from_static(b"0"), None);
        }

        let current: i64 = std::str::from_utf8(&entry.data)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::Gateway(format!("value at {} is not an integer", key)))?;
        let next = current + 1;
        entry.data = Bytes::from(next.to_string());
        Ok(next)
    }
}
