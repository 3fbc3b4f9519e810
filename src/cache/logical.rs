//! Logical expiry: never wait, serve stale data while one background task
//! rebuilds the entry.
//!
//! ```text
//!   read envelope ── missing ──▶ None
//!        │
//!        ├── fresh ──▶ data
//!        │
//!        └── stale ──▶ try_acquire lock:{prefix}{id}
//!                         ├── contended ───────────────────────▶ stale data
//!                         └── acquired ─▶ re-read ─ fresh ─────▶ fresh data
//!                                            └─ stale ─▶ submit rebuild ─▶ stale data
//! ```

use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, warn};

use super::client::{CacheClient, ReadPolicy};
use super::envelope::{encode, LogicalEnvelope};
use super::metrics::Lookup;
use crate::error::{Error, Result};
use crate::lock::LockLease;

impl CacheClient {
    /// Read a logically expiring key.
    ///
    /// Keys are expected to be pre-warmed with `set_with_logical_expire`; a
    /// missing key yields `None` without calling `fallback`. Rebuild failures
    /// are logged and counted but never returned to the reader.
    pub async fn query_with_logical_expire<T, I, F, Fut>(
        &self,
        key_prefix: &str,
        id: I,
        fallback: F,
        ttl: Duration,
    ) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        I: Display + Send + 'static,
        F: FnOnce(I) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<T>>> + Send + 'static,
    {
        let key = format!("{}{}", key_prefix, id);
        let policy = ReadPolicy::LogicalExpiry;

        let Some(envelope) = self.read_envelope::<T>(&key).await? else {
            self.metrics.record_lookup(policy, Lookup::Miss);
            return Ok(None);
        };
        if !envelope.is_expired() {
            self.metrics.record_lookup(policy, Lookup::Hit);
            return Ok(Some(envelope.data));
        }
        self.metrics.record_lookup(policy, Lookup::Stale);

        let lease = match self.lock.try_acquire(&key, self.config.lock_ttl).await {
            Ok(Some(lease)) => lease,
            Ok(None) => {
                debug!(key = %key, "rebuild already in flight, serving stale");
                return Ok(Some(envelope.data));
            }
            Err(e) => {
                warn!(key = %key, error = %e, "rebuild lock unavailable, serving stale");
                return Ok(Some(envelope.data));
            }
        };

        // A rebuild may have finished between our read and the acquire
        match self.read_envelope::<T>(&key).await {
            Ok(Some(current)) if !current.is_expired() => {
                self.lock.release_or_alarm(&lease).await;
                return Ok(Some(current.data));
            }
            Ok(_) => {}
            Err(e) => warn!(key = %key, error = %e, "double check failed, rebuilding anyway"),
        }

        self.submit_rebuild(key, lease, id, fallback, ttl).await;
        Ok(Some(envelope.data))
    }

    async fn submit_rebuild<T, I, F, Fut>(
        &self,
        key: String,
        lease: LockLease,
        id: I,
        fallback: F,
        ttl: Duration,
    ) where
        T: Serialize + Send + 'static,
        I: Send + 'static,
        F: FnOnce(I) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<T>>> + Send + 'static,
    {
        let client = self.clone();
        let task_key = key.clone();
        let task_lease = lease.clone();
        let accepted = self.executor.try_spawn(async move {
            client
                .rebuild_logical(task_key, task_lease, id, fallback, ttl)
                .await;
        });

        if accepted {
            self.metrics.record_rebuild_spawned();
            debug!(key = %key, "logical rebuild submitted");
        } else {
            self.metrics.record_rebuild_rejected();
            warn!(
                key = %key,
                workers = self.executor.workers(),
                closed = self.executor.is_closed(),
                "rebuild executor unavailable, skipping rebuild"
            );
            self.lock.release_or_alarm(&lease).await;
        }
    }

    /// Body of a background rebuild. Always releases `lease`.
    async fn rebuild_logical<T, I, F, Fut>(
        self,
        key: String,
        lease: LockLease,
        id: I,
        fallback: F,
        ttl: Duration,
    ) where
        T: Serialize,
        F: FnOnce(I) -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        let rebuild = async {
            self.metrics.record_fallback_call();
            let refreshed = match fallback(id).await? {
                Some(value) => {
                    // Owned encode: no borrow of `T` may live across the write
                    let bytes = encode(&LogicalEnvelope::new(value, ttl)?)?;
                    self.gateway.set(&key, bytes, None).await?;
                    true
                }
                None => {
                    self.gateway.delete(&key).await?;
                    false
                }
            };
            Ok::<bool, Error>(refreshed)
        };

        let outcome = self
            .lock
            .with_lease(lease, AssertUnwindSafe(rebuild).catch_unwind())
            .await;

        match outcome {
            Ok(Ok(true)) => debug!(key = %key, "logical entry refreshed"),
            Ok(Ok(false)) => debug!(key = %key, "entity gone from store, logical entry removed"),
            Ok(Err(e)) => {
                self.metrics.record_rebuild_failed();
                error!(key = %key, error = %e, "logical rebuild failed, stale entry kept");
            }
            Err(_) => {
                self.metrics.record_rebuild_failed();
                error!(key = %key, "logical rebuild panicked, stale entry kept");
            }
        }
    }
}
