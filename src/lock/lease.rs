//! Leased, ownership-checked distributed lock.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::FutureExt;
use tokio::time::Instant;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::retry::RetryPolicy;
use crate::domain::ports::CacheGateway;
use crate::error::{Error, Result};

/// Prefix shared by every lock key in the cache keyspace
pub const LOCK_KEY_PREFIX: &str = "lock:";

/// A held lease on a named resource.
///
/// Only the lease returned by a successful acquire can release the lock; a
/// stale lease (expired and re-acquired by someone else) releases nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockLease {
    resource_key: String,
    holder_token: String,
    ttl: Duration,
    acquired_at: Instant,
}

impl LockLease {
    /// Full cache key of the lock (`lock:{resource}`)
    pub fn resource_key(&self) -> &str {
        &self.resource_key
    }

    /// Token stored as the lock value
    pub fn holder_token(&self) -> &str {
        &self.holder_token
    }

    /// Lease duration requested at acquisition
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Local estimate of whether the store already expired the lease.
    pub fn is_expired(&self) -> bool {
        self.acquired_at.elapsed() >= self.ttl
    }
}

/// Distributed lock over a `CacheGateway`.
///
/// Tokens are `{instance}-{sequence}`: the instance part is random per lock
/// handle, the sequence is per acquisition, so two concurrent acquisitions
/// never share a token even inside one process.
#[derive(Clone)]
pub struct DistributedLock {
    gateway: Arc<dyn CacheGateway>,
    instance_id: Arc<str>,
    sequence: Arc<AtomicU64>,
}

impl std::fmt::Debug for DistributedLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedLock")
            .field("instance_id", &self.instance_id)
            .finish()
    }
}

impl DistributedLock {
    /// Create a lock handle with a fresh random instance id
    pub fn new(gateway: Arc<dyn CacheGateway>) -> Self {
        Self::with_instance_id(gateway, Uuid::new_v4().simple().to_string())
    }

    /// Create a lock handle with an explicit instance id
    pub fn with_instance_id(gateway: Arc<dyn CacheGateway>, instance_id: impl Into<String>) -> Self {
        Self {
            gateway,
            instance_id: Arc::from(instance_id.into()),
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Instance part of every token issued by this handle
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Cache key guarding `resource`
    pub fn lock_key(resource: &str) -> String {
        format!("{}{}", LOCK_KEY_PREFIX, resource)
    }

    fn next_token(&self) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", self.instance_id, seq)
    }

    /// Single non-blocking acquisition attempt.
    ///
    /// Returns `None` when another holder owns the lease.
    pub async fn try_acquire(&self, resource: &str, ttl: Duration) -> Result<Option<LockLease>> {
        let key = Self::lock_key(resource);
        let token = self.next_token();

        let acquired = self
            .gateway
            .set_if_absent(&key, Bytes::from(token.clone()), ttl)
            .await?;
        if !acquired {
            debug!(key = %key, "lock contended");
            return Ok(None);
        }

        debug!(key = %key, token = %token, ttl_ms = ttl.as_millis() as u64, "lock acquired");
        Ok(Some(LockLease {
            resource_key: key,
            holder_token: token,
            ttl,
            acquired_at: Instant::now(),
        }))
    }

    /// Retry `try_acquire` with backoff until `policy.max_wait` elapses.
    pub async fn acquire_with_retry(
        &self,
        resource: &str,
        ttl: Duration,
        policy: &RetryPolicy,
    ) -> Result<LockLease> {
        let started = Instant::now();
        let mut attempt = 0u32;

        loop {
            if let Some(lease) = self.try_acquire(resource, ttl).await? {
                if attempt > 0 {
                    debug!(resource = %resource, attempts = attempt + 1, "lock acquired after retry");
                }
                return Ok(lease);
            }

            let waited = started.elapsed();
            if waited >= policy.max_wait {
                warn!(resource = %resource, waited_ms = waited.as_millis() as u64, "gave up waiting for lock");
                return Err(Error::Busy {
                    key: Self::lock_key(resource),
                    waited,
                });
            }

            let pause = policy.backoff(attempt).min(policy.max_wait - waited);
            tokio::time::sleep(pause).await;
            attempt = attempt.saturating_add(1);
        }
    }

    /// Release a lease with an atomic compare-and-delete.
    ///
    /// Returns `Ok(false)` when the lease is no longer held by this token,
    /// which leaves the current holder's lease untouched.
    pub async fn release(&self, lease: &LockLease) -> Result<bool> {
        let released = self
            .gateway
            .compare_and_delete(&lease.resource_key, lease.holder_token.as_bytes())
            .await?;

        if released {
            debug!(key = %lease.resource_key, "lock released");
        } else {
            warn!(
                key = %lease.resource_key,
                token = %lease.holder_token,
                locally_expired = lease.is_expired(),
                "lock release skipped: lease no longer held by this token"
            );
        }
        Ok(released)
    }

    /// Run `fut` while holding `lease`, then release it on every exit path.
    ///
    /// A panic inside `fut` is re-raised after the release.
    pub async fn with_lease<F>(&self, lease: LockLease, fut: F) -> F::Output
    where
        F: Future,
    {
        let outcome = AssertUnwindSafe(fut).catch_unwind().await;
        self.release_or_alarm(&lease).await;
        match outcome {
            Ok(output) => output,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    /// Release and log transport failures as an operational alarm.
    pub(crate) async fn release_or_alarm(&self, lease: &LockLease) {
        if let Err(e) = self.release(lease).await {
            crate::metrics::record_lock_release_failure();
            error!(
                key = %lease.resource_key,
                ttl_ms = lease.ttl.as_millis() as u64,
                error = %e,
                "ALARM: lock release failed, key stays locked until its lease expires"
            );
        }
    }
}
