//! Read-through guarded by a per-key rebuild lock (breakdown protection).
//!
//! ```text
//!   miss ──▶ acquire lock:{prefix}{id} (retry with backoff, bounded)
//!                 │
//!                 ▼
//!           re-read cache ── value/marker ──▶ release, return
//!                 │ miss
//!                 ▼
//!           fallback ──▶ write value/marker ──▶ release, return
//! ```

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use super::client::{CacheClient, ReadPolicy};
use super::envelope::Cached;
use super::metrics::Lookup;
use crate::error::{Error, Result};

impl CacheClient {
    /// Read `key_prefix + id`; on a miss only the lock holder calls `fallback`.
    ///
    /// Concurrent callers for the same key wait (bounded by the retry policy)
    /// and then read what the holder wrote. Returns `Error::Busy` when the
    /// lock stays contended past `RetryPolicy::max_wait`.
    pub async fn query_with_mutex<T, I, F, Fut>(
        &self,
        key_prefix: &str,
        id: I,
        fallback: F,
        ttl: Duration,
    ) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        I: Display,
        F: FnOnce(I) -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        let null_ttl = self.config.null_ttl;
        self.mutex_rebuild(key_prefix, id, fallback, ttl, null_ttl)
            .await
    }

    pub(super) async fn mutex_rebuild<T, I, F, Fut>(
        &self,
        key_prefix: &str,
        id: I,
        fallback: F,
        ttl: Duration,
        null_ttl: Duration,
    ) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        I: Display,
        F: FnOnce(I) -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        let key = format!("{}{}", key_prefix, id);
        let policy = ReadPolicy::MutexRebuild;

        match self.read::<T>(&key).await? {
            Cached::Hit(value) => {
                self.metrics.record_lookup(policy, Lookup::Hit);
                return Ok(Some(value));
            }
            Cached::Absent => {
                self.metrics.record_lookup(policy, Lookup::NullHit);
                return Ok(None);
            }
            Cached::Miss => self.metrics.record_lookup(policy, Lookup::Miss),
        }

        let lease = match self
            .lock
            .acquire_with_retry(&key, self.config.lock_ttl, &self.config.retry)
            .await
        {
            Ok(lease) => lease,
            Err(e @ Error::Busy { .. }) => {
                self.metrics.record_lock_wait_timeout();
                warn!(key = %key, "rebuild lock wait timed out");
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let rebuild = async {
            // Another holder may have rebuilt while we waited
            match self.read::<T>(&key).await? {
                Cached::Hit(value) => return Ok(Some(value)),
                Cached::Absent => return Ok(None),
                Cached::Miss => {}
            }

            self.metrics.record_fallback_call();
            let loaded = fallback(id).await?;
            self.populate(&key, loaded.as_ref(), ttl, null_ttl).await?;
            debug!(key = %key, found = loaded.is_some(), "rebuilt under lock");
            Ok::<Option<T>, Error>(loaded)
        };

        self.lock.with_lease(lease, rebuild).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use bytes::Bytes;

    use crate::adapters::InMemoryGateway;
    use crate::cache::{CacheClient, CacheConfig, RebuildExecutor};
    use crate::domain::ports::CacheGateway;
    use crate::lock::RetryPolicy;

    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    fn setup(config: CacheConfig) -> (Arc<InMemoryGateway>, CacheClient) {
        let gateway = Arc::new(InMemoryGateway::new());
        let client = CacheClient::new(gateway.clone(), RebuildExecutor::new(1), config);
        (gateway, client)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_misses_call_fallback_once() {
        let (_gateway, client) = setup(CacheConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let client = client.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                client
                    .query_with_mutex(
                        "cache:shop:",
                        1u64,
                        |id| async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok(Some(format!("shop-{}", id)))
                        },
                        TTL,
                    )
                    .await
            }));
        }

        for handle in handles {
            let value = handle.await.unwrap().unwrap();
            assert_eq!(value.as_deref(), Some("shop-1"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_busy_after_deadline() {
        let config = CacheConfig {
            retry: RetryPolicy::fixed(Duration::from_millis(5), Duration::from_millis(30)),
            ..Default::default()
        };
        let (_gateway, client) = setup(config);

        let _held = client
            .lock()
            .try_acquire("cache:shop:1", Duration::from_secs(10))
            .await
            .unwrap()
            .unwrap();

        let err = client
            .query_with_mutex(
                "cache:shop:",
                1u64,
                |_| async { Ok(Some(1u32)) },
                TTL,
            )
            .await
            .unwrap_err();
        assert_matches!(err, Error::Busy { .. });
        assert_eq!(client.metrics().snapshot().lock_wait_timeouts, 1);
    }

    #[tokio::test]
    async fn test_lock_released_after_fallback_error() {
        let (gateway, client) = setup(CacheConfig::default());

        let err = client
            .query_with_mutex(
                "cache:shop:",
                2u64,
                |_| async { Err::<Option<u32>, _>(Error::Store("timeout".into())) },
                TTL,
            )
            .await
            .unwrap_err();
        assert_matches!(err, Error::Store(_));
        assert!(gateway.get("lock:cache:shop:2").await.unwrap().is_none());

        let value = client
            .query_with_mutex("cache:shop:", 2u64, |_| async { Ok(Some(9u32)) }, TTL)
            .await
            .unwrap();
        assert_eq!(value, Some(9));
    }

    #[tokio::test]
    async fn test_missing_entity_writes_marker() {
        let (gateway, client) = setup(CacheConfig::default());

        let value = client
            .query_with_mutex("cache:shop:", 3u64, |_| async { Ok(None::<u32>) }, TTL)
            .await
            .unwrap();
        assert!(value.is_none());
        assert_eq!(
            gateway.get("cache:shop:3").await.unwrap(),
            Some(Bytes::new())
        );
        // marker stays below the value TTL
        assert!(gateway.ttl("cache:shop:3").unwrap() < TTL);
    }

    #[tokio::test]
    async fn test_double_check_returns_value_written_by_previous_holder() {
        let (gateway, client) = setup(CacheConfig::default());
        let lease = client
            .lock()
            .try_acquire("cache:shop:4", Duration::from_secs(10))
            .await
            .unwrap()
            .unwrap();

        let writer = client.clone();
        let gw = gateway.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            gw.set("cache:shop:4", Bytes::from_static(b"77"), Some(TTL))
                .await
                .unwrap();
            writer.lock().release(&lease).await.unwrap();
        });

        let calls = &AtomicUsize::new(0);
        let value = client
            .query_with_mutex(
                "cache:shop:",
                4u64,
                |_| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Some(0u32))
                },
                TTL,
            )
            .await
            .unwrap();

        assert_eq!(value, Some(77));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
