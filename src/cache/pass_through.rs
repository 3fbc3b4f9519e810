//! Read-through with null caching (penetration protection).

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::client::{CacheClient, ReadPolicy};
use super::envelope::Cached;
use super::metrics::Lookup;
use crate::error::Result;

impl CacheClient {
    /// Read `key_prefix + id`, falling back to `fallback` on a miss.
    ///
    /// A `None` from the fallback is cached as an absent marker for the
    /// configured null TTL, so repeated lookups of a missing id stop reaching
    /// the store. Fallback and gateway errors are returned as is.
    pub async fn query_with_pass_through<T, I, F, Fut>(
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
        self.pass_through(key_prefix, id, fallback, ttl, null_ttl).await
    }

    pub(super) async fn pass_through<T, I, F, Fut>(
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
        let policy = ReadPolicy::PassThrough;

        match self.read::<T>(&key).await? {
            Cached::Hit(value) => {
                self.metrics.record_lookup(policy, Lookup::Hit);
                return Ok(Some(value));
            }
            Cached::Absent => {
                self.metrics.record_lookup(policy, Lookup::NullHit);
                debug!(key = %key, "absent marker hit");
                return Ok(None);
            }
            Cached::Miss => self.metrics.record_lookup(policy, Lookup::Miss),
        }

        self.metrics.record_fallback_call();
        let loaded = fallback(id).await?;
        self.populate(&key, loaded.as_ref(), ttl, null_ttl).await?;
        debug!(key = %key, found = loaded.is_some(), "cache populated from store");
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use serde::Deserialize;

    use crate::adapters::InMemoryGateway;
    use crate::cache::{CacheClient, CacheConfig, RebuildExecutor};
    use crate::domain::ports::CacheGateway;
    use crate::error::{Error, Result};

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Shop {
        id: u64,
        name: String,
    }

    const SHOP_TTL: Duration = Duration::from_secs(30 * 60);

    fn setup() -> (Arc<InMemoryGateway>, CacheClient) {
        let gateway = Arc::new(InMemoryGateway::new());
        let client = CacheClient::new(gateway.clone(), RebuildExecutor::new(1), CacheConfig::default());
        (gateway, client)
    }

    async fn load(calls: &AtomicUsize, id: u64) -> Result<Option<Shop>> {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok((id == 1).then(|| Shop {
            id,
            name: "noodle house".into(),
        }))
    }

    #[tokio::test]
    async fn test_miss_populates_then_hits() {
        let (gateway, client) = setup();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let shop = client
                .query_with_pass_through("cache:shop:", 1u64, |id| load(&calls, id), SHOP_TTL)
                .await
                .unwrap();
            assert_eq!(shop.unwrap().name, "noodle house");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let ttl = gateway.ttl("cache:shop:1").unwrap();
        assert!(ttl > Duration::from_secs(29 * 60));
    }

    #[tokio::test]
    async fn test_missing_id_is_cached_as_absent() {
        let (gateway, client) = setup();
        let calls = AtomicUsize::new(0);

        for _ in 0..5 {
            let shop = client
                .query_with_pass_through("cache:shop:", 999u64, |id| load(&calls, id), SHOP_TTL)
                .await
                .unwrap();
            assert!(shop.is_none());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let marker_ttl = gateway.ttl("cache:shop:999").unwrap();
        assert!(marker_ttl <= Duration::from_secs(120));
        assert_eq!(client.metrics().snapshot().null_hits, 4);
    }

    #[tokio::test]
    async fn test_absent_marker_expires() {
        let gateway = Arc::new(InMemoryGateway::new());
        let config = CacheConfig {
            null_ttl: Duration::from_millis(30),
            ..Default::default()
        };
        let client = CacheClient::new(gateway.clone(), RebuildExecutor::new(1), config);
        let calls = AtomicUsize::new(0);

        client
            .query_with_pass_through("cache:shop:", 5u64, |id| load(&calls, id), SHOP_TTL)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        client
            .query_with_pass_through("cache:shop:", 5u64, |id| load(&calls, id), SHOP_TTL)
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fallback_error_propagates_and_caches_nothing() {
        let (gateway, client) = setup();

        let err = client
            .query_with_pass_through(
                "cache:shop:",
                1u64,
                |_| async { Err::<Option<Shop>, _>(Error::Store("db down".into())) },
                SHOP_TTL,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Store(_)));
        assert!(gateway.get("cache:shop:1").await.unwrap().is_none());
    }
}
