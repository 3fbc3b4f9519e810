//! Cache client: configuration, key spaces and the shared read/write helpers
//! used by the three read policies.

use std::fmt::{self, Display};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::envelope::{encode, marker_ttl, Cached, LogicalEnvelope, ABSENT_MARKER};
use super::executor::RebuildExecutor;
use super::metrics::CacheMetrics;
use crate::domain::ports::CacheGateway;
use crate::error::{Error, Result};
use crate::lock::{DistributedLock, RetryPolicy};

// =============================================================================
// Configuration
// =============================================================================

/// Client-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL of the absent marker written for missing entities
    pub null_ttl: Duration,
    /// Lease of the per-key rebuild lock
    pub lock_ttl: Duration,
    /// Backoff while waiting for another rebuild (mutex policy)
    pub retry: RetryPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            null_ttl: Duration::from_secs(2 * 60),
            lock_ttl: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

/// How a key space is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadPolicy {
    /// Read-through with null caching
    PassThrough,
    /// Read-through with a per-key rebuild lock
    MutexRebuild,
    /// Serve stale data, rebuild in the background
    LogicalExpiry,
}

impl ReadPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadPolicy::PassThrough => "pass_through",
            ReadPolicy::MutexRebuild => "mutex_rebuild",
            ReadPolicy::LogicalExpiry => "logical_expiry",
        }
    }
}

impl Display for ReadPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A family of keys sharing a prefix, a read policy and TTLs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySpace {
    /// Key prefix, e.g. `cache:shop:`
    pub prefix: String,
    pub policy: ReadPolicy,
    /// Value TTL (logical TTL for `LogicalExpiry`)
    pub ttl: Duration,
    /// Absent-marker TTL, `CacheConfig::null_ttl` when unset
    pub null_ttl: Option<Duration>,
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>, policy: ReadPolicy, ttl: Duration) -> Self {
        Self {
            prefix: prefix.into(),
            policy,
            ttl,
            null_ttl: None,
        }
    }

    pub fn with_null_ttl(mut self, null_ttl: Duration) -> Self {
        self.null_ttl = Some(null_ttl);
        self
    }

    pub fn key<I: Display>(&self, id: &I) -> String {
        format!("{}{}", self.prefix, id)
    }

    fn effective_null_ttl(&self, config: &CacheConfig) -> Duration {
        self.null_ttl.unwrap_or(config.null_ttl)
    }

    /// Check the key space against the client configuration.
    pub fn validate(&self, config: &CacheConfig) -> Result<()> {
        if self.prefix.is_empty() {
            return Err(Error::Config("key space prefix must not be empty".into()));
        }
        if self.ttl.is_zero() {
            return Err(Error::Config(format!(
                "key space {} has a zero TTL",
                self.prefix
            )));
        }
        if self.policy != ReadPolicy::LogicalExpiry {
            let null_ttl = self.effective_null_ttl(config);
            if null_ttl >= self.ttl {
                return Err(Error::Config(format!(
                    "key space {}: null TTL {:?} must be below value TTL {:?}",
                    self.prefix, null_ttl, self.ttl
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Client
// =============================================================================

/// Read-through cache over a `CacheGateway`.
///
/// Cheap to clone; clones share the gateway, lock, executor and metrics.
#[derive(Clone)]
pub struct CacheClient {
    pub(super) gateway: Arc<dyn CacheGateway>,
    pub(super) lock: DistributedLock,
    pub(super) executor: RebuildExecutor,
    pub(super) config: CacheConfig,
    pub(super) metrics: Arc<CacheMetrics>,
}

impl fmt::Debug for CacheClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheClient")
            .field("config", &self.config)
            .field("executor", &self.executor)
            .finish()
    }
}

impl CacheClient {
    pub fn new(
        gateway: Arc<dyn CacheGateway>,
        executor: RebuildExecutor,
        config: CacheConfig,
    ) -> Self {
        let lock = DistributedLock::new(gateway.clone());
        Self {
            gateway,
            lock,
            executor,
            config,
            metrics: Arc::new(CacheMetrics::new()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    pub fn executor(&self) -> &RebuildExecutor {
        &self.executor
    }

    /// Lock handle used for rebuilds; shares the client's instance id.
    pub fn lock(&self) -> &DistributedLock {
        &self.lock
    }

    /// Read `id` from `space` with the space's read policy.
    pub async fn get<T, I, F, Fut>(&self, space: &KeySpace, id: I, fallback: F) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        I: Display + Send + 'static,
        F: FnOnce(I) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<T>>> + Send + 'static,
    {
        space.validate(&self.config)?;
        let null_ttl = space.effective_null_ttl(&self.config);
        match space.policy {
            ReadPolicy::PassThrough => {
                self.pass_through(&space.prefix, id, fallback, space.ttl, null_ttl)
                    .await
            }
            ReadPolicy::MutexRebuild => {
                self.mutex_rebuild(&space.prefix, id, fallback, space.ttl, null_ttl)
                    .await
            }
            ReadPolicy::LogicalExpiry => {
                self.query_with_logical_expire(&space.prefix, id, fallback, space.ttl)
                    .await
            }
        }
    }

    /// Write a value with a storage TTL.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        self.gateway.set(key, encode(value)?, Some(ttl)).await
    }

    /// Write a value wrapped in a logical-expiry envelope, without storage TTL.
    pub async fn set_with_logical_expire<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<()> {
        let envelope = LogicalEnvelope::new(value, ttl)?;
        self.gateway.set(key, encode(&envelope)?, None).await
    }

    /// Drop the cached entry for `id`. Call after the store was updated.
    pub async fn invalidate<I: Display>(&self, key_prefix: &str, id: I) -> Result<bool> {
        let key = format!("{}{}", key_prefix, id);
        let removed = self.gateway.delete(&key).await?;
        debug!(key = %key, removed, "cache entry invalidated");
        Ok(removed)
    }

    // =========================================================================
    // Shared helpers
    // =========================================================================

    pub(super) async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Cached<T>> {
        Cached::decode(self.gateway.get(key).await?)
    }

    pub(super) async fn read_envelope<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<LogicalEnvelope<T>>> {
        match self.gateway.get(key).await? {
            None => Ok(None),
            Some(raw) if raw.as_ref() == ABSENT_MARKER => Ok(None),
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
        }
    }

    /// Cache a fallback result: the entity with `ttl`, or the absent marker.
    pub(super) async fn populate<T: Serialize>(
        &self,
        key: &str,
        loaded: Option<&T>,
        ttl: Duration,
        null_ttl: Duration,
    ) -> Result<()> {
        match loaded {
            Some(value) => self.gateway.set(key, encode(value)?, Some(ttl)).await,
            None => {
                let ttl = marker_ttl(null_ttl, ttl);
                debug!(key = %key, ttl_ms = ttl.as_millis() as u64, "caching absent marker");
                self.gateway
                    .set(key, Bytes::from_static(ABSENT_MARKER), Some(ttl))
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryGateway;
    use assert_matches::assert_matches;

    fn client() -> (Arc<InMemoryGateway>, CacheClient) {
        let gateway = Arc::new(InMemoryGateway::new());
        let client = CacheClient::new(gateway.clone(), RebuildExecutor::new(2), CacheConfig::default());
        (gateway, client)
    }

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.null_ttl, Duration::from_secs(120));
        assert_eq!(config.lock_ttl, Duration::from_secs(10));
    }

    #[test]
    fn test_key_space_validation() {
        let config = CacheConfig::default();

        let shops = KeySpace::new("cache:shop:", ReadPolicy::MutexRebuild, Duration::from_secs(1800));
        assert!(shops.validate(&config).is_ok());
        assert_eq!(shops.key(&7), "cache:shop:7");

        let short = KeySpace::new("cache:short:", ReadPolicy::PassThrough, Duration::from_secs(60));
        assert_matches!(short.validate(&config), Err(Error::Config(_)));
        assert!(short
            .clone()
            .with_null_ttl(Duration::from_secs(10))
            .validate(&config)
            .is_ok());

        // Logical spaces never write markers
        let hot = KeySpace::new("cache:hot:", ReadPolicy::LogicalExpiry, Duration::from_secs(20));
        assert!(hot.validate(&config).is_ok());

        let empty = KeySpace::new("", ReadPolicy::PassThrough, Duration::from_secs(600));
        assert_matches!(empty.validate(&config), Err(Error::Config(_)));
    }

    #[tokio::test]
    async fn test_set_and_invalidate() {
        let (gateway, client) = client();

        client
            .set("cache:shop:1", &"noodles".to_string(), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(gateway.ttl("cache:shop:1").is_some());

        assert!(client.invalidate("cache:shop:", 1).await.unwrap());
        assert!(gateway.get("cache:shop:1").await.unwrap().is_none());
        assert!(!client.invalidate("cache:shop:", 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_set_with_logical_expire_has_no_storage_ttl() {
        let (gateway, client) = client();

        client
            .set_with_logical_expire("cache:hot:1", &42u32, Duration::from_secs(20))
            .await
            .unwrap();
        assert!(gateway.ttl("cache:hot:1").is_none());

        let envelope = client
            .read_envelope::<u32>("cache:hot:1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(envelope.data, 42);
        assert!(!envelope.is_expired());
    }

    #[test]
    fn test_policy_names() {
        assert_eq!(ReadPolicy::PassThrough.to_string(), "pass_through");
        assert_eq!(ReadPolicy::MutexRebuild.as_str(), "mutex_rebuild");
        assert_eq!(ReadPolicy::LogicalExpiry.as_str(), "logical_expiry");
    }
}
