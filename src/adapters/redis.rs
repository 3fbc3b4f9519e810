//! Redis Cache Gateway
//!
//! Implements the `CacheGateway` port against Redis through a deadpool
//! connection pool. Lock release runs as a Lua script so the token
//! comparison and the delete execute as one step on the server.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use deadpool_redis::{Config, Connection, Pool, PoolConfig, Runtime};
use once_cell::sync::Lazy;
use redis::AsyncCommands;
use tracing::{debug, info};

use crate::domain::ports::CacheGateway;
use crate::error::{Error, Result};

/// Deletes KEYS[1] only when it holds ARGV[1].
const UNLOCK_SCRIPT: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
end
return 0
"#;

static UNLOCK: Lazy<redis::Script> = Lazy::new(|| redis::Script::new(UNLOCK_SCRIPT));

/// Redis connection settings
#[derive(Debug, Clone)]
pub struct RedisGatewayConfig {
    /// Connection URL (e.g. "redis://localhost:6379")
    pub url: String,
    /// Maximum pooled connections
    pub pool_size: usize,
}

impl Default for RedisGatewayConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            pool_size: 16,
        }
    }
}

/// Pooled Redis gateway.
#[derive(Clone)]
pub struct RedisGateway {
    pool: Pool,
}

impl RedisGateway {
    /// Build a pool from configuration and verify connectivity with PING.
    pub async fn connect(config: &RedisGatewayConfig) -> Result<Self> {
        let mut redis_config = Config::from_url(&config.url);
        if let Some(ref mut pool_config) = redis_config.pool {
            pool_config.max_size = config.pool_size;
        } else {
            redis_config.pool = Some(PoolConfig::new(config.pool_size));
        }

        let pool = redis_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| Error::Config(format!("invalid Redis configuration: {}", e)))?;

        let gateway = Self::from_pool(pool);
        let mut conn = gateway.conn().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!(url = %config.url, pool_size = config.pool_size, "Connected to Redis");

        Ok(gateway)
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: Pool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> Result<Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| Error::Pool(format!("failed to get Redis connection: {}", e)))
    }
}

impl std::fmt::Debug for RedisGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.pool.status();
        f.debug_struct("RedisGateway")
            .field("pool_size", &status.size)
            .field("available", &status.available)
            .finish()
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    // PX rejects zero
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl CacheGateway for RedisGateway {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let mut conn = self.conn().await?;
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value.map(Bytes::from))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.conn().await?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value.as_ref());
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        let _: () = cmd.query_async(&mut conn).await?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: Bytes, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value.as_ref())
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        let removed: i64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn().await?;
        let updated: i64 = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(updated == 1)
    }

    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> Result<bool> {
        let mut conn = self.conn().await?;
        let removed: i64 = UNLOCK
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;
        debug!(key = %key, removed, "compare-and-delete");
        Ok(removed == 1)
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn().await?;
        let value: i64 = conn.incr(key, 1).await?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_millis_never_zero() {
        assert_eq!(ttl_millis(Duration::ZERO), 1);
        assert_eq!(ttl_millis(Duration::from_secs(10)), 10_000);
    }

    #[test]
    fn test_default_config() {
        let config = RedisGatewayConfig::default();
        assert_eq!(config.url, "redis://127.0.0.1:6379");
        assert_eq!(config.pool_size, 16);
    }

    /// Runs against a live server only when REDIS_URL is set.
    #[tokio::test]
    async fn test_live_lock_round_trip() {
        let Ok(url) = std::env::var("REDIS_URL") else {
            return;
        };
        let gateway = RedisGateway::connect(&RedisGatewayConfig { url, pool_size: 2 })
            .await
            .unwrap();

        let key = format!("flashguard:test:{}", uuid::Uuid::new_v4());
        let ttl = Duration::from_secs(5);
        assert!(gateway.set_if_absent(&key, Bytes::from("a"), ttl).await.unwrap());
        assert!(!gateway.set_if_absent(&key, Bytes::from("b"), ttl).await.unwrap());
        assert!(!gateway.compare_and_delete(&key, b"b").await.unwrap());
        assert!(gateway.compare_and_delete(&key, b"a").await.unwrap());
        assert!(gateway.get(&key).await.unwrap().is_none());
    }
}
