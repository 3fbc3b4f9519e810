//! Gateway-backed id generator
//!
//! Ids are 64-bit: one sign bit left clear, 31 bits of seconds since
//! 2022-01-01T00:00:00Z, then a 32-bit per-day sequence drawn from an atomic
//! counter in the shared cache. Every instance shares the counter, so ids are
//! unique across processes and increase with time within a segment.
//!
//! ```text
//! ┌───┬───────────────────────────────┬────────────────────────────────┐
//! │ 0 │ seconds since epoch (31 bits) │ daily sequence (32 bits)       │
//! └───┴───────────────────────────────┴────────────────────────────────┘
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::ports::{CacheGateway, IdGenerator};
use crate::error::{Error, Result};

/// 2022-01-01T00:00:00Z
pub const BEGIN_TIMESTAMP: i64 = 1_640_995_200;

/// Width of the sequence part
pub const COUNT_BITS: u32 = 32;

/// Id generator on top of any `CacheGateway`.
pub struct GatewayIdGenerator {
    gateway: Arc<dyn CacheGateway>,
}

impl GatewayIdGenerator {
    /// Create a generator sharing `gateway` with the rest of the service
    pub fn new(gateway: Arc<dyn CacheGateway>) -> Self {
        Self { gateway }
    }

    /// Counter key for `segment` on the day of `now`
    pub fn counter_key(segment: &str, now: DateTime<Utc>) -> String {
        format!("icr:{}:{}", segment, now.format("%Y:%m:%d"))
    }

    /// Compose an id from its parts
    pub fn compose(now: DateTime<Utc>, sequence: u64) -> Result<u64> {
        let elapsed = now.timestamp() - BEGIN_TIMESTAMP;
        if elapsed < 0 {
            return Err(Error::Internal(format!(
                "clock is before the id epoch: {}",
                now
            )));
        }
        if sequence >= 1u64 << COUNT_BITS {
            return Err(Error::Internal(format!(
                "daily id sequence exhausted: {}",
                sequence
            )));
        }
        Ok(((elapsed as u64) << COUNT_BITS) | sequence)
    }

    /// Seconds-since-epoch part of an id
    pub fn timestamp_of(id: u64) -> i64 {
        (id >> COUNT_BITS) as i64 + BEGIN_TIMESTAMP
    }
}

#[async_trait]
impl IdGenerator for GatewayIdGenerator {
    async fn next_id(&self, segment: &str) -> Result<u64> {
        let now = Utc::now();
        let sequence = self.gateway.incr(&Self::counter_key(segment, now)).await?;
        Self::compose(now, sequence as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryGateway;
    use chrono::TimeZone;
    use std::collections::HashSet;

    #[test]
    fn test_counter_key_is_per_day() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap();
        assert_eq!(
            GatewayIdGenerator::counter_key("order", now),
            "icr:order:2024:03:09"
        );
    }

    #[test]
    fn test_compose_layout() {
        let now = Utc.timestamp_opt(BEGIN_TIMESTAMP + 10, 0).unwrap();
        let id = GatewayIdGenerator::compose(now, 3).unwrap();
        assert_eq!(id, (10u64 << 32) | 3);
        assert_eq!(GatewayIdGenerator::timestamp_of(id), BEGIN_TIMESTAMP + 10);
    }

    #[test]
    fn test_compose_rejects_pre_epoch_clock() {
        let now = Utc.timestamp_opt(BEGIN_TIMESTAMP - 1, 0).unwrap();
        assert!(GatewayIdGenerator::compose(now, 1).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_ids_unique_across_tasks() {
        let ids = Arc::new(GatewayIdGenerator::new(Arc::new(InMemoryGateway::new())));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let ids = ids.clone();
            handles.push(tokio::spawn(async move {
                let mut out = Vec::new();
                for _ in 0..50 {
                    out.push(ids.next_id("order").await.unwrap());
                }
                out
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.await.unwrap() {
                assert!(seen.insert(id), "duplicate id {}", id);
            }
        }
        assert_eq!(seen.len(), 400);
    }

    #[tokio::test]
    async fn test_ids_increase_within_segment() {
        let ids = GatewayIdGenerator::new(Arc::new(InMemoryGateway::new()));
        let first = ids.next_id("order").await.unwrap();
        let second = ids.next_id("order").await.unwrap();
        assert!(second > first);
    }
}
