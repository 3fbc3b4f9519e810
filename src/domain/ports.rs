//! Domain Ports (Port/Adapter Pattern)
//!
//! This module defines the abstractions (ports) the cache, lock and seckill
//! layers depend on. Infrastructure adapters implement these traits.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Domain Layer                            │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                    Ports (Traits)                    │    │
//! │  │  CacheGateway │ IdGenerator │ SeckillStore │ Events │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Infrastructure Layer                       │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                  Adapters (Impls)                    │    │
//! │  │  RedisGateway │ InMemoryGateway │ InMemorySeckill   │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::events::DomainEvent;
use crate::error::Result;

// =============================================================================
// Value Objects
// =============================================================================

/// A flash-sale voucher with limited stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeckillVoucher {
    /// Voucher identifier
    pub voucher_id: u64,
    /// Remaining stock, never negative
    pub stock: i32,
    /// Sale window start (inclusive)
    pub begin_time: DateTime<Utc>,
    /// Sale window end (inclusive)
    pub end_time: DateTime<Utc>,
}

impl SeckillVoucher {
    /// Create a voucher.
    pub fn new(
        voucher_id: u64,
        stock: i32,
        begin_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Self {
        Self {
            voucher_id,
            stock,
            begin_time,
            end_time,
        }
    }

    /// Whether the sale has not started yet at `now`.
    pub fn not_started(&self, now: DateTime<Utc>) -> bool {
        self.begin_time > now
    }

    /// Whether the sale is over at `now`.
    pub fn ended(&self, now: DateTime<Utc>) -> bool {
        self.end_time < now
    }

    /// Whether `now` falls inside `[begin_time, end_time]`.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.not_started(now) && !self.ended(now)
    }
}

/// What a conditional stock decrement did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockDecrement {
    /// One unit was taken
    Applied,
    /// Stock was already zero
    SoldOut,
    /// The sale window had not opened at `now`
    NotStarted,
    /// The sale window had closed at `now`
    Ended,
    /// No such voucher
    Missing,
}

impl StockDecrement {
    /// Whether a row changed.
    pub fn applied(&self) -> bool {
        matches!(self, StockDecrement::Applied)
    }
}

/// An order placed for a seckill voucher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoucherOrder {
    /// Globally unique order id
    pub id: u64,
    /// Buyer
    pub user_id: u64,
    /// Purchased voucher
    pub voucher_id: u64,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Cache Gateway Port
// =============================================================================

/// Port for the shared key-value cache.
///
/// Every operation is atomic on its own. There are no multi-key transactions;
/// `compare_and_delete` is the only compound primitive and must execute as a
/// single indivisible step against the shared store.
#[async_trait]
pub trait CacheGateway: Send + Sync {
    /// Read a value.
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Write a value. `None` stores it without expiry.
    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()>;

    /// Write a value only if the key holds nothing. Returns whether it was written.
    async fn set_if_absent(&self, key: &str, value: Bytes, ttl: Duration) -> Result<bool>;

    /// Delete a key. Returns whether a value was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Reset the TTL of an existing key. Returns whether the key existed.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Delete `key` only if it currently holds exactly `expected`.
    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> Result<bool>;

    /// Atomically increment an integer counter, creating it at zero.
    async fn incr(&self, key: &str) -> Result<i64>;
}

// =============================================================================
// Id Generator Port
// =============================================================================

/// Port for globally unique, segment-partitioned ids.
#[async_trait]
pub trait IdGenerator: Send + Sync {
    /// Next id for `segment`, unique and increasing across all callers.
    async fn next_id(&self, segment: &str) -> Result<u64>;
}

// =============================================================================
// Authoritative Store Ports
// =============================================================================

/// Port for the authoritative voucher/order store.
#[async_trait]
pub trait SeckillStore: Send + Sync {
    /// Load a voucher by id.
    async fn find_voucher(&self, voucher_id: u64) -> Result<Option<SeckillVoucher>>;

    /// Open a transaction scoping the duplicate check, decrement and insert.
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>>;
}

/// A unit of work against the authoritative store.
///
/// Implementations roll back when dropped without `commit`.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Number of orders `user_id` holds for `voucher_id`.
    async fn count_orders(&mut self, user_id: u64, voucher_id: u64) -> Result<u64>;

    /// `stock = stock - 1` only when `stock > 0` and `now` is inside the sale
    /// window. Reports which condition stopped an unapplied decrement.
    async fn decrement_stock(
        &mut self,
        voucher_id: u64,
        now: DateTime<Utc>,
    ) -> Result<StockDecrement>;

    /// Persist a new order.
    async fn insert_order(&mut self, order: &VoucherOrder) -> Result<()>;

    /// Make every change visible.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard every change.
    async fn rollback(self: Box<Self>) -> Result<()>;
}

// =============================================================================
// Event Publisher Port
// =============================================================================

/// Port for publishing domain events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a single event.
    async fn publish(&self, event: DomainEvent) -> Result<()>;

    /// Publish multiple events.
    async fn publish_all(&self, events: Vec<DomainEvent>) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_voucher_window() {
        let now = Utc::now();
        let voucher = SeckillVoucher::new(
            1,
            10,
            now - ChronoDuration::minutes(5),
            now + ChronoDuration::minutes(5),
        );
        assert!(voucher.is_active(now));
        assert!(voucher.not_started(now - ChronoDuration::minutes(10)));
        assert!(voucher.ended(now + ChronoDuration::minutes(10)));
    }

    #[test]
    fn test_window_bounds_are_inclusive() {
        let now = Utc::now();
        let voucher = SeckillVoucher::new(1, 1, now, now);
        assert!(voucher.is_active(now));
    }
}
