//! Domain Events
//!
//! Immutable records of significant seckill outcomes, used for audit logging
//! and for decoupling side effects (notifications, analytics) from the order
//! path.
//!
//! # Example
//!
//! ```ignore
//! let event = DomainEvent::order_created(order_id, user_id, voucher_id);
//! event_publisher.publish(event).await?;
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Domain event representing a significant occurrence in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DomainEvent {
    /// An order was committed.
    OrderCreated {
        order_id: u64,
        user_id: u64,
        voucher_id: u64,
        timestamp: DateTime<Utc>,
    },

    /// A seckill attempt was rejected.
    SeckillRejected {
        user_id: u64,
        voucher_id: u64,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// The conditional decrement found no stock left.
    StockExhausted {
        voucher_id: u64,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// Get the timestamp of this event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            DomainEvent::OrderCreated { timestamp, .. } => *timestamp,
            DomainEvent::SeckillRejected { timestamp, .. } => *timestamp,
            DomainEvent::StockExhausted { timestamp, .. } => *timestamp,
        }
    }

    /// Get the event type name.
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::OrderCreated { .. } => "OrderCreated",
            DomainEvent::SeckillRejected { .. } => "SeckillRejected",
            DomainEvent::StockExhausted { .. } => "StockExhausted",
        }
    }

    /// Get the voucher the event concerns.
    pub fn voucher_id(&self) -> u64 {
        match self {
            DomainEvent::OrderCreated { voucher_id, .. }
            | DomainEvent::SeckillRejected { voucher_id, .. }
            | DomainEvent::StockExhausted { voucher_id, .. } => *voucher_id,
        }
    }
}

// =============================================================================
// Event Builders
// =============================================================================

impl DomainEvent {
    /// Create an OrderCreated event.
    pub fn order_created(order_id: u64, user_id: u64, voucher_id: u64) -> Self {
        DomainEvent::OrderCreated {
            order_id,
            user_id,
            voucher_id,
            timestamp: Utc::now(),
        }
    }

    /// Create a SeckillRejected event.
    pub fn seckill_rejected(user_id: u64, voucher_id: u64, reason: impl Into<String>) -> Self {
        DomainEvent::SeckillRejected {
            user_id,
            voucher_id,
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a StockExhausted event.
    pub fn stock_exhausted(voucher_id: u64) -> Self {
        DomainEvent::StockExhausted {
            voucher_id,
            timestamp: Utc::now(),
        }
    }
}
