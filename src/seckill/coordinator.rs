//! Flash-sale coordinator.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::order::{create_voucher_order, OrderResult};
use crate::domain::events::DomainEvent;
use crate::domain::ports::{EventPublisher, IdGenerator, SeckillStore};
use crate::error::Result;
use crate::lock::DistributedLock;

// =============================================================================
// Configuration
// =============================================================================

/// Coordinator settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeckillConfig {
    /// Lease of the per-user order lock
    pub lock_ttl: Duration,
    /// Lock resource prefix; the lock key is `lock:{lock_prefix}{user_id}`
    pub lock_prefix: String,
    /// Id generator segment for order ids
    pub order_id_segment: String,
}

impl Default for SeckillConfig {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(30),
            lock_prefix: "order:".to_string(),
            order_id_segment: "order".to_string(),
        }
    }
}

/// Identity of the caller, passed explicitly with every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestContext {
    pub user_id: u64,
}

impl RequestContext {
    pub fn new(user_id: u64) -> Self {
        Self { user_id }
    }
}

// =============================================================================
// State Machine
// =============================================================================

/// Stages of one purchase attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeckillState {
    Validate,
    AcquireLock,
    CheckDuplicate,
    DecrementStock,
    CreateOrder,
    Done,
    Aborted(RejectReason),
}

impl fmt::Display for SeckillState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeckillState::Validate => write!(f, "Validate"),
            SeckillState::AcquireLock => write!(f, "AcquireLock"),
            SeckillState::CheckDuplicate => write!(f, "CheckDuplicate"),
            SeckillState::DecrementStock => write!(f, "DecrementStock"),
            SeckillState::CreateOrder => write!(f, "CreateOrder"),
            SeckillState::Done => write!(f, "Done"),
            SeckillState::Aborted(reason) => write!(f, "Aborted({})", reason.as_str()),
        }
    }
}

/// Why an attempt was turned down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    VoucherNotFound,
    NotStarted,
    Ended,
    OutOfStock,
    /// Another request of the same user holds the order lock
    DuplicateInFlight,
    AlreadyPurchased,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::VoucherNotFound => "voucher_not_found",
            RejectReason::NotStarted => "not_started",
            RejectReason::Ended => "ended",
            RejectReason::OutOfStock => "out_of_stock",
            RejectReason::DuplicateInFlight => "duplicate_in_flight",
            RejectReason::AlreadyPurchased => "already_purchased",
        }
    }

    /// Stage at which this rejection is raised.
    pub fn stage(&self) -> SeckillState {
        match self {
            RejectReason::VoucherNotFound | RejectReason::NotStarted | RejectReason::Ended => {
                SeckillState::Validate
            }
            RejectReason::DuplicateInFlight => SeckillState::AcquireLock,
            RejectReason::AlreadyPurchased => SeckillState::CheckDuplicate,
            RejectReason::OutOfStock => SeckillState::DecrementStock,
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            RejectReason::VoucherNotFound => "voucher does not exist",
            RejectReason::NotStarted => "sale has not started yet",
            RejectReason::Ended => "sale has ended",
            RejectReason::OutOfStock => "stock exhausted",
            RejectReason::DuplicateInFlight => "a purchase for this user is already in progress",
            RejectReason::AlreadyPurchased => "user already bought this voucher",
        };
        f.write_str(message)
    }
}

/// Result of `seckill_voucher`. Rejections are outcomes, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SeckillOutcome {
    Ordered { order_id: u64 },
    Rejected { reason: RejectReason },
}

impl SeckillOutcome {
    pub fn order_id(&self) -> Option<u64> {
        match self {
            SeckillOutcome::Ordered { order_id } => Some(*order_id),
            SeckillOutcome::Rejected { .. } => None,
        }
    }

    pub fn final_state(&self) -> SeckillState {
        match self {
            SeckillOutcome::Ordered { .. } => SeckillState::Done,
            SeckillOutcome::Rejected { reason } => SeckillState::Aborted(*reason),
        }
    }
}

// =============================================================================
// Coordinator
// =============================================================================

/// Serializes purchase attempts per user and runs the order transaction.
#[derive(Clone)]
pub struct SeckillCoordinator {
    store: Arc<dyn SeckillStore>,
    ids: Arc<dyn IdGenerator>,
    lock: DistributedLock,
    events: Arc<dyn EventPublisher>,
    config: SeckillConfig,
}

impl fmt::Debug for SeckillCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeckillCoordinator")
            .field("lock", &self.lock)
            .field("config", &self.config)
            .finish()
    }
}

impl SeckillCoordinator {
    pub fn new(
        store: Arc<dyn SeckillStore>,
        ids: Arc<dyn IdGenerator>,
        lock: DistributedLock,
        events: Arc<dyn EventPublisher>,
        config: SeckillConfig,
    ) -> Self {
        Self {
            store,
            ids,
            lock,
            events,
            config,
        }
    }

    pub fn config(&self) -> &SeckillConfig {
        &self.config
    }

    /// Try to buy one unit of `voucher_id` for the caller.
    ///
    /// Store and gateway failures are returned as errors; every business
    /// rejection is an `Ok(SeckillOutcome::Rejected)`.
    #[instrument(skip(self, ctx), fields(user_id = ctx.user_id))]
    pub async fn seckill_voucher(
        &self,
        ctx: &RequestContext,
        voucher_id: u64,
    ) -> Result<SeckillOutcome> {
        debug!(state = %SeckillState::Validate, "seckill attempt");
        let now = Utc::now();
        let Some(voucher) = self.store.find_voucher(voucher_id).await? else {
            return Ok(self.reject(ctx, voucher_id, RejectReason::VoucherNotFound).await);
        };
        if voucher.not_started(now) {
            return Ok(self.reject(ctx, voucher_id, RejectReason::NotStarted).await);
        }
        if voucher.ended(now) {
            return Ok(self.reject(ctx, voucher_id, RejectReason::Ended).await);
        }
        if voucher.stock < 1 {
            // Sold out: a previous buyer still learns they already own one
            let reason = if self.already_purchased(ctx.user_id, voucher_id).await? {
                RejectReason::AlreadyPurchased
            } else {
                RejectReason::OutOfStock
            };
            return Ok(self.reject(ctx, voucher_id, reason).await);
        }

        debug!(state = %SeckillState::AcquireLock, "voucher valid");
        let resource = format!("{}{}", self.config.lock_prefix, ctx.user_id);
        let Some(lease) = self.lock.try_acquire(&resource, self.config.lock_ttl).await? else {
            return Ok(self
                .reject(ctx, voucher_id, RejectReason::DuplicateInFlight)
                .await);
        };

        debug!(state = %SeckillState::CheckDuplicate, "order lock held");
        let result = self
            .lock
            .with_lease(
                lease,
                create_voucher_order(
                    self.store.as_ref(),
                    self.ids.as_ref(),
                    &self.config.order_id_segment,
                    ctx.user_id,
                    voucher_id,
                ),
            )
            .await?;

        match result {
            OrderResult::Created(order) => {
                info!(
                    state = %SeckillState::Done,
                    order_id = order.id,
                    voucher_id,
                    "seckill order created"
                );
                crate::metrics::record_seckill("ordered");
                self.publish(DomainEvent::order_created(order.id, ctx.user_id, voucher_id))
                    .await;
                Ok(SeckillOutcome::Ordered { order_id: order.id })
            }
            OrderResult::Rejected(reason) => {
                if reason == RejectReason::OutOfStock {
                    self.publish(DomainEvent::stock_exhausted(voucher_id)).await;
                }
                Ok(self.reject(ctx, voucher_id, reason).await)
            }
        }
    }

    /// Read-only duplicate check for the sold-out short circuit. Takes no
    /// lock and writes nothing.
    async fn already_purchased(&self, user_id: u64, voucher_id: u64) -> Result<bool> {
        let mut tx = self.store.begin().await?;
        let count = tx.count_orders(user_id, voucher_id).await;
        tx.rollback().await?;
        Ok(count? > 0)
    }

    async fn reject(
        &self,
        ctx: &RequestContext,
        voucher_id: u64,
        reason: RejectReason,
    ) -> SeckillOutcome {
        debug!(
            state = %SeckillState::Aborted(reason),
            stage = %reason.stage(),
            voucher_id,
            "seckill rejected"
        );
        crate::metrics::record_seckill(reason.as_str());
        self.publish(DomainEvent::seckill_rejected(
            ctx.user_id,
            voucher_id,
            reason.as_str(),
        ))
        .await;
        SeckillOutcome::Rejected { reason }
    }

    async fn publish(&self, event: DomainEvent) {
        let event_type = event.event_type();
        if let Err(e) = self.events.publish(event).await {
            warn!(event_type, error = %e, "failed to publish seckill event");
        }
    }
}
