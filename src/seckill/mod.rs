//! Flash-Sale (Seckill) Coordination
//!
//! ```text
//!   Validate ──▶ AcquireLock ──▶ CheckDuplicate ──▶ DecrementStock ──▶ CreateOrder ──▶ Done
//!      │              │                │                  │                 │
//!      └──────────────┴────────────────┴──── Aborted(reason) ◀──────────────┘
//! ```
//!
//! The lock is per user (`lock:order:{user_id}`), so one user's retries are
//! serialized while different users proceed in parallel. Overselling is
//! prevented by the store's conditional decrement, not by the lock.

mod coordinator;
mod order;

pub use coordinator::{
    RejectReason, RequestContext, SeckillConfig, SeckillCoordinator, SeckillOutcome, SeckillState,
};
pub use order::{create_voucher_order, OrderResult};
