//! Domain Layer
//!
//! Ports (traits) for the external collaborators and the value objects that
//! flow through them.
//!
//! - **Ports** (`ports.rs`) - cache gateway, id generator, authoritative store, events
//! - **Events** (`events.rs`) - domain events for audit and decoupling
//!
//! # Usage
//!
//! ```ignore
//! use flashguard::domain::ports::{CacheGateway, IdGenerator};
//!
//! async fn next_order_id<I: IdGenerator>(ids: &I) -> Result<u64> {
//!     ids.next_id("order").await
//! }
//! ```

pub mod events;
pub mod ports;

pub use events::DomainEvent;
pub use ports::{
    CacheGateway, EventPublisher, IdGenerator, SeckillStore, SeckillVoucher, StockDecrement,
    StoreTransaction, VoucherOrder,
};
