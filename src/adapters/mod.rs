//! Infrastructure Adapters
//!
//! Implementations of the domain ports.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Domain Layer                              │
//! │   CacheGateway │ IdGenerator │ SeckillStore │ EventPublisher     │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Adapters (This Module)                       │
//! │   RedisGateway │ InMemoryGateway │ GatewayIdGenerator            │
//! │   InMemorySeckillStore │ LoggingEventPublisher                   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use flashguard::adapters::{GatewayIdGenerator, RedisGateway, RedisGatewayConfig};
//!
//! let gateway = Arc::new(RedisGateway::connect(&RedisGatewayConfig::default()).await?);
//! let ids = GatewayIdGenerator::new(gateway.clone());
//! let order_id = ids.next_id("order").await?;
//! ```

mod event_publisher;
mod id_worker;
mod memory;
#[cfg(feature = "redis")]
mod redis;
mod voucher_store;

pub use event_publisher::{InMemoryEventCollector, LoggingEventPublisher};
pub use id_worker::{GatewayIdGenerator, BEGIN_TIMESTAMP, COUNT_BITS};
pub use memory::{GatewayStats, InMemoryGateway};
#[cfg(feature = "redis")]
pub use self::redis::{RedisGateway, RedisGatewayConfig};
pub use voucher_store::InMemorySeckillStore;
