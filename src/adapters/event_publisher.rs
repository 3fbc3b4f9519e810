//! Event Publisher Adapters
//!
//! `EventPublisher` implementations: one writes audit lines to tracing, the
//! other records events in memory so tests can assert on them.

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::domain::events::DomainEvent;
use crate::domain::ports::EventPublisher;
use crate::error::Result;

/// Writes each event to the tracing system as a single JSON audit line.
///
/// Rejections are logged at warn level, everything else at info.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEventPublisher;

impl LoggingEventPublisher {
    /// Create a new logging publisher.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventPublisher for LoggingEventPublisher {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        let json = serde_json::to_string(&event)?;
        match event {
            DomainEvent::SeckillRejected { .. } | DomainEvent::StockExhausted { .. } => {
                warn!(event_type = event.event_type(), voucher_id = event.voucher_id(), event = %json, "Seckill audit");
            }
            DomainEvent::OrderCreated { .. } => {
                info!(event_type = event.event_type(), voucher_id = event.voucher_id(), event = %json, "Seckill audit");
            }
        }
        Ok(())
    }

    async fn publish_all(&self, events: Vec<DomainEvent>) -> Result<()> {
        for event in events {
            self.publish(event).await?;
        }
        Ok(())
    }
}

/// Keeps every published event for later inspection.
#[derive(Debug, Default)]
pub struct InMemoryEventCollector {
    events: RwLock<Vec<DomainEvent>>,
}

impl InMemoryEventCollector {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all collected events.
    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.read().clone()
    }

    /// Number of collected events.
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Whether nothing was collected.
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Events whose `event_type()` equals `event_type`.
    pub fn events_of_type(&self, event_type: &str) -> Vec<DomainEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .cloned()
            .collect()
    }

    /// Order ids from every `OrderCreated` event, in publish order.
    pub fn created_order_ids(&self) -> Vec<u64> {
        self.events
            .read()
            .iter()
            .filter_map(|e| match e {
                DomainEvent::OrderCreated { order_id, .. } => Some(*order_id),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventCollector {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        self.events.write().push(event);
        Ok(())
    }

    async fn publish_all(&self, events: Vec<DomainEvent>) -> Result<()> {
        self.events.write().extend(events);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_logging_publisher() {
        let publisher = LoggingEventPublisher::new();

        // Should not panic
        publisher
            .publish_all(vec![
                DomainEvent::order_created(1, 2, 3),
                DomainEvent::seckill_rejected(2, 3, "ended"),
            ])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_in_memory_collector() {
        let collector = InMemoryEventCollector::new();
        assert!(collector.is_empty());

        collector
            .publish(DomainEvent::order_created(100, 10, 3))
            .await
            .unwrap();
        collector
            .publish_all(vec![
                DomainEvent::seckill_rejected(11, 3, "out-of-stock"),
                DomainEvent::stock_exhausted(3),
                DomainEvent::order_created(101, 12, 3),
            ])
            .await
            .unwrap();

        assert_eq!(collector.len(), 4);
        assert_eq!(collector.events_of_type("SeckillRejected").len(), 1);
        assert_eq!(collector.created_order_ids(), vec![100, 101]);
    }
}
