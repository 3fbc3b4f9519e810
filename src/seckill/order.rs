//! Transactional order unit: duplicate check, conditional decrement and
//! order insert, committed together or not at all.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::coordinator::RejectReason;
use crate::domain::ports::{
    IdGenerator, SeckillStore, StockDecrement, StoreTransaction, VoucherOrder,
};
use crate::error::{Error, Result};

/// What the transactional unit decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderResult {
    /// Stock taken and order persisted
    Created(VoucherOrder),
    /// Nothing persisted
    Rejected(RejectReason),
}

/// Run the order steps inside one store transaction.
///
/// Must be called while holding the per-user lock. The transaction is
/// committed only for `Created`; rejections and errors roll it back.
pub async fn create_voucher_order(
    store: &dyn SeckillStore,
    ids: &dyn IdGenerator,
    order_id_segment: &str,
    user_id: u64,
    voucher_id: u64,
) -> Result<OrderResult> {
    let mut tx = store.begin().await?;

    let steps = run_steps(
        tx.as_mut(),
        ids,
        order_id_segment,
        user_id,
        voucher_id,
        Utc::now(),
    )
    .await;

    match steps {
        Ok(OrderResult::Created(order)) => {
            tx.commit().await?;
            debug!(order_id = order.id, user_id, voucher_id, "order transaction committed");
            Ok(OrderResult::Created(order))
        }
        Ok(OrderResult::Rejected(reason)) => {
            tx.rollback().await?;
            Ok(OrderResult::Rejected(reason))
        }
        Err(Error::DuplicateOrder { .. }) => {
            // Unique index caught what the in-lock check did not see
            warn!(user_id, voucher_id, "duplicate order blocked by store constraint");
            tx.rollback().await?;
            Ok(OrderResult::Rejected(RejectReason::AlreadyPurchased))
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "rollback after failed order transaction also failed");
            }
            Err(e)
        }
    }
}

async fn run_steps(
    tx: &mut dyn StoreTransaction,
    ids: &dyn IdGenerator,
    order_id_segment: &str,
    user_id: u64,
    voucher_id: u64,
    now: DateTime<Utc>,
) -> Result<OrderResult> {
    if tx.count_orders(user_id, voucher_id).await? > 0 {
        return Ok(OrderResult::Rejected(RejectReason::AlreadyPurchased));
    }

    let reason = match tx.decrement_stock(voucher_id, now).await? {
        StockDecrement::Applied => None,
        StockDecrement::SoldOut => Some(RejectReason::OutOfStock),
        // The window can close between validation and the decrement
        StockDecrement::NotStarted => Some(RejectReason::NotStarted),
        StockDecrement::Ended => Some(RejectReason::Ended),
        StockDecrement::Missing => Some(RejectReason::VoucherNotFound),
    };
    if let Some(reason) = reason {
        return Ok(OrderResult::Rejected(reason));
    }

    let order = VoucherOrder {
        id: ids.next_id(order_id_segment).await?,
        user_id,
        voucher_id,
        created_at: now,
    };
    tx.insert_order(&order).await?;
    Ok(OrderResult::Created(order))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;

    use super::*;
    use crate::adapters::{GatewayIdGenerator, InMemoryGateway, InMemorySeckillStore};
    use crate::domain::ports::SeckillVoucher;

    struct FailingIds;

    #[async_trait]
    impl IdGenerator for FailingIds {
        async fn next_id(&self, _segment: &str) -> Result<u64> {
            Err(Error::Gateway("INCR failed".into()))
        }
    }

    fn store_with(stock: i32) -> InMemorySeckillStore {
        let store = InMemorySeckillStore::new();
        let now = Utc::now();
        store.insert_voucher(SeckillVoucher::new(
            10,
            stock,
            now - ChronoDuration::hours(1),
            now + ChronoDuration::hours(1),
        ));
        store
    }

    fn ids() -> GatewayIdGenerator {
        GatewayIdGenerator::new(Arc::new(InMemoryGateway::new()))
    }

    #[tokio::test]
    async fn test_creates_order_and_takes_stock() {
        let store = store_with(2);
        let ids = ids();

        let result = create_voucher_order(&store, &ids, "order", 1, 10).await.unwrap();
        assert_matches!(result, OrderResult::Created(ref order) if order.user_id == 1);
        assert_eq!(store.stock_of(10), Some(1));
        assert_eq!(store.orders_of(1).len(), 1);
    }

    #[tokio::test]
    async fn test_second_order_is_rejected_without_side_effects() {
        let store = store_with(5);
        let ids = ids();

        create_voucher_order(&store, &ids, "order", 1, 10).await.unwrap();
        let again = create_voucher_order(&store, &ids, "order", 1, 10).await.unwrap();

        assert_eq!(again, OrderResult::Rejected(RejectReason::AlreadyPurchased));
        assert_eq!(store.stock_of(10), Some(4));
        assert_eq!(store.orders().len(), 1);
    }

    #[tokio::test]
    async fn test_out_of_stock() {
        let store = store_with(0);
        let result = create_voucher_order(&store, &ids(), "order", 1, 10).await.unwrap();
        assert_eq!(result, OrderResult::Rejected(RejectReason::OutOfStock));
        assert!(store.orders().is_empty());
    }

    #[tokio::test]
    async fn test_window_closed_before_decrement_reports_ended() {
        let store = InMemorySeckillStore::new();
        let now = Utc::now();
        store.insert_voucher(SeckillVoucher::new(
            10,
            5,
            now - ChronoDuration::hours(2),
            now - ChronoDuration::seconds(1),
        ));

        let result = create_voucher_order(&store, &ids(), "order", 1, 10).await.unwrap();
        assert_eq!(result, OrderResult::Rejected(RejectReason::Ended));
        assert_eq!(store.stock_of(10), Some(5));
        assert!(store.orders().is_empty());
    }

    #[tokio::test]
    async fn test_id_failure_rolls_back_stock() {
        let store = store_with(3);

        let err = create_voucher_order(&store, &FailingIds, "order", 1, 10)
            .await
            .unwrap_err();
        assert_matches!(err, Error::Gateway(_));
        assert_eq!(store.stock_of(10), Some(3));
        assert!(store.orders().is_empty());
    }
}
