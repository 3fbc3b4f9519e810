//! In-Memory Seckill Store
//!
//! Implements the `SeckillStore` port for tests and demos. Each statement of
//! a transaction runs under one mutex, so the conditional decrement is atomic
//! against concurrent transactions the same way a row-level
//! `UPDATE ... WHERE stock > 0` is. Changes apply immediately and are undone
//! on rollback (or drop without commit).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::domain::ports::{
    SeckillStore, SeckillVoucher, StockDecrement, StoreTransaction, VoucherOrder,
};
use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct StoreState {
    vouchers: HashMap<u64, SeckillVoucher>,
    orders: HashMap<u64, VoucherOrder>,
    /// Unique index on (user_id, voucher_id)
    order_index: HashSet<(u64, u64)>,
}

/// Shared in-memory voucher/order tables.
#[derive(Debug, Clone, Default)]
pub struct InMemorySeckillStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemorySeckillStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a voucher
    pub fn insert_voucher(&self, voucher: SeckillVoucher) {
        self.state.lock().vouchers.insert(voucher.voucher_id, voucher);
    }

    /// Current stock of a voucher
    pub fn stock_of(&self, voucher_id: u64) -> Option<i32> {
        self.state.lock().vouchers.get(&voucher_id).map(|v| v.stock)
    }

    /// All committed (or in-flight) orders
    pub fn orders(&self) -> Vec<VoucherOrder> {
        let mut orders: Vec<_> = self.state.lock().orders.values().cloned().collect();
        orders.sort_by_key(|o| o.id);
        orders
    }

    /// Orders held by a user
    pub fn orders_of(&self, user_id: u64) -> Vec<VoucherOrder> {
        self.orders()
            .into_iter()
            .filter(|o| o.user_id == user_id)
            .collect()
    }
}

#[async_trait]
impl SeckillStore for InMemorySeckillStore {
    async fn find_voucher(&self, voucher_id: u64) -> Result<Option<SeckillVoucher>> {
        Ok(self.state.lock().vouchers.get(&voucher_id).cloned())
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        Ok(Box::new(InMemoryTransaction {
            state: self.state.clone(),
            undo: Vec::new(),
            finished: false,
        }))
    }
}

#[derive(Debug)]
enum Undo {
    RestoreStock(u64),
    RemoveOrder { id: u64, user_id: u64, voucher_id: u64 },
}

struct InMemoryTransaction {
    state: Arc<Mutex<StoreState>>,
    undo: Vec<Undo>,
    finished: bool,
}

impl InMemoryTransaction {
    fn undo_all(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        let mut state = self.state.lock();
        for step in self.undo.drain(..).rev() {
            match step {
                Undo::RestoreStock(voucher_id) => {
                    if let Some(voucher) = state.vouchers.get_mut(&voucher_id) {
                        voucher.stock += 1;
                    }
                }
                Undo::RemoveOrder {
                    id,
                    user_id,
                    voucher_id,
                } => {
                    state.orders.remove(&id);
                    state.order_index.remove(&(user_id, voucher_id));
                }
            }
        }
    }
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn count_orders(&mut self, user_id: u64, voucher_id: u64) -> Result<u64> {
        let state = self.state.lock();
        Ok(state.order_index.contains(&(user_id, voucher_id)) as u64)
    }

    async fn decrement_stock(
        &mut self,
        voucher_id: u64,
        now: DateTime<Utc>,
    ) -> Result<StockDecrement> {
        let mut state = self.state.lock();
        let Some(voucher) = state.vouchers.get_mut(&voucher_id) else {
            return Ok(StockDecrement::Missing);
        };
        if voucher.not_started(now) {
            return Ok(StockDecrement::NotStarted);
        }
        if voucher.ended(now) {
            return Ok(StockDecrement::Ended);
        }
        if voucher.stock <= 0 {
            return Ok(StockDecrement::SoldOut);
        }
        voucher.stock -= 1;
        self.undo.push(Undo::RestoreStock(voucher_id));
        Ok(StockDecrement::Applied)
    }

    async fn insert_order(&mut self, order: &VoucherOrder) -> Result<()> {
        let mut state = self.state.lock();
        if !state.order_index.insert((order.user_id, order.voucher_id)) {
            return Err(Error::DuplicateOrder {
                user_id: order.user_id,
                voucher_id: order.voucher_id,
            });
        }
        state.orders.insert(order.id, order.clone());
        self.undo.push(Undo::RemoveOrder {
            id: order.id,
            user_id: order.user_id,
            voucher_id: order.voucher_id,
        });
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        self.finished = true;
        self.undo.clear();
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        self.undo_all();
        Ok(())
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        self.undo_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn active_voucher(id: u64, stock: i32) -> SeckillVoucher {
        let now = Utc::now();
        SeckillVoucher::new(
            id,
            stock,
            now - ChronoDuration::hours(1),
            now + ChronoDuration::hours(1),
        )
    }

    fn order(id: u64, user_id: u64, voucher_id: u64) -> VoucherOrder {
        VoucherOrder {
            id,
            user_id,
            voucher_id,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_decrement_stops_at_zero() {
        let store = InMemorySeckillStore::new();
        store.insert_voucher(active_voucher(1, 1));

        let mut tx = store.begin().await.unwrap();
        assert_eq!(
            tx.decrement_stock(1, Utc::now()).await.unwrap(),
            StockDecrement::Applied
        );
        assert_eq!(
            tx.decrement_stock(1, Utc::now()).await.unwrap(),
            StockDecrement::SoldOut
        );
        tx.commit().await.unwrap();

        assert_eq!(store.stock_of(1), Some(0));
    }

    #[tokio::test]
    async fn test_decrement_outside_window() {
        let store = InMemorySeckillStore::new();
        store.insert_voucher(active_voucher(1, 5));

        let mut tx = store.begin().await.unwrap();
        let later = Utc::now() + ChronoDuration::hours(2);
        let earlier = Utc::now() - ChronoDuration::hours(2);
        assert_eq!(tx.decrement_stock(1, later).await.unwrap(), StockDecrement::Ended);
        assert_eq!(
            tx.decrement_stock(1, earlier).await.unwrap(),
            StockDecrement::NotStarted
        );
        assert_eq!(
            tx.decrement_stock(99, Utc::now()).await.unwrap(),
            StockDecrement::Missing
        );
        tx.commit().await.unwrap();
        assert_eq!(store.stock_of(1), Some(5));
    }

    #[tokio::test]
    async fn test_rollback_restores_state() {
        let store = InMemorySeckillStore::new();
        store.insert_voucher(active_voucher(1, 2));

        let mut tx = store.begin().await.unwrap();
        assert!(tx.decrement_stock(1, Utc::now()).await.unwrap().applied());
        tx.insert_order(&order(10, 7, 1)).await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(store.stock_of(1), Some(2));
        assert!(store.orders().is_empty());
    }

    #[tokio::test]
    async fn test_drop_without_commit_rolls_back() {
        let store = InMemorySeckillStore::new();
        store.insert_voucher(active_voucher(1, 2));

        {
            let mut tx = store.begin().await.unwrap();
            assert!(tx.decrement_stock(1, Utc::now()).await.unwrap().applied());
        }

        assert_eq!(store.stock_of(1), Some(2));
    }

    #[tokio::test]
    async fn test_unique_order_index() {
        let store = InMemorySeckillStore::new();
        store.insert_voucher(active_voucher(1, 5));

        let mut tx = store.begin().await.unwrap();
        tx.insert_order(&order(10, 7, 1)).await.unwrap();
        assert_eq!(tx.count_orders(7, 1).await.unwrap(), 1);
        let err = tx.insert_order(&order(11, 7, 1)).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateOrder { user_id: 7, voucher_id: 1 }));
        tx.commit().await.unwrap();

        assert_eq!(store.orders_of(7).len(), 1);
    }
}
