//! In-memory order store.
//!
//! Used for testing and the simulator. Thread-safe using RwLock; every
//! conditional update checks the version under the write lock.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use swapsettle_common::{
    AssetPair, ExchangeOrder, OrderId, OrderStatus, OrderUpdate, Result, SwapError,
};

use crate::repository::{sort_fifo, OrderStore};

/// In-memory order store with fault injection hooks.
#[derive(Default)]
pub struct MemoryOrderStore {
    orders: RwLock<HashMap<OrderId, ExchangeOrder>>,
    failing_updates: AtomicU32,
    unavailable: AtomicBool,
    latency: Mutex<Option<Duration>>,
}

impl MemoryOrderStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of orders.
    pub fn order_count(&self) -> usize {
        self.orders.read().len()
    }

    /// Copy of every stored order.
    pub fn snapshot(&self) -> Vec<ExchangeOrder> {
        let mut orders: Vec<_> = self.orders.read().values().cloned().collect();
        sort_fifo(&mut orders);
        orders
    }

    /// Fail the next `count` updates or deletes with `StorageUnavailable`.
    pub fn fail_next_updates(&self, count: u32) {
        self.failing_updates.store(count, Ordering::SeqCst);
    }

    /// Make every operation fail until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay every operation by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    async fn before_operation(&self) -> Result<()> {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SwapError::StorageUnavailable("order store offline".into()));
        }
        Ok(())
    }

    fn take_injected_failure(&self, operation: &str, id: OrderId) -> Result<()> {
        let injected = self
            .failing_updates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(SwapError::StorageUnavailable(format!(
                "injected failure on {operation} {id}"
            )));
        }
        Ok(())
    }

    fn collect<F>(&self, keep: F) -> Vec<ExchangeOrder>
    where
        F: Fn(&ExchangeOrder) -> bool,
    {
        let mut orders: Vec<_> = self
            .orders
            .read()
            .values()
            .filter(|order| keep(order))
            .cloned()
            .collect();
        sort_fifo(&mut orders);
        orders
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn insert(&self, order: &ExchangeOrder) -> Result<()> {
        self.before_operation().await?;
        let mut orders = self.orders.write();
        if orders.contains_key(&order.id) {
            return Err(SwapError::conflict("order", order.id));
        }
        orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn get(&self, id: OrderId) -> Result<Option<ExchangeOrder>> {
        self.before_operation().await?;
        Ok(self.orders.read().get(&id).cloned())
    }

    async fn find_by_pair(
        &self,
        pair: AssetPair,
        statuses: &[OrderStatus],
    ) -> Result<Vec<ExchangeOrder>> {
        self.before_operation().await?;
        Ok(self.collect(|order| order.pair() == pair && statuses.contains(&order.status)))
    }

    async fn find_unmirrored(&self, pair: AssetPair) -> Result<Vec<ExchangeOrder>> {
        self.before_operation().await?;
        Ok(self.collect(|order| order.pair() == pair && order.unmirrored_fill.is_some()))
    }

    async fn find_by_status(&self, statuses: &[OrderStatus]) -> Result<Vec<ExchangeOrder>> {
        self.before_operation().await?;
        Ok(self.collect(|order| statuses.contains(&order.status)))
    }

    async fn update_fields(
        &self,
        id: OrderId,
        expected_version: u64,
        update: &OrderUpdate,
    ) -> Result<ExchangeOrder> {
        self.before_operation().await?;
        self.take_injected_failure("update", id)?;

        let mut orders = self.orders.write();
        let current = orders.get(&id).ok_or(SwapError::OrderNotFound(id))?;
        if current.version != expected_version {
            return Err(SwapError::conflict("order", id));
        }
        let next = current.apply(update)?;
        orders.insert(id, next.clone());
        Ok(next)
    }

    async fn delete(&self, id: OrderId, expected_version: u64) -> Result<()> {
        self.before_operation().await?;
        self.take_injected_failure("delete", id)?;

        let mut orders = self.orders.write();
        let current = orders.get(&id).ok_or(SwapError::OrderNotFound(id))?;
        if current.version != expected_version {
            return Err(SwapError::conflict("order", id));
        }
        orders.remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swapsettle_common::{AccountId, Amount, Asset};
    use tokio_test::{assert_err, assert_ok};

    fn order(owner: &str, from: Asset, to: Asset, amount: u64) -> ExchangeOrder {
        ExchangeOrder::new(
            AccountId::new(owner),
            AssetPair::new(from, to).unwrap(),
            Amount::from_units(amount),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = MemoryOrderStore::new();
        let order = order("Q", Asset::NativeToken, Asset::StableA, 30);
        assert_ok!(store.insert(&order).await);
        assert_err!(store.insert(&order).await);

        let loaded = store.get(order.id).await.unwrap().unwrap();
        assert_eq!(loaded, order);
        assert!(store.get(OrderId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_by_pair_is_fifo_and_filtered() {
        let store = MemoryOrderStore::new();
        let mut first = order("A", Asset::NativeToken, Asset::StableA, 10);
        let mut second = order("B", Asset::NativeToken, Asset::StableA, 10);
        let other_pair = order("C", Asset::StableA, Asset::NativeToken, 10);
        second.created_at = first.created_at + chrono::Duration::milliseconds(5);
        first.status = OrderStatus::Partial;
        first.settled_amount = Amount::from_units(1);

        store.insert(&second).await.unwrap();
        store.insert(&other_pair).await.unwrap();
        store.insert(&first).await.unwrap();

        let pair = AssetPair::new(Asset::NativeToken, Asset::StableA).unwrap();
        let found = store.find_by_pair(pair, &OrderStatus::OPEN).await.unwrap();
        assert_eq!(
            found.iter().map(|o| o.id).collect::<Vec<_>>(),
            vec![first.id, second.id]
        );

        let pending_only = store
            .find_by_pair(pair, &[OrderStatus::Pending])
            .await
            .unwrap();
        assert_eq!(pending_only.len(), 1);
    }

    #[tokio::test]
    async fn test_update_fields_is_conditional() {
        let store = MemoryOrderStore::new();
        let order = order("Q", Asset::NativeToken, Asset::StableA, 30);
        store.insert(&order).await.unwrap();

        let confirmed = assert_ok!(
            store
                .update_fields(order.id, 0, &OrderUpdate::confirm_escrow())
                .await
        );
        assert_eq!(confirmed.version, 1);
        assert!(confirmed.escrow_confirmed);

        let stale = store
            .update_fields(order.id, 0, &OrderUpdate::credited())
            .await
            .unwrap_err();
        assert!(matches!(stale, SwapError::Conflict { .. }));

        let missing = store
            .update_fields(OrderId::new(), 0, &OrderUpdate::credited())
            .await
            .unwrap_err();
        assert!(matches!(missing, SwapError::OrderNotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_is_conditional() {
        let store = MemoryOrderStore::new();
        let order = order("Q", Asset::StableB, Asset::StableA, 3);
        store.insert(&order).await.unwrap();

        assert_err!(store.delete(order.id, 7).await);
        assert_ok!(store.delete(order.id, 0).await);
        assert_eq!(store.order_count(), 0);
    }

    #[tokio::test]
    async fn test_injected_update_failure_leaves_record_unchanged() {
        let store = MemoryOrderStore::new();
        let order = order("Q", Asset::StableB, Asset::StableA, 3);
        store.insert(&order).await.unwrap();
        store.fail_next_updates(1);

        let err = store
            .update_fields(order.id, 0, &OrderUpdate::confirm_escrow())
            .await
            .unwrap_err();
        assert!(err.is_infrastructure());
        assert_eq!(store.get(order.id).await.unwrap().unwrap().version, 0);
    }

    #[tokio::test]
    async fn test_find_unmirrored_includes_done_counters() {
        let store = MemoryOrderStore::new();
        let initiator = order("P", Asset::StableA, Asset::NativeToken, 30);
        let counter = order("Q", Asset::NativeToken, Asset::StableA, 30);
        let untouched = order("R", Asset::NativeToken, Asset::StableA, 5);
        store.insert(&initiator).await.unwrap();
        store.insert(&counter).await.unwrap();
        store.insert(&untouched).await.unwrap();

        let update = counter
            .counter_fill_update(Amount::from_units(30), &initiator)
            .unwrap();
        let filled = store.update_fields(counter.id, 0, &update).await.unwrap();
        assert_eq!(filled.status, OrderStatus::Done);

        let pair = counter.pair();
        let owed = store.find_unmirrored(pair).await.unwrap();
        assert_eq!(owed.iter().map(|o| o.id).collect::<Vec<_>>(), vec![counter.id]);
        assert!(store.find_unmirrored(pair.inverse()).await.unwrap().is_empty());

        store
            .update_fields(counter.id, 1, &OrderUpdate::mirror_landed())
            .await
            .unwrap();
        assert!(store.find_unmirrored(pair).await.unwrap().is_empty());
    }
}
