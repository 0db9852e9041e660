//! Order store port.

use async_trait::async_trait;

use swapsettle_common::{AssetPair, ExchangeOrder, OrderId, OrderStatus, OrderUpdate, Result};

/// Durable collection of exchange orders.
///
/// Mutations after insertion are conditional on the record version the
/// caller last read; a stale version fails with `Conflict`.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert a new order. Fails with `Conflict` if the id already exists.
    async fn insert(&self, order: &ExchangeOrder) -> Result<()>;

    /// Find an order by ID.
    async fn get(&self, id: OrderId) -> Result<Option<ExchangeOrder>>;

    /// Orders converting along `pair` whose status is in `statuses`,
    /// ascending by `(created_at, id)`.
    async fn find_by_pair(
        &self,
        pair: AssetPair,
        statuses: &[OrderStatus],
    ) -> Result<Vec<ExchangeOrder>>;

    /// Orders converting along `pair`, in any status, that still carry a
    /// fill owed to an initiating order.
    async fn find_unmirrored(&self, pair: AssetPair) -> Result<Vec<ExchangeOrder>>;

    /// Orders whose status is in `statuses`, ascending by `(created_at, id)`.
    async fn find_by_status(&self, statuses: &[OrderStatus]) -> Result<Vec<ExchangeOrder>>;

    /// Apply `update` if the stored version equals `expected_version`.
    ///
    /// Returns the updated record. Fails with `OrderNotFound` if absent.
    async fn update_fields(
        &self,
        id: OrderId,
        expected_version: u64,
        update: &OrderUpdate,
    ) -> Result<ExchangeOrder>;

    /// Delete the order if the stored version equals `expected_version`.
    async fn delete(&self, id: OrderId, expected_version: u64) -> Result<()>;
}

/// Sort orders into FIFO priority.
pub fn sort_fifo(orders: &mut [ExchangeOrder]) {
    orders.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
}
