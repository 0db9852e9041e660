//! Deadline decorator for order stores.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use swapsettle_common::time::constants;
use swapsettle_common::{
    with_timeout, AssetPair, ExchangeOrder, OrderId, OrderStatus, OrderUpdate, Result,
};

use crate::repository::OrderStore;

/// Wraps an [`OrderStore`] so point operations and scans each carry a
/// deadline. An elapsed deadline is reported as a failure, never as
/// "probably succeeded".
#[derive(Clone)]
pub struct TimedOrderStore {
    inner: Arc<dyn OrderStore>,
    operation_timeout: Duration,
    scan_timeout: Duration,
}

impl TimedOrderStore {
    /// Wrap `inner` with the default deadlines.
    pub fn new(inner: Arc<dyn OrderStore>) -> Self {
        Self {
            inner,
            operation_timeout: constants::store_operation_timeout(),
            scan_timeout: constants::store_scan_timeout(),
        }
    }

    /// Override both deadlines.
    pub fn with_timeouts(mut self, operation: Duration, scan: Duration) -> Self {
        self.operation_timeout = operation;
        self.scan_timeout = scan;
        self
    }
}

#[async_trait]
impl OrderStore for TimedOrderStore {
    async fn insert(&self, order: &ExchangeOrder) -> Result<()> {
        with_timeout(self.operation_timeout, "orders.insert", self.inner.insert(order)).await
    }

    async fn get(&self, id: OrderId) -> Result<Option<ExchangeOrder>> {
        with_timeout(self.operation_timeout, "orders.get", self.inner.get(id)).await
    }

    async fn find_by_pair(
        &self,
        pair: AssetPair,
        statuses: &[OrderStatus],
    ) -> Result<Vec<ExchangeOrder>> {
        with_timeout(
            self.scan_timeout,
            "orders.find_by_pair",
            self.inner.find_by_pair(pair, statuses),
        )
        .await
    }

    async fn find_unmirrored(&self, pair: AssetPair) -> Result<Vec<ExchangeOrder>> {
        with_timeout(
            self.scan_timeout,
            "orders.find_unmirrored",
            self.inner.find_unmirrored(pair),
        )
        .await
    }

    async fn find_by_status(&self, statuses: &[OrderStatus]) -> Result<Vec<ExchangeOrder>> {
        with_timeout(
            self.scan_timeout,
            "orders.find_by_status",
            self.inner.find_by_status(statuses),
        )
        .await
    }

    async fn update_fields(
        &self,
        id: OrderId,
        expected_version: u64,
        update: &OrderUpdate,
    ) -> Result<ExchangeOrder> {
        with_timeout(
            self.operation_timeout,
            "orders.update_fields",
            self.inner.update_fields(id, expected_version, update),
        )
        .await
    }

    async fn delete(&self, id: OrderId, expected_version: u64) -> Result<()> {
        with_timeout(
            self.operation_timeout,
            "orders.delete",
            self.inner.delete(id, expected_version),
        )
        .await
    }
}
