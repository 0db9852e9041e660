//! Order creation with escrow, and cancellation.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use swapsettle_common::{
    AccountId, Amount, AssetPair, ExchangeOrder, OrderId, OrderStatus, OrderUpdate, Result,
    SwapError,
};
use swapsettle_ledger::{EntryPurpose, LedgerEngine};
use swapsettle_orders::OrderStore;

use crate::metrics::SharedMetrics;
use crate::pair_lock::PairLockManager;
use crate::settlement::{SettlementCoordinator, SettlementOutcome};

/// A validated placement.
#[derive(Debug, Clone)]
pub struct NewOrder {
    /// Owning account.
    pub owner: AccountId,
    /// Conversion direction.
    pub pair: AssetPair,
    /// Amount of the source asset, already rounded.
    pub amount: Amount,
}

/// Result of a successful placement.
#[derive(Debug)]
pub struct PlacedOrder {
    /// The new order's identifier.
    pub order_id: OrderId,
    /// Status after the synchronous settlement run.
    pub status: OrderStatus,
    /// Settled amount after the synchronous settlement run.
    pub settled_amount: Amount,
    /// Escrowed amount.
    pub requested_amount: Amount,
    /// Settlement run result, if one was attempted.
    pub settlement: Option<Result<SettlementOutcome>>,
}

/// What cancellation did with the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CancelPurpose {
    /// The record was removed.
    Deleted,
    /// The record was kept as done with its settled amount.
    Settled,
}

impl fmt::Display for CancelPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelPurpose::Deleted => f.write_str("deleted"),
            CancelPurpose::Settled => f.write_str("settled"),
        }
    }
}

/// Result of a cancellation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CancelOutcome {
    /// Cancelled order.
    pub order_id: OrderId,
    /// Final status.
    pub status: OrderStatus,
    /// Whether the record was deleted or retained.
    pub purpose: CancelPurpose,
    /// Settled amount at cancellation.
    pub settled_amount: Amount,
    /// Target-asset amount credited by this cancellation.
    pub credited: Amount,
    /// Escrowed source-asset amount left unmatched and not refunded.
    pub forfeited: Amount,
}

/// Creates orders with their escrow and finalizes them on request.
pub struct OrderLifecycleManager {
    orders: Arc<dyn OrderStore>,
    ledger: Arc<LedgerEngine>,
    settlement: Arc<SettlementCoordinator>,
    locks: Arc<PairLockManager>,
    metrics: SharedMetrics,
    settle_on_create: bool,
    max_conflict_retries: u32,
}

impl OrderLifecycleManager {
    /// Create a new lifecycle manager.
    pub fn new(
        orders: Arc<dyn OrderStore>,
        ledger: Arc<LedgerEngine>,
        settlement: Arc<SettlementCoordinator>,
        locks: Arc<PairLockManager>,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            orders,
            ledger,
            settlement,
            locks,
            metrics,
            settle_on_create: true,
            max_conflict_retries: swapsettle_common::time::constants::MAX_CONFLICT_RETRIES,
        }
    }

    /// Toggle the synchronous settlement run after placement.
    pub fn with_settle_on_create(mut self, enabled: bool) -> Self {
        self.settle_on_create = enabled;
        self
    }

    /// Override how many conflicts are absorbed on order updates.
    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries.max(1);
        self
    }

    /// Validate, escrow and store a new order, then settle it.
    ///
    /// Rejections leave no balance or order mutation behind. Once the order
    /// is live, settlement failures are reported in
    /// [`PlacedOrder::settlement`] rather than as an error.
    #[instrument(skip(self, request), fields(owner = %request.owner, pair = %request.pair, amount = %request.amount))]
    pub async fn create(&self, request: NewOrder) -> Result<PlacedOrder> {
        if !request.owner.is_valid() {
            return Err(SwapError::validation(
                format!("Invalid account identifier: {:?}", request.owner.as_str()),
                "owner",
            ));
        }
        let order = ExchangeOrder::new(request.owner.clone(), request.pair, request.amount)?;

        self.ledger
            .ensure_funds(&order.owner, order.from_asset, order.requested_amount)
            .await?;

        self.orders.insert(&order).await?;

        if let Err(err) = self
            .ledger
            .debit(
                &order.owner,
                order.from_asset,
                order.requested_amount,
                order.id,
                EntryPurpose::Escrow,
            )
            .await
        {
            warn!(order_id = %order.id, error = %err, "Escrow debit failed, removing order");
            if let Err(cleanup) = self.orders.delete(order.id, order.version).await {
                error!(order_id = %order.id, error = %cleanup, "Could not remove unescrowed order");
            }
            return Err(err);
        }

        let order = match self
            .orders
            .update_fields(order.id, order.version, &OrderUpdate::confirm_escrow())
            .await
        {
            Ok(confirmed) => confirmed,
            Err(err) => {
                warn!(order_id = %order.id, error = %err, "Escrow confirmation failed, refunding");
                self.unwind_escrow(&order).await;
                return Err(err);
            }
        };

        self.metrics.order_placed();
        info!(order_id = %order.id, "Order placed with escrow");

        if !self.settle_on_create {
            return Ok(PlacedOrder {
                order_id: order.id,
                status: order.status,
                settled_amount: order.settled_amount,
                requested_amount: order.requested_amount,
                settlement: None,
            });
        }

        let settlement = self.settlement.settle(order.id).await;
        let (status, settled_amount) = match &settlement {
            Ok(outcome) => (outcome.status, outcome.settled_amount),
            Err(SwapError::SettlementIncomplete { settled, .. }) => {
                (OrderStatus::derive(order.requested_amount, *settled, false), *settled)
            }
            Err(_) => (order.status, order.settled_amount),
        };

        Ok(PlacedOrder {
            order_id: order.id,
            status,
            settled_amount,
            requested_amount: order.requested_amount,
            settlement: Some(settlement),
        })
    }

    async fn unwind_escrow(&self, order: &ExchangeOrder) {
        if let Err(err) = self
            .ledger
            .credit(
                &order.owner,
                order.from_asset,
                order.requested_amount,
                order.id,
                EntryPurpose::EscrowRefund,
            )
            .await
        {
            error!(order_id = %order.id, error = %err, "Escrow refund failed");
            return;
        }
        if let Err(err) = self.orders.delete(order.id, order.version).await {
            error!(order_id = %order.id, error = %err, "Could not remove refunded order");
        }
    }

    /// Cancel or finalize an order on its owner's request.
    ///
    /// The settled portion is credited in the target asset. The unmatched
    /// escrowed remainder is not refunded.
    #[instrument(skip(self))]
    pub async fn cancel(&self, order_id: OrderId, owner: &AccountId) -> Result<CancelOutcome> {
        let order = self.load(order_id).await?;
        if &order.owner != owner {
            return Err(SwapError::Unauthorized { order_id });
        }

        let guard = match self.locks.acquire(order.pair(), order_id).await {
            Ok(guard) => guard,
            Err(err) => {
                self.metrics.lock_timeout();
                return Err(err);
            }
        };
        // Fills owed to or by this order must land before it is finalized.
        self.settlement.reconcile_unmirrored(&guard).await?;
        let order = self.load(order_id).await?;

        let settled = order.settled_amount;
        let pending = order.pending_amount();
        let mut credited = Amount::ZERO;

        if !settled.is_zero() && !self.already_credited(&order) {
            self.ledger
                .credit(
                    &order.owner,
                    order.to_asset,
                    settled,
                    order.id,
                    EntryPurpose::CancelCredit,
                )
                .await?;
            credited = settled;
        }

        let purpose = if settled.is_zero() || pending.is_zero() {
            self.delete_with_retry(order).await?;
            CancelPurpose::Deleted
        } else {
            self.mark_cancelled(order).await?;
            CancelPurpose::Settled
        };

        self.metrics.order_cancelled();
        info!(
            order_id = %order_id,
            purpose = %purpose,
            settled = %settled,
            forfeited = %pending,
            "Order cancelled"
        );

        Ok(CancelOutcome {
            order_id,
            status: OrderStatus::Done,
            purpose,
            settled_amount: settled,
            credited,
            forfeited: pending,
        })
    }

    fn already_credited(&self, order: &ExchangeOrder) -> bool {
        order.target_credited
            || self.ledger.has_applied(order.id, EntryPurpose::CompletionCredit)
            || self.ledger.has_applied(order.id, EntryPurpose::CancelCredit)
    }

    async fn load(&self, order_id: OrderId) -> Result<ExchangeOrder> {
        self.orders
            .get(order_id)
            .await?
            .ok_or(SwapError::OrderNotFound(order_id))
    }

    async fn delete_with_retry(&self, mut order: ExchangeOrder) -> Result<()> {
        for _ in 0..self.max_conflict_retries {
            match self.orders.delete(order.id, order.version).await {
                Ok(()) | Err(SwapError::OrderNotFound(_)) => return Ok(()),
                Err(SwapError::Conflict { .. }) => {
                    self.metrics.conflict_retried();
                    order = self.load(order.id).await?;
                }
                Err(err) => return Err(err),
            }
        }
        Err(SwapError::conflict("order", order.id))
    }

    async fn mark_cancelled(&self, mut order: ExchangeOrder) -> Result<ExchangeOrder> {
        for _ in 0..self.max_conflict_retries {
            let update = OrderUpdate::cancel(!order.settled_amount.is_zero());
            match self.orders.update_fields(order.id, order.version, &update).await {
                Ok(updated) => return Ok(updated),
                Err(SwapError::Conflict { .. }) => {
                    self.metrics.conflict_retried();
                    order = self.load(order.id).await?;
                }
                Err(err) => return Err(err),
            }
        }
        Err(SwapError::conflict("order", order.id))
    }
}
