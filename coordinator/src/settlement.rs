//! Settlement of an order against its counter side.
//!
//! Fills are applied one counter-order at a time as conditional updates.
//! The counter's update records the fill as owed to the initiating order
//! until the initiator carries it too, so a run that stops between the two
//! writes leaves a marker that the next run in the market lands before it
//! matches anything.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use swapsettle_common::{
    AccountId, Amount, AssetPair, ExchangeOrder, OrderId, OrderStatus, OrderUpdate, Result,
    SwapError,
};
use swapsettle_ledger::{EntryPurpose, LedgerEngine};
use swapsettle_orders::OrderStore;

use crate::matching::MatchingEngine;
use crate::metrics::SharedMetrics;
use crate::pair_lock::{PairGuard, PairLockManager};

/// One counter-order fill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fill {
    /// Counter-order consumed.
    pub counter_order_id: OrderId,
    /// Owner of the counter-order.
    pub counter_owner: AccountId,
    /// Amount matched.
    pub amount: Amount,
    /// Counter-order status after the fill.
    pub counter_status: OrderStatus,
}

/// Result of a settlement run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettlementOutcome {
    /// Initiating order.
    pub order_id: OrderId,
    /// Status after the run.
    pub status: OrderStatus,
    /// Cumulative settled amount (not just this run's fills).
    pub settled_amount: Amount,
    /// Amount originally requested.
    pub requested_amount: Amount,
    /// Fills applied by this run, in FIFO order.
    pub fills: Vec<Fill>,
    /// Owner's target-asset credit has been applied.
    pub credited: bool,
}

impl SettlementOutcome {
    fn from_order(order: &ExchangeOrder, fills: Vec<Fill>) -> Self {
        Self {
            order_id: order.id,
            status: order.status,
            settled_amount: order.settled_amount,
            requested_amount: order.requested_amount,
            fills,
            credited: order.target_credited,
        }
    }

    /// Amount matched by this run alone.
    pub fn filled_this_run(&self) -> Amount {
        self.fills.iter().map(|f| f.amount).sum()
    }
}

/// Walks matched counter-orders and reconciles balances as each fill lands.
pub struct SettlementCoordinator {
    orders: Arc<dyn OrderStore>,
    ledger: Arc<LedgerEngine>,
    matching: MatchingEngine,
    locks: Arc<PairLockManager>,
    metrics: SharedMetrics,
    max_conflict_retries: u32,
}

impl SettlementCoordinator {
    /// Create a new settlement coordinator.
    pub fn new(
        orders: Arc<dyn OrderStore>,
        ledger: Arc<LedgerEngine>,
        locks: Arc<PairLockManager>,
        metrics: SharedMetrics,
        max_conflict_retries: u32,
    ) -> Self {
        Self {
            matching: MatchingEngine::new(orders.clone()),
            orders,
            ledger,
            locks,
            metrics,
            max_conflict_retries: max_conflict_retries.max(1),
        }
    }

    /// Settle `order_id` against the inverse pair.
    ///
    /// Safe to call repeatedly: a run with no new liquidity reports the same
    /// status and settled amount, and an order that already completed only
    /// has its outstanding completion credit applied.
    #[instrument(skip(self))]
    pub async fn settle(&self, order_id: OrderId) -> Result<SettlementOutcome> {
        let order = self.load(order_id).await?;

        let guard = match self.locks.acquire(order.pair(), order_id).await {
            Ok(guard) => guard,
            Err(err) => {
                self.metrics.lock_timeout();
                return Err(err);
            }
        };

        self.metrics.settlement_initiated();
        if let Err(err) = self.reconcile_unmirrored(&guard).await {
            self.metrics.settlement_incomplete();
            return Err(self.abort(&order, err));
        }

        // Re-read under the lock; the pre-lock copy only located the market.
        let order = self.load(order_id).await?;

        match self.run(order).await {
            Ok(outcome) => {
                self.metrics
                    .settlement_finished(outcome.status == OrderStatus::Done);
                info!(
                    order_id = %outcome.order_id,
                    status = %outcome.status,
                    settled = %outcome.settled_amount,
                    filled = %outcome.filled_this_run(),
                    fills = outcome.fills.len(),
                    "Settlement run finished"
                );
                Ok(outcome)
            }
            Err(err) => {
                self.metrics.settlement_incomplete();
                error!(order_id = %order_id, error = %err, "Settlement incomplete");
                Err(err)
            }
        }
    }

    async fn load(&self, order_id: OrderId) -> Result<ExchangeOrder> {
        self.orders
            .get(order_id)
            .await?
            .ok_or(SwapError::OrderNotFound(order_id))
    }

    /// Land every fill in the guarded market that a counter-order still
    /// owes to its initiating order, then apply any completion credit that
    /// became due.
    ///
    /// Returns how many owed fills were resolved.
    #[instrument(skip_all)]
    pub async fn reconcile_unmirrored(&self, guard: &PairGuard) -> Result<usize> {
        let (from, to) = guard.market();
        let pair = AssetPair { from, to };
        let mut resolved = 0;
        for side in [pair, pair.inverse()] {
            for counter in self.orders.find_unmirrored(side).await? {
                let (counter, initiator) = self.land_mirror(counter).await?;
                resolved += 1;

                if counter.needs_completion_credit() {
                    self.complete(counter).await?;
                }
                if let Some(initiator) = initiator.filter(|o| o.needs_completion_credit()) {
                    self.complete(initiator).await?;
                }
            }
        }
        if resolved > 0 {
            info!(pair = %pair, resolved, "Owed fills landed");
        }
        Ok(resolved)
    }

    async fn run(&self, mut order: ExchangeOrder) -> Result<SettlementOutcome> {
        let mut fills = Vec::new();

        if !order.escrow_confirmed {
            debug!(order_id = %order.id, "Escrow not confirmed, nothing to settle");
            return Ok(SettlementOutcome::from_order(&order, fills));
        }

        if order.status.is_final() {
            if order.needs_completion_credit() {
                order = match self.complete(order.clone()).await {
                    Ok(updated) => updated,
                    Err(err) => return Err(self.abort(&order, err)),
                };
            }
            return Ok(SettlementOutcome::from_order(&order, fills));
        }

        // A counter can shrink between the scan and its fill; rescan while
        // fills keep landing.
        for _pass in 0..self.max_conflict_retries {
            let remaining = order.pending_amount();
            if remaining.is_zero() {
                break;
            }

            let counters = match self.matching.find_counter_orders(remaining, order.pair()).await {
                Ok(counters) => counters,
                Err(err) => return Err(self.abort(&order, err)),
            };

            let mut progressed = false;
            for counter in counters {
                if order.pending_amount().is_zero() {
                    break;
                }

                let (counter, fill) = match self.fill_counter(&order, counter).await {
                    Ok(Some(filled)) => filled,
                    Ok(None) => continue,
                    Err(err) => return Err(self.abort(&order, err)),
                };
                self.metrics.fill_applied();
                progressed = true;

                let counter = match self.land_mirror(counter).await {
                    Ok((counter, Some(updated))) => {
                        order = updated;
                        counter
                    }
                    Ok((_, None)) => {
                        return Err(self.abort(&order, SwapError::OrderNotFound(order.id)))
                    }
                    Err(err) => return Err(self.abort(&order, err)),
                };

                info!(
                    order_id = %order.id,
                    counter_order_id = %counter.id,
                    fill = %fill,
                    counter_status = %counter.status,
                    "Fill applied"
                );

                fills.push(Fill {
                    counter_order_id: counter.id,
                    counter_owner: counter.owner.clone(),
                    amount: fill,
                    counter_status: counter.status,
                });

                if counter.needs_completion_credit() {
                    if let Err(err) = self.complete(counter).await {
                        return Err(self.abort(&order, err));
                    }
                }
            }

            if !progressed {
                break;
            }
        }

        if order.needs_completion_credit() {
            order = match self.complete(order.clone()).await {
                Ok(updated) => updated,
                Err(err) => return Err(self.abort(&order, err)),
            };
        }

        Ok(SettlementOutcome::from_order(&order, fills))
    }

    /// Apply as much of `order`'s remainder as `counter` still offers.
    ///
    /// Returns `None` when the counter is no longer available.
    async fn fill_counter(
        &self,
        order: &ExchangeOrder,
        mut counter: ExchangeOrder,
    ) -> Result<Option<(ExchangeOrder, Amount)>> {
        for attempt in 1..=self.max_conflict_retries {
            if !counter.is_matchable() {
                return Ok(None);
            }
            let fill = order.pending_amount().min(counter.pending_amount());
            let update = counter.counter_fill_update(fill, order)?;

            match self
                .orders
                .update_fields(counter.id, counter.version, &update)
                .await
            {
                Ok(updated) => return Ok(Some((updated, fill))),
                Err(SwapError::OrderNotFound(_)) => return Ok(None),
                Err(SwapError::Conflict { .. }) => {
                    self.metrics.conflict_retried();
                    debug!(counter_order_id = %counter.id, attempt, "Counter-order moved, re-reading");
                    match self.orders.get(counter.id).await? {
                        Some(fresh) => counter = fresh,
                        None => return Ok(None),
                    }
                }
                Err(err) => return Err(err),
            }
        }
        Err(SwapError::conflict("order", counter.id))
    }

    /// Record `counter`'s owed fill on the initiating order and clear the
    /// marker.
    ///
    /// The fill is applied only if the initiator is still at the version
    /// the marker names; any later version already carries it, since every
    /// writer in the market lands owed fills before touching the initiator.
    /// Returns the cleared counter and the initiator, if it still exists.
    async fn land_mirror(
        &self,
        counter: ExchangeOrder,
    ) -> Result<(ExchangeOrder, Option<ExchangeOrder>)> {
        let Some(owed) = counter.unmirrored_fill else {
            return Ok((counter, None));
        };

        let initiator = match self.orders.get(owed.order_id).await? {
            Some(initiator) if initiator.version == owed.order_version => {
                let update = initiator.fill_update(owed.amount)?;
                Some(
                    self.orders
                        .update_fields(initiator.id, initiator.version, &update)
                        .await?,
                )
            }
            Some(initiator) => {
                debug!(
                    order_id = %initiator.id,
                    counter_order_id = %counter.id,
                    "Owed fill already on initiating order"
                );
                Some(initiator)
            }
            None => {
                warn!(
                    order_id = %owed.order_id,
                    counter_order_id = %counter.id,
                    amount = %owed.amount,
                    "Initiating order gone, dropping owed fill"
                );
                None
            }
        };

        let counter = self.clear_mirror(counter).await?;
        Ok((counter, initiator))
    }

    async fn clear_mirror(&self, mut counter: ExchangeOrder) -> Result<ExchangeOrder> {
        for _ in 0..self.max_conflict_retries {
            if counter.unmirrored_fill.is_none() {
                return Ok(counter);
            }
            match self
                .orders
                .update_fields(counter.id, counter.version, &OrderUpdate::mirror_landed())
                .await
            {
                Ok(updated) => return Ok(updated),
                Err(SwapError::Conflict { .. }) => {
                    self.metrics.conflict_retried();
                    counter = self.load(counter.id).await?;
                }
                Err(err) => return Err(err),
            }
        }
        Err(SwapError::conflict("order", counter.id))
    }

    /// Credit the owner of a completed order the full requested amount of
    /// its target asset, exactly once.
    ///
    /// Exactly-once holds within a process: the journal records the credit
    /// before `target_credited` is persisted. A restart between the two
    /// against a durable ledger loses the journal and credits again.
    async fn complete(&self, order: ExchangeOrder) -> Result<ExchangeOrder> {
        let already_applied = self
            .ledger
            .has_applied(order.id, EntryPurpose::CompletionCredit);
        if !already_applied {
            self.ledger
                .credit(
                    &order.owner,
                    order.to_asset,
                    order.requested_amount,
                    order.id,
                    EntryPurpose::CompletionCredit,
                )
                .await?;
        } else {
            warn!(order_id = %order.id, "Completion credit already applied, marking only");
        }
        mark_credited(self.orders.as_ref(), order, self.max_conflict_retries).await
    }

    fn abort(&self, order: &ExchangeOrder, err: SwapError) -> SwapError {
        warn!(order_id = %order.id, settled = %order.settled_amount, error = %err, "Settlement aborted");
        SwapError::SettlementIncomplete {
            order_id: order.id,
            settled: order.settled_amount,
            reason: err.to_string(),
        }
    }
}

/// Set `target_credited`, re-reading on conflict.
async fn mark_credited(
    orders: &dyn OrderStore,
    mut order: ExchangeOrder,
    max_conflict_retries: u32,
) -> Result<ExchangeOrder> {
    for _ in 0..max_conflict_retries {
        if order.target_credited {
            return Ok(order);
        }
        match orders
            .update_fields(order.id, order.version, &OrderUpdate::credited())
            .await
        {
            Ok(updated) => return Ok(updated),
            Err(SwapError::Conflict { .. }) => {
                order = orders
                    .get(order.id)
                    .await?
                    .ok_or(SwapError::OrderNotFound(order.id))?;
            }
            Err(err) => return Err(err),
        }
    }
    Err(SwapError::conflict("order", order.id))
}
