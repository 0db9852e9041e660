//! Background re-settlement of orders.
//!
//! Orders whose settlement stopped part-way are queued here; a periodic
//! sweep also walks every open order, oldest first, so liquidity that
//! arrived without a fresh placement on the initiating side still settles.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use swapsettle_common::{OrderId, OrderStatus, Result};
use swapsettle_orders::OrderStore;

use crate::metrics::SharedMetrics;
use crate::settlement::SettlementCoordinator;

/// Retry worker timing.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before a queued order is re-settled.
    pub backoff: Duration,
    /// Interval between sweeps of open orders.
    pub sweep_interval: Duration,
    /// Queue capacity.
    pub queue_depth: usize,
}

/// Handle to the running worker.
pub struct RetryWorker {
    queue: mpsc::Sender<OrderId>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    metrics: SharedMetrics,
}

impl RetryWorker {
    /// Spawn the worker on the current runtime.
    pub fn spawn(
        settlement: Arc<SettlementCoordinator>,
        orders: Arc<dyn OrderStore>,
        metrics: SharedMetrics,
        policy: RetryPolicy,
    ) -> Self {
        let (queue, rx) = mpsc::channel(policy.queue_depth.max(1));
        let (shutdown, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(run(
            settlement,
            orders,
            policy,
            rx,
            queue.clone(),
            shutdown_rx,
        ));

        Self {
            queue,
            shutdown,
            task: Mutex::new(Some(task)),
            metrics,
        }
    }

    /// Queue an order for re-settlement. Returns false if the queue is full;
    /// the periodic sweep still picks the order up.
    pub fn enqueue(&self, order_id: OrderId) -> bool {
        match self.queue.try_send(order_id) {
            Ok(()) => {
                self.metrics.retry_queued();
                true
            }
            Err(err) => {
                warn!(order_id = %order_id, error = %err, "Retry queue rejected order");
                false
            }
        }
    }

    /// Stop the worker and wait for it to finish its current order.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!(error = %err, "Retry worker ended abnormally");
            }
        }
    }
}

async fn run(
    settlement: Arc<SettlementCoordinator>,
    orders: Arc<dyn OrderStore>,
    policy: RetryPolicy,
    mut queue: mpsc::Receiver<OrderId>,
    requeue: mpsc::Sender<OrderId>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut sweep = tokio::time::interval(policy.sweep_interval);
    // The first tick completes immediately.
    sweep.tick().await;
    info!("Settlement retry worker started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            Some(order_id) = queue.recv() => {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(policy.backoff) => {}
                }
                if let Err(err) = settlement.settle(order_id).await {
                    if err.is_retryable() {
                        debug!(order_id = %order_id, error = %err, "Retry failed, requeueing");
                        if let Err(full) = requeue.try_send(order_id) {
                            warn!(
                                order_id = %order_id,
                                error = %full,
                                "Retry queue rejected order, leaving it to the sweep"
                            );
                        }
                    } else {
                        warn!(order_id = %order_id, error = %err, "Retry abandoned");
                    }
                }
            }
            _ = sweep.tick() => {
                match sweep_open_orders(&settlement, orders.as_ref()).await {
                    Ok(0) => {}
                    Ok(settled) => debug!(settled, "Sweep settled orders"),
                    Err(err) => warn!(error = %err, "Sweep failed"),
                }
            }
        }
    }

    info!("Settlement retry worker stopped");
}

/// Re-run settlement for every live open order, oldest first, and for
/// completed orders still owed their credit. Returns how many runs moved
/// an order forward.
pub async fn sweep_open_orders(
    settlement: &SettlementCoordinator,
    orders: &dyn OrderStore,
) -> Result<usize> {
    let mut candidates = orders.find_by_status(&OrderStatus::OPEN).await?;
    candidates.retain(|o| o.escrow_confirmed);
    let owed = orders
        .find_by_status(&[OrderStatus::Done])
        .await?
        .into_iter()
        .filter(|o| o.needs_completion_credit());
    candidates.extend(owed);

    let mut progressed = 0;
    for order in candidates {
        match settlement.settle(order.id).await {
            Ok(outcome)
                if !outcome.fills.is_empty()
                    || outcome.settled_amount != order.settled_amount
                    || outcome.credited != order.target_credited =>
            {
                progressed += 1;
            }
            Ok(_) => {}
            Err(err) => debug!(order_id = %order.id, error = %err, "Sweep settle failed"),
        }
    }
    Ok(progressed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metrics;
    use crate::pair_lock::PairLockManager;
    use swapsettle_ledger::{LedgerEngine, MemoryLedger};
    use swapsettle_orders::MemoryOrderStore;

    #[tokio::test]
    async fn test_shutdown_interrupts_backoff() {
        let orders: Arc<dyn OrderStore> = Arc::new(MemoryOrderStore::new());
        let ledger = Arc::new(LedgerEngine::new(Arc::new(MemoryLedger::new())));
        let metrics: SharedMetrics = Arc::new(Metrics::new());
        let settlement = Arc::new(SettlementCoordinator::new(
            orders.clone(),
            ledger,
            Arc::new(PairLockManager::new(Duration::from_secs(1))),
            metrics.clone(),
            3,
        ));
        let worker = RetryWorker::spawn(
            settlement,
            orders,
            metrics.clone(),
            RetryPolicy {
                backoff: Duration::from_secs(60),
                sweep_interval: Duration::from_secs(60),
                queue_depth: 1,
            },
        );

        assert!(worker.enqueue(OrderId::new()));
        tokio::time::sleep(Duration::from_millis(20)).await;

        let stopped = tokio::time::timeout(Duration::from_secs(2), worker.shutdown()).await;
        assert!(stopped.is_ok(), "worker kept sleeping through shutdown");
        assert_eq!(metrics.snapshot().retries_queued, 1);
    }
}
