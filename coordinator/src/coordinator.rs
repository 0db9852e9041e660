//! Main exchange coordinator implementation.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use swapsettle_common::{
    AccountId, Amount, Asset, AssetPair, OrderId, OrderStatus, Result, SwapError,
};
use swapsettle_ledger::{LedgerEngine, LedgerStore};
use swapsettle_orders::{OrderStore, TimedOrderStore};

use crate::backlog::SettlementBacklog;
use crate::config::ExchangeConfig;
use crate::lifecycle::{CancelPurpose, NewOrder, OrderLifecycleManager};
use crate::metrics::{Metrics, SharedMetrics};
use crate::pair_lock::PairLockManager;
use crate::retry::{RetryPolicy, RetryWorker};
use crate::settlement::{SettlementCoordinator, SettlementOutcome};
use crate::state::CoordinatorState;

/// Order placement as received from a caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceOrderRequest {
    pub owner: String,
    pub from_asset: String,
    pub to_asset: String,
    /// Decimal string; rounded half-up to matching scale.
    pub amount: String,
}

/// Placement result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceOrderResponse {
    pub success: bool,
    pub order_id: Option<OrderId>,
    pub status: Option<OrderStatus>,
    pub settled_amount: Option<Amount>,
    pub requested_amount: Option<Amount>,
    pub reason: Option<String>,
    pub code: Option<String>,
    /// The same request, or a later settlement pass, may still succeed.
    pub retryable: bool,
}

impl PlaceOrderResponse {
    fn rejected(err: &SwapError) -> Self {
        Self {
            success: false,
            order_id: None,
            status: None,
            settled_amount: None,
            requested_amount: None,
            reason: Some(err.to_string()),
            code: Some(err.error_code().to_string()),
            retryable: err.is_retryable(),
        }
    }
}

/// Cancellation as received from a caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelOrderRequest {
    pub order_id: String,
    pub owner: String,
}

/// Cancellation result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelOrderResponse {
    pub success: bool,
    pub order_id: Option<OrderId>,
    pub status: Option<OrderStatus>,
    pub purpose: Option<CancelPurpose>,
    pub settled_amount: Option<Amount>,
    pub credited: Option<Amount>,
    pub forfeited: Option<Amount>,
    pub reason: Option<String>,
    pub code: Option<String>,
    pub retryable: bool,
}

impl CancelOrderResponse {
    fn rejected(err: &SwapError) -> Self {
        Self {
            success: false,
            order_id: None,
            status: None,
            purpose: None,
            settled_amount: None,
            credited: None,
            forfeited: None,
            reason: Some(err.to_string()),
            code: Some(err.error_code().to_string()),
            retryable: err.is_retryable(),
        }
    }
}

/// The exchange coordinator.
///
/// Owns the lifecycle and settlement components over explicit store
/// handles. Domain failures are answered as rejections; only loss of the
/// stores surfaces as `Err`.
pub struct ExchangeCoordinator {
    /// Configuration.
    config: ExchangeConfig,
    /// Current state.
    state: Arc<RwLock<CoordinatorState>>,
    /// Order store, deadline-wrapped.
    orders: Arc<dyn OrderStore>,
    /// Ledger engine.
    ledger: Arc<LedgerEngine>,
    /// Pair locks shared by settlement and cancellation.
    locks: Arc<PairLockManager>,
    /// Settlement runs.
    settlement: Arc<SettlementCoordinator>,
    /// Creation and cancellation.
    lifecycle: OrderLifecycleManager,
    /// Background re-settlement, while running.
    retry: RwLock<Option<Arc<RetryWorker>>>,
    /// Metrics.
    metrics: SharedMetrics,
}

impl ExchangeCoordinator {
    /// Create a coordinator over the given stores.
    pub fn new(
        config: ExchangeConfig,
        ledger_store: Arc<dyn LedgerStore>,
        order_store: Arc<dyn OrderStore>,
    ) -> Self {
        let store_config = &config.store_config;
        let settlement_config = &config.settlement_config;

        let orders: Arc<dyn OrderStore> = Arc::new(
            TimedOrderStore::new(order_store)
                .with_timeouts(store_config.operation_timeout, store_config.scan_timeout),
        );
        let ledger = Arc::new(
            LedgerEngine::new(ledger_store)
                .with_operation_timeout(store_config.operation_timeout)
                .with_max_conflict_retries(settlement_config.max_conflict_retries),
        );
        let locks = Arc::new(PairLockManager::new(
            settlement_config.lock_acquisition_timeout,
        ));
        let metrics: SharedMetrics = Arc::new(Metrics::new());

        let settlement = Arc::new(SettlementCoordinator::new(
            orders.clone(),
            ledger.clone(),
            locks.clone(),
            metrics.clone(),
            settlement_config.max_conflict_retries,
        ));
        let lifecycle = OrderLifecycleManager::new(
            orders.clone(),
            ledger.clone(),
            settlement.clone(),
            locks.clone(),
            metrics.clone(),
        )
        .with_settle_on_create(settlement_config.settle_on_create)
        .with_max_conflict_retries(settlement_config.max_conflict_retries);

        Self {
            config,
            state: Arc::new(RwLock::new(CoordinatorState::Starting)),
            orders,
            ledger,
            locks,
            settlement,
            lifecycle,
            retry: RwLock::new(None),
            metrics,
        }
    }

    /// Start accepting requests and, if enabled, the retry worker.
    pub async fn start(&self) -> Result<()> {
        info!(node_id = ?self.config.node_id, "Starting exchange coordinator");

        let settlement_config = &self.config.settlement_config;
        if settlement_config.retry_worker_enabled {
            let worker = RetryWorker::spawn(
                self.settlement.clone(),
                self.orders.clone(),
                self.metrics.clone(),
                RetryPolicy {
                    backoff: settlement_config.retry_backoff,
                    sweep_interval: settlement_config.retry_sweep_interval,
                    queue_depth: settlement_config.retry_queue_depth,
                },
            );
            *self.retry.write() = Some(Arc::new(worker));
        }

        *self.state.write() = CoordinatorState::Running;
        info!("Exchange coordinator started");
        Ok(())
    }

    /// Stop accepting requests and wait for background work to drain.
    pub async fn stop(&self) -> Result<()> {
        info!("Stopping exchange coordinator");
        *self.state.write() = CoordinatorState::ShuttingDown;

        let worker = self.retry.write().take();
        if let Some(worker) = worker {
            worker.shutdown().await;
        }

        *self.state.write() = CoordinatorState::Stopped;
        info!("Exchange coordinator stopped");
        Ok(())
    }

    /// Current state.
    pub fn state(&self) -> CoordinatorState {
        *self.state.read()
    }

    /// Check if accepting requests.
    pub fn is_accepting_requests(&self) -> bool {
        self.state().accepts_requests()
    }

    /// Metrics handle.
    pub fn metrics(&self) -> SharedMetrics {
        self.metrics.clone()
    }

    /// Ledger engine, for balance queries and journal inspection.
    pub fn ledger(&self) -> Arc<LedgerEngine> {
        self.ledger.clone()
    }

    /// Order store as seen by the coordinator.
    pub fn orders(&self) -> Arc<dyn OrderStore> {
        self.orders.clone()
    }

    /// Number of markets currently locked.
    pub fn active_locks(&self) -> usize {
        self.locks.active_lock_count()
    }

    /// Configuration.
    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    fn unavailable(&self) -> Option<SwapError> {
        let state = self.state();
        (!state.accepts_requests()).then(|| SwapError::ServiceUnavailable {
            retry_after_ms: state.retry_after_ms(),
        })
    }

    /// Place an order: validate, escrow, then settle what liquidity allows.
    #[instrument(skip(self, request), fields(owner = %request.owner))]
    pub async fn place_order(&self, request: PlaceOrderRequest) -> Result<PlaceOrderResponse> {
        if let Some(err) = self.unavailable() {
            return Ok(PlaceOrderResponse::rejected(&err));
        }

        let new_order = match parse_place_request(&request) {
            Ok(new_order) => new_order,
            Err(err) => {
                self.metrics.order_rejected();
                warn!(error = %err, "Order rejected");
                return Ok(PlaceOrderResponse::rejected(&err));
            }
        };

        let placed = match self.lifecycle.create(new_order).await {
            Ok(placed) => placed,
            Err(err) if err.is_infrastructure() => return Err(err),
            Err(err) => {
                self.metrics.order_rejected();
                warn!(error = %err, "Order rejected");
                return Ok(PlaceOrderResponse::rejected(&err));
            }
        };

        let mut response = PlaceOrderResponse {
            success: true,
            order_id: Some(placed.order_id),
            status: Some(placed.status),
            settled_amount: Some(placed.settled_amount),
            requested_amount: Some(placed.requested_amount),
            reason: Some("Placed successfully".to_string()),
            code: None,
            retryable: false,
        };

        // The order is live and escrowed; an unfinished run is resumed later.
        if let Some(Err(err)) = placed.settlement {
            warn!(order_id = %placed.order_id, error = %err, "Settlement deferred");
            self.queue_retry(placed.order_id);
            response.reason = Some(err.to_string());
            response.code = Some(err.error_code().to_string());
            response.retryable = true;
        }

        Ok(response)
    }

    /// Cancel an order on behalf of its owner.
    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    pub async fn cancel_order(&self, request: CancelOrderRequest) -> Result<CancelOrderResponse> {
        if let Some(err) = self.unavailable() {
            return Ok(CancelOrderResponse::rejected(&err));
        }

        let order_id = match OrderId::parse(request.order_id.trim()) {
            Ok(id) => id,
            Err(_) => {
                let err = SwapError::validation(
                    format!("Invalid order identifier: {:?}", request.order_id),
                    "order_id",
                );
                return Ok(CancelOrderResponse::rejected(&err));
            }
        };
        let owner = AccountId::new(request.owner.trim());

        match self.lifecycle.cancel(order_id, &owner).await {
            Ok(outcome) => Ok(CancelOrderResponse {
                success: true,
                order_id: Some(outcome.order_id),
                status: Some(outcome.status),
                purpose: Some(outcome.purpose),
                settled_amount: Some(outcome.settled_amount),
                credited: Some(outcome.credited),
                forfeited: Some(outcome.forfeited),
                reason: Some(format!("Order cancelled ({})", outcome.purpose)),
                code: None,
                retryable: false,
            }),
            Err(err) if err.is_infrastructure() => Err(err),
            Err(err) => {
                warn!(error = %err, "Cancellation rejected");
                Ok(CancelOrderResponse::rejected(&err))
            }
        }
    }

    /// Run settlement for an existing order again.
    pub async fn resettle(&self, order_id: OrderId) -> Result<SettlementOutcome> {
        if let Some(err) = self.unavailable() {
            return Err(err);
        }
        self.settlement.settle(order_id).await
    }

    /// Pending volume on every directed pair.
    pub async fn settlement_backlog(&self) -> Result<SettlementBacklog> {
        SettlementBacklog::query(self.orders.as_ref()).await
    }

    fn queue_retry(&self, order_id: OrderId) {
        let worker = self.retry.read().clone();
        match worker {
            Some(worker) => {
                worker.enqueue(order_id);
            }
            None => warn!(order_id = %order_id, "Retry worker disabled, order left for resettle"),
        }
    }
}

fn parse_place_request(request: &PlaceOrderRequest) -> Result<NewOrder> {
    let owner = AccountId::new(request.owner.trim());
    let from: Asset = request.from_asset.parse()?;
    let to: Asset = request.to_asset.parse()?;
    let pair = AssetPair::new(from, to)?;
    let amount = Amount::parse(&request.amount)?;
    Ok(NewOrder {
        owner,
        pair,
        amount,
    })
}
