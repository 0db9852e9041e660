//! SwapSettle Coordinator
//!
//! Accepts exchange orders, escrows their source asset, matches them FIFO
//! against the inverse pair and reconciles ledger balances as fills land.

pub mod backlog;
pub mod config;
pub mod coordinator;
pub mod lifecycle;
pub mod matching;
pub mod metrics;
pub mod pair_lock;
pub mod retry;
pub mod settlement;
pub mod state;

pub use backlog::{BacklogEntry, SettlementBacklog};
pub use config::{ExchangeConfig, SettlementConfig, StoreConfig};
pub use coordinator::{
    CancelOrderRequest, CancelOrderResponse, ExchangeCoordinator, PlaceOrderRequest,
    PlaceOrderResponse,
};
pub use lifecycle::{CancelOutcome, CancelPurpose, NewOrder, OrderLifecycleManager, PlacedOrder};
pub use matching::{CounterOrders, MatchingEngine};
pub use metrics::{Metrics, MetricsSnapshot, SharedMetrics};
pub use pair_lock::{PairGuard, PairLockManager};
pub use retry::{RetryPolicy, RetryWorker};
pub use settlement::{Fill, SettlementCoordinator, SettlementOutcome};
pub use state::CoordinatorState;
