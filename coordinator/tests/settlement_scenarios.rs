//! End-to-end settlement behaviour over in-memory stores.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio_test::assert_ok;

use swapsettle_common::{
    AccountId, Amount, Asset, AssetPair, ExchangeOrder, OrderId, OrderStatus, OrderUpdate,
    Result, SwapError,
};
use swapsettle_coordinator::{
    CancelOrderRequest, CancelPurpose, ExchangeConfig, ExchangeCoordinator, PlaceOrderRequest,
    PlaceOrderResponse,
};
use swapsettle_ledger::{AccountBalances, EntryPurpose, MemoryLedger};
use swapsettle_orders::{MemoryOrderStore, OrderStore};

struct Harness {
    coordinator: Arc<ExchangeCoordinator>,
    ledger: Arc<MemoryLedger>,
    orders: Arc<MemoryOrderStore>,
}

impl Harness {
    async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    async fn with_config(tweak: impl FnOnce(&mut ExchangeConfig)) -> Self {
        let mut config = ExchangeConfig::default();
        config.settlement_config.retry_worker_enabled = false;
        tweak(&mut config);

        let ledger = Arc::new(MemoryLedger::new());
        let orders = Arc::new(MemoryOrderStore::new());
        let coordinator = Arc::new(ExchangeCoordinator::new(
            config,
            ledger.clone(),
            orders.clone(),
        ));
        coordinator.start().await.unwrap();
        Self {
            coordinator,
            ledger,
            orders,
        }
    }

    fn fund(&self, owner: &str, holdings: &[(Asset, Decimal)]) {
        let balances = holdings
            .iter()
            .fold(AccountBalances::zero(AccountId::new(owner)), |acc, (asset, amount)| {
                acc.with(*asset, *amount)
            });
        self.ledger.open_account(balances);
    }

    async fn place(&self, owner: &str, from: Asset, to: Asset, amount: &str) -> PlaceOrderResponse {
        self.coordinator
            .place_order(PlaceOrderRequest {
                owner: owner.to_string(),
                from_asset: from.code().to_string(),
                to_asset: to.code().to_string(),
                amount: amount.to_string(),
            })
            .await
            .unwrap()
    }

    async fn balance(&self, owner: &str, asset: Asset) -> Decimal {
        self.coordinator
            .ledger()
            .balance(&AccountId::new(owner), asset)
            .await
            .unwrap()
    }

    async fn order(&self, id: OrderId) -> swapsettle_common::ExchangeOrder {
        self.orders.get(id).await.unwrap().unwrap()
    }
}

/// Order store that loses the next settled-amount write on one owner's order.
#[derive(Default)]
struct LossyFillStore {
    inner: MemoryOrderStore,
    lose_fill_for: Mutex<Option<AccountId>>,
}

impl LossyFillStore {
    fn lose_next_fill_for(&self, owner: &str) {
        *self.lose_fill_for.lock() = Some(AccountId::new(owner));
    }

    fn take_loss(&self, owner: &AccountId) -> bool {
        let mut armed = self.lose_fill_for.lock();
        if armed.as_ref() == Some(owner) {
            *armed = None;
            return true;
        }
        false
    }
}

#[async_trait]
impl OrderStore for LossyFillStore {
    async fn insert(&self, order: &ExchangeOrder) -> Result<()> {
        self.inner.insert(order).await
    }

    async fn get(&self, id: OrderId) -> Result<Option<ExchangeOrder>> {
        self.inner.get(id).await
    }

    async fn find_by_pair(
        &self,
        pair: AssetPair,
        statuses: &[OrderStatus],
    ) -> Result<Vec<ExchangeOrder>> {
        self.inner.find_by_pair(pair, statuses).await
    }

    async fn find_unmirrored(&self, pair: AssetPair) -> Result<Vec<ExchangeOrder>> {
        self.inner.find_unmirrored(pair).await
    }

    async fn find_by_status(&self, statuses: &[OrderStatus]) -> Result<Vec<ExchangeOrder>> {
        self.inner.find_by_status(statuses).await
    }

    async fn update_fields(
        &self,
        id: OrderId,
        expected_version: u64,
        update: &OrderUpdate,
    ) -> Result<ExchangeOrder> {
        if update.settled_amount.is_some() {
            if let Some(current) = self.inner.get(id).await? {
                if self.take_loss(&current.owner) {
                    return Err(SwapError::StorageUnavailable(format!("lost fill write on {id}")));
                }
            }
        }
        self.inner.update_fields(id, expected_version, update).await
    }

    async fn delete(&self, id: OrderId, expected_version: u64) -> Result<()> {
        self.inner.delete(id, expected_version).await
    }
}

fn placed_id(response: &PlaceOrderResponse) -> OrderId {
    assert!(response.success, "placement rejected: {:?}", response.reason);
    response.order_id.unwrap()
}

#[tokio::test]
async fn test_unmatched_order_stays_pending_with_escrow_taken() {
    let h = Harness::new().await;
    h.fund("P", &[(Asset::StableA, dec!(100))]);

    let response = h.place("P", Asset::StableA, Asset::NativeToken, "40").await;
    placed_id(&response);
    assert_eq!(response.status, Some(OrderStatus::Pending));
    assert_eq!(response.settled_amount, Some(Amount::ZERO));
    assert_eq!(h.balance("P", Asset::StableA).await, dec!(60));
}

#[tokio::test]
async fn test_partial_fill_completes_counter_and_credits_its_owner() {
    let h = Harness::new().await;
    h.fund("P", &[(Asset::StableA, dec!(100))]);
    h.fund("Q", &[(Asset::NativeToken, dec!(30))]);

    let q = placed_id(&h.place("Q", Asset::NativeToken, Asset::StableA, "30").await);
    let response = h.place("P", Asset::StableA, Asset::NativeToken, "40").await;
    let p = placed_id(&response);

    assert_eq!(response.status, Some(OrderStatus::Partial));
    assert_eq!(response.settled_amount, Some(Amount::from_units(30)));

    let q_order = h.order(q).await;
    assert_eq!(q_order.status, OrderStatus::Done);
    assert!(q_order.target_credited);
    assert_eq!(h.balance("Q", Asset::StableA).await, dec!(30));
    assert_eq!(h.balance("Q", Asset::NativeToken).await, dec!(0));

    // Partial orders are not credited until they finish.
    let p_order = h.order(p).await;
    assert!(!p_order.target_credited);
    assert_eq!(p_order.pending_amount(), Amount::from_units(10));
    assert_eq!(h.balance("P", Asset::NativeToken).await, dec!(0));
    assert_eq!(h.balance("P", Asset::StableA).await, dec!(60));
}

#[tokio::test]
async fn test_cancel_partial_credits_settled_and_forfeits_remainder() {
    let h = Harness::new().await;
    h.fund("P", &[(Asset::StableA, dec!(100))]);
    h.fund("Q", &[(Asset::NativeToken, dec!(30))]);

    placed_id(&h.place("Q", Asset::NativeToken, Asset::StableA, "30").await);
    let p = placed_id(&h.place("P", Asset::StableA, Asset::NativeToken, "40").await);

    let response = h
        .coordinator
        .cancel_order(CancelOrderRequest {
            order_id: p.to_string(),
            owner: "P".into(),
        })
        .await
        .unwrap();

    assert!(response.success);
    assert_eq!(response.status, Some(OrderStatus::Done));
    assert_eq!(response.purpose, Some(CancelPurpose::Settled));
    assert_eq!(response.reason.as_deref(), Some("Order cancelled (settled)"));
    assert_eq!(response.credited, Some(Amount::from_units(30)));
    assert_eq!(response.forfeited, Some(Amount::from_units(10)));

    let p_order = h.order(p).await;
    assert_eq!(p_order.status, OrderStatus::Done);
    assert_eq!(p_order.settled_amount, Amount::from_units(30));
    assert!(p_order.is_cancelled());

    assert_eq!(h.balance("P", Asset::NativeToken).await, dec!(30));
    assert_eq!(h.balance("P", Asset::StableA).await, dec!(60));

    // A cancelled order is no longer liquidity.
    h.fund("R", &[(Asset::NativeToken, dec!(10))]);
    let r = h.place("R", Asset::NativeToken, Asset::StableA, "10").await;
    assert_eq!(r.status, Some(OrderStatus::Pending));
}

#[tokio::test]
async fn test_same_asset_rejected_without_mutation() {
    let h = Harness::new().await;
    h.fund("P", &[(Asset::StableA, dec!(100))]);

    let response = h.place("P", Asset::StableA, Asset::StableA, "10").await;
    assert!(!response.success);
    assert_eq!(response.code.as_deref(), Some("VALIDATION_ERROR"));
    assert_eq!(h.orders.order_count(), 0);
    assert_eq!(h.balance("P", Asset::StableA).await, dec!(100));
    assert!(h.coordinator.ledger().journal().is_empty());
}

#[tokio::test]
async fn test_resettle_without_new_liquidity_is_idempotent() {
    let h = Harness::new().await;
    h.fund("P", &[(Asset::StableA, dec!(100))]);
    h.fund("Q", &[(Asset::NativeToken, dec!(30))]);

    placed_id(&h.place("Q", Asset::NativeToken, Asset::StableA, "30").await);
    let p = placed_id(&h.place("P", Asset::StableA, Asset::NativeToken, "40").await);

    let first = assert_ok!(h.coordinator.resettle(p).await);
    let second = assert_ok!(h.coordinator.resettle(p).await);

    assert_eq!(first.status, OrderStatus::Partial);
    assert_eq!((first.status, first.settled_amount), (second.status, second.settled_amount));
    assert!(first.fills.is_empty());
    assert!(second.fills.is_empty());
}

#[tokio::test]
async fn test_completed_fill_conserves_both_assets() {
    let h = Harness::new().await;
    h.fund("X", &[(Asset::StableA, dec!(50)), (Asset::StableB, dec!(5))]);
    h.fund("Y", &[(Asset::StableB, dec!(50))]);

    let sum = |a: Decimal, b: Decimal| a + b;
    let before_a = sum(h.balance("X", Asset::StableA).await, h.balance("Y", Asset::StableA).await);
    let before_b = sum(h.balance("X", Asset::StableB).await, h.balance("Y", Asset::StableB).await);

    placed_id(&h.place("X", Asset::StableA, Asset::StableB, "12.5").await);
    let y = h.place("Y", Asset::StableB, Asset::StableA, "12.5").await;
    assert_eq!(y.status, Some(OrderStatus::Done));

    let after_a = sum(h.balance("X", Asset::StableA).await, h.balance("Y", Asset::StableA).await);
    let after_b = sum(h.balance("X", Asset::StableB).await, h.balance("Y", Asset::StableB).await);
    assert_eq!(before_a, after_a);
    assert_eq!(before_b, after_b);
    assert_eq!(h.balance("X", Asset::StableB).await, dec!(17.5));
    assert_eq!(h.balance("Y", Asset::StableA).await, dec!(12.5));
}

#[tokio::test]
async fn test_oldest_counter_order_is_consumed_first() {
    let h = Harness::new().await;
    for owner in ["Q1", "Q2", "Q3"] {
        h.fund(owner, &[(Asset::NativeToken, dec!(10))]);
    }
    h.fund("P", &[(Asset::StableB, dec!(100))]);

    let q1 = placed_id(&h.place("Q1", Asset::NativeToken, Asset::StableB, "10").await);
    tokio::time::sleep(Duration::from_millis(2)).await;
    let q2 = placed_id(&h.place("Q2", Asset::NativeToken, Asset::StableB, "10").await);
    tokio::time::sleep(Duration::from_millis(2)).await;
    let q3 = placed_id(&h.place("Q3", Asset::NativeToken, Asset::StableB, "10").await);

    let p = h.place("P", Asset::StableB, Asset::NativeToken, "15").await;
    assert_eq!(p.status, Some(OrderStatus::Done));

    assert_eq!(h.order(q1).await.status, OrderStatus::Done);
    let second = h.order(q2).await;
    assert_eq!(second.status, OrderStatus::Partial);
    assert_eq!(second.settled_amount, Amount::from_units(5));
    assert_eq!(h.order(q3).await.status, OrderStatus::Pending);
}

#[tokio::test]
async fn test_cancel_without_fills_deletes_the_order() {
    let h = Harness::new().await;
    h.fund("P", &[(Asset::StableA, dec!(100))]);
    let p = placed_id(&h.place("P", Asset::StableA, Asset::NativeToken, "40").await);

    let response = h
        .coordinator
        .cancel_order(CancelOrderRequest {
            order_id: p.to_string(),
            owner: "P".into(),
        })
        .await
        .unwrap();

    assert!(response.success);
    assert_eq!(response.purpose, Some(CancelPurpose::Deleted));
    assert_eq!(response.reason.as_deref(), Some("Order cancelled (deleted)"));
    assert_eq!(response.credited, Some(Amount::ZERO));
    assert_eq!(response.forfeited, Some(Amount::from_units(40)));
    assert!(h.orders.get(p).await.unwrap().is_none());
    assert_eq!(h.balance("P", Asset::StableA).await, dec!(60));
}

#[tokio::test]
async fn test_cancel_requires_owner_and_existing_order() {
    let h = Harness::new().await;
    h.fund("P", &[(Asset::StableA, dec!(100))]);
    let p = placed_id(&h.place("P", Asset::StableA, Asset::NativeToken, "40").await);

    let foreign = h
        .coordinator
        .cancel_order(CancelOrderRequest {
            order_id: p.to_string(),
            owner: "Mallory".into(),
        })
        .await
        .unwrap();
    assert!(!foreign.success);
    assert_eq!(foreign.code.as_deref(), Some("UNAUTHORIZED"));
    assert_eq!(h.order(p).await.status, OrderStatus::Pending);

    let missing = h
        .coordinator
        .cancel_order(CancelOrderRequest {
            order_id: OrderId::new().to_string(),
            owner: "P".into(),
        })
        .await
        .unwrap();
    assert!(!missing.success);
    assert_eq!(missing.code.as_deref(), Some("NOT_FOUND"));
}

#[tokio::test]
async fn test_cancel_done_order_does_not_credit_twice() {
    let h = Harness::new().await;
    h.fund("P", &[(Asset::StableA, dec!(10))]);
    h.fund("Q", &[(Asset::NativeToken, dec!(10))]);

    placed_id(&h.place("Q", Asset::NativeToken, Asset::StableA, "10").await);
    let p = placed_id(&h.place("P", Asset::StableA, Asset::NativeToken, "10").await);
    assert_eq!(h.balance("P", Asset::NativeToken).await, dec!(10));

    let response = h
        .coordinator
        .cancel_order(CancelOrderRequest {
            order_id: p.to_string(),
            owner: "P".into(),
        })
        .await
        .unwrap();
    assert!(response.success);
    assert_eq!(response.purpose, Some(CancelPurpose::Deleted));
    assert_eq!(response.credited, Some(Amount::ZERO));
    assert_eq!(h.balance("P", Asset::NativeToken).await, dec!(10));
}

#[tokio::test]
async fn test_failed_credit_is_reported_and_resumed_once() {
    let h = Harness::with_config(|c| c.settlement_config.settle_on_create = false).await;
    h.fund("P", &[(Asset::StableA, dec!(100))]);
    h.fund("Q", &[(Asset::NativeToken, dec!(30))]);

    let q = placed_id(&h.place("Q", Asset::NativeToken, Asset::StableA, "30").await);
    let p = placed_id(&h.place("P", Asset::StableA, Asset::NativeToken, "40").await);

    // Q's completion credit is the next ledger write.
    h.ledger.fail_next_adjustments(1);
    let err = h.coordinator.resettle(p).await.unwrap_err();
    assert_eq!(err.error_code(), "SETTLEMENT_INCOMPLETE");
    assert!(err.is_retryable());

    // The fill itself is durable on both sides.
    let q_order = h.order(q).await;
    assert_eq!(q_order.status, OrderStatus::Done);
    assert!(!q_order.target_credited);
    assert_eq!(h.order(p).await.settled_amount, Amount::from_units(30));
    assert_eq!(h.balance("Q", Asset::StableA).await, dec!(0));

    let resumed = assert_ok!(h.coordinator.resettle(q).await);
    assert!(resumed.credited);
    assert_eq!(h.balance("Q", Asset::StableA).await, dec!(30));

    assert_ok!(h.coordinator.resettle(q).await);
    assert_ok!(h.coordinator.resettle(p).await);
    assert_eq!(h.balance("Q", Asset::StableA).await, dec!(30));
    assert_eq!(
        h.coordinator
            .ledger()
            .journal()
            .count(q, EntryPurpose::CompletionCredit),
        1
    );
}

#[tokio::test]
async fn test_lost_initiator_fill_is_landed_before_rematching() {
    let mut config = ExchangeConfig::default();
    config.settlement_config.retry_worker_enabled = false;
    let ledger = Arc::new(MemoryLedger::new());
    let store = Arc::new(LossyFillStore::default());
    let coordinator = ExchangeCoordinator::new(config, ledger.clone(), store.clone());
    coordinator.start().await.unwrap();

    for (owner, asset) in [
        ("P", Asset::StableA),
        ("Q", Asset::NativeToken),
        ("R", Asset::NativeToken),
    ] {
        ledger.open_account(AccountBalances::zero(AccountId::new(owner)).with(asset, dec!(30)));
    }
    let place = |owner: &str, from: Asset, to: Asset| PlaceOrderRequest {
        owner: owner.to_string(),
        from_asset: from.code().to_string(),
        to_asset: to.code().to_string(),
        amount: "30".to_string(),
    };

    let q = placed_id(
        &coordinator
            .place_order(place("Q", Asset::NativeToken, Asset::StableA))
            .await
            .unwrap(),
    );

    // Q's fill is written; P's copy of it is lost.
    store.lose_next_fill_for("P");
    let response = coordinator
        .place_order(place("P", Asset::StableA, Asset::NativeToken))
        .await
        .unwrap();
    assert!(response.success);
    assert!(response.retryable);
    assert_eq!(response.code.as_deref(), Some("SETTLEMENT_INCOMPLETE"));
    assert_eq!(response.settled_amount, Some(Amount::ZERO));
    let p = response.order_id.unwrap();

    let q_order = store.inner.get(q).await.unwrap().unwrap();
    assert_eq!(q_order.status, OrderStatus::Done);
    assert!(!q_order.target_credited);
    let owed = q_order.unmirrored_fill.expect("fill owed to P");
    assert_eq!(owed.order_id, p);
    assert_eq!(owed.amount, Amount::from_units(30));

    // Any run in the market lands the owed fill and both credits.
    assert_ok!(coordinator.resettle(q).await);
    let p_order = store.inner.get(p).await.unwrap().unwrap();
    assert_eq!(p_order.status, OrderStatus::Done);
    assert_eq!(p_order.settled_amount, Amount::from_units(30));
    assert!(p_order.target_credited);
    let q_order = store.inner.get(q).await.unwrap().unwrap();
    assert!(q_order.unmirrored_fill.is_none());
    assert!(q_order.target_credited);

    // P is not matched a second time.
    let r = coordinator
        .place_order(place("R", Asset::NativeToken, Asset::StableA))
        .await
        .unwrap();
    assert_eq!(r.status, Some(OrderStatus::Pending));

    let engine = coordinator.ledger();
    let balance = |owner: &str, asset: Asset| {
        let engine = engine.clone();
        let owner = AccountId::new(owner);
        async move { engine.balance(&owner, asset).await.unwrap() }
    };
    assert_eq!(balance("P", Asset::NativeToken).await, dec!(30));
    assert_eq!(balance("P", Asset::StableA).await, dec!(0));
    assert_eq!(balance("Q", Asset::StableA).await, dec!(30));
    assert_eq!(balance("Q", Asset::NativeToken).await, dec!(0));
    assert_eq!(balance("R", Asset::NativeToken).await, dec!(0));

    // Opening totals are held in balances plus R's open escrow.
    assert_eq!(ledger.total(Asset::StableA), dec!(30));
    assert_eq!(ledger.total(Asset::NativeToken) + dec!(30), dec!(60));
}

#[tokio::test]
async fn test_cancel_lands_owed_fill_before_crediting() {
    let mut config = ExchangeConfig::default();
    config.settlement_config.retry_worker_enabled = false;
    let ledger = Arc::new(MemoryLedger::new());
    let store = Arc::new(LossyFillStore::default());
    let coordinator = ExchangeCoordinator::new(config, ledger.clone(), store.clone());
    coordinator.start().await.unwrap();
    ledger.open_account(AccountBalances::zero(AccountId::new("P")).with(Asset::StableA, dec!(40)));
    ledger.open_account(AccountBalances::zero(AccountId::new("Q")).with(Asset::NativeToken, dec!(30)));

    let q = placed_id(
        &coordinator
            .place_order(PlaceOrderRequest {
                owner: "Q".into(),
                from_asset: "NATIVE".into(),
                to_asset: "STABLE-A".into(),
                amount: "30".into(),
            })
            .await
            .unwrap(),
    );
    store.lose_next_fill_for("P");
    let p = coordinator
        .place_order(PlaceOrderRequest {
            owner: "P".into(),
            from_asset: "STABLE-A".into(),
            to_asset: "NATIVE".into(),
            amount: "40".into(),
        })
        .await
        .unwrap()
        .order_id
        .unwrap();

    let response = coordinator
        .cancel_order(CancelOrderRequest {
            order_id: p.to_string(),
            owner: "P".into(),
        })
        .await
        .unwrap();
    assert!(response.success);
    assert_eq!(response.purpose, Some(CancelPurpose::Settled));
    assert_eq!(response.credited, Some(Amount::from_units(30)));
    assert_eq!(response.forfeited, Some(Amount::from_units(10)));

    let q_order = store.inner.get(q).await.unwrap().unwrap();
    assert!(q_order.unmirrored_fill.is_none());
    assert!(q_order.target_credited);
    assert_eq!(ledger.total(Asset::NativeToken), dec!(30));
}

#[tokio::test]
async fn test_failed_escrow_debit_leaves_nothing_behind() {
    let h = Harness::new().await;
    h.fund("P", &[(Asset::StableA, dec!(30))]);
    h.ledger.fail_next_adjustments(1);

    let result = h
        .coordinator
        .place_order(PlaceOrderRequest {
            owner: "P".into(),
            from_asset: "STABLE-A".into(),
            to_asset: "NATIVE".into(),
            amount: "30".into(),
        })
        .await;
    assert!(matches!(result, Err(SwapError::StorageUnavailable(_))));
    assert_eq!(h.orders.order_count(), 0);
    assert_eq!(h.balance("P", Asset::StableA).await, dec!(30));
}

#[tokio::test]
async fn test_failed_escrow_confirmation_refunds_and_removes_order() {
    let h = Harness::new().await;
    h.fund("P", &[(Asset::StableA, dec!(30))]);
    h.orders.fail_next_updates(1);

    let result = h
        .coordinator
        .place_order(PlaceOrderRequest {
            owner: "P".into(),
            from_asset: "STABLE-A".into(),
            to_asset: "NATIVE".into(),
            amount: "30".into(),
        })
        .await;
    assert!(matches!(result, Err(SwapError::StorageUnavailable(_))));
    assert_eq!(h.orders.order_count(), 0);
    assert_eq!(h.balance("P", Asset::StableA).await, dec!(30));

    // Escrow debit and refund cancel out.
    let engine = h.coordinator.ledger();
    let net = engine.journal().net_by_asset();
    assert_eq!(net.get(&Asset::StableA).copied().unwrap_or_default(), dec!(0));
}

#[tokio::test]
async fn test_deferred_settlement_is_accepted_and_finished_in_background() {
    let h = Harness::with_config(|c| {
        let settlement = &mut c.settlement_config;
        settlement.retry_worker_enabled = true;
        settlement.retry_backoff = Duration::from_millis(5);
        settlement.retry_sweep_interval = Duration::from_millis(20);
    })
    .await;
    h.fund("P", &[(Asset::StableA, dec!(100))]);
    h.fund("Q", &[(Asset::NativeToken, dec!(30))]);

    let q = placed_id(&h.place("Q", Asset::NativeToken, Asset::StableA, "30").await);

    // P's escrow lands; Q's completion credit does not.
    let q_owner = AccountId::new("Q");
    h.ledger.freeze_account(&q_owner);
    let response = h.place("P", Asset::StableA, Asset::NativeToken, "40").await;
    assert!(response.success);
    assert!(response.retryable);
    assert_eq!(response.code.as_deref(), Some("SETTLEMENT_INCOMPLETE"));
    assert_eq!(response.settled_amount, Some(Amount::from_units(30)));
    assert_eq!(response.status, Some(OrderStatus::Partial));
    h.ledger.thaw_account(&q_owner);

    let credited = tokio::time::timeout(Duration::from_secs(5), async {
        while h.balance("Q", Asset::StableA).await != dec!(30) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(credited.is_ok(), "retry worker never credited the counter");
    assert!(h.order(q).await.target_credited);

    h.coordinator.stop().await.unwrap();
    assert_eq!(h.balance("Q", Asset::StableA).await, dec!(30));
    assert!(h.coordinator.metrics().snapshot().retries_queued >= 1);
}

#[tokio::test]
async fn test_concurrent_placements_never_overfill_a_counter() {
    let h = Harness::new().await;
    h.fund("Q", &[(Asset::NativeToken, dec!(50))]);
    let q = placed_id(&h.place("Q", Asset::NativeToken, Asset::StableA, "50").await);

    let owners: Vec<String> = (0..10).map(|i| format!("P{i}")).collect();
    for owner in &owners {
        h.fund(owner, &[(Asset::StableA, dec!(10))]);
    }
    h.orders.set_latency(Some(Duration::from_millis(1)));
    h.ledger.set_latency(Some(Duration::from_millis(1)));

    let tasks: Vec<_> = owners
        .iter()
        .cloned()
        .map(|owner| {
            let coordinator = h.coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .place_order(PlaceOrderRequest {
                        owner,
                        from_asset: "STABLE-A".into(),
                        to_asset: "NATIVE".into(),
                        amount: "10".into(),
                    })
                    .await
            })
        })
        .collect();

    let mut settled = Amount::ZERO;
    for task in futures::future::join_all(tasks).await {
        let response = task.unwrap().unwrap();
        assert!(response.success);
        settled = settled + response.settled_amount.unwrap();
    }

    let counter = h.order(q).await;
    assert_eq!(counter.settled_amount, Amount::from_units(50));
    assert_eq!(counter.status, OrderStatus::Done);
    assert_eq!(settled, counter.settled_amount);
    assert_eq!(h.balance("Q", Asset::StableA).await, dec!(50));

    for order in h.orders.snapshot() {
        assert_ok!(order.check_invariants());
    }
}

#[tokio::test]
async fn test_backlog_reports_open_volume() {
    let h = Harness::new().await;
    h.fund("P", &[(Asset::StableA, dec!(100))]);
    h.fund("Q", &[(Asset::NativeToken, dec!(30))]);

    placed_id(&h.place("Q", Asset::NativeToken, Asset::StableA, "30").await);
    placed_id(&h.place("P", Asset::StableA, Asset::NativeToken, "40.005").await);

    let backlog = h.coordinator.settlement_backlog().await.unwrap();
    let report = backlog.report();
    assert_eq!(report.len(), 6);
    // STABLE-A->NATIVE: 40.0050 requested, 30 settled.
    assert_eq!(report[3].1.to_string(), "10.01");
    assert_eq!(report[0].1.to_string(), "0.00");
}

#[derive(Debug, Clone)]
struct Placement {
    owner: usize,
    from: Asset,
    to: Asset,
    amount: u64,
}

fn placement() -> impl Strategy<Value = Placement> {
    (0usize..3, 0usize..3, 1usize..3, 1u64..40).prop_map(|(owner, from, shift, amount)| {
        let from_asset = Asset::ALL[from];
        let to_asset = Asset::ALL[(from + shift) % 3];
        Placement {
            owner,
            from: from_asset,
            to: to_asset,
            amount,
        }
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_fills_balance_across_each_market(placements in prop::collection::vec(placement(), 1..20)) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let h = Harness::new().await;
            for owner in 0..3 {
                h.fund(
                    &format!("A{owner}"),
                    &[
                        (Asset::NativeToken, dec!(1000)),
                        (Asset::StableA, dec!(1000)),
                        (Asset::StableB, dec!(1000)),
                    ],
                );
            }

            for p in &placements {
                let response = h
                    .place(&format!("A{}", p.owner), p.from, p.to, &p.amount.to_string())
                    .await;
                assert!(response.success);
            }

            let orders = h.orders.snapshot();
            for order in &orders {
                assert!(order.check_invariants().is_ok(), "{order:?}");
                assert!(order.settled_amount <= order.requested_amount);
            }

            // Every fill lands on both sides of its market.
            for pair in swapsettle_common::AssetPair::all() {
                let side: Amount = orders
                    .iter()
                    .filter(|o| o.pair() == pair)
                    .map(|o| o.settled_amount)
                    .sum();
                let counter: Amount = orders
                    .iter()
                    .filter(|o| o.pair() == pair.inverse())
                    .map(|o| o.settled_amount)
                    .sum();
                assert_eq!(side, counter, "{pair}");
            }

            // Credits only ever follow completion.
            for order in &orders {
                assert_eq!(order.target_credited, order.status == OrderStatus::Done);
            }
        });
    }
}
