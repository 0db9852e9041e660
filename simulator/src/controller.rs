//! Simulation controller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, ensure};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::{info, warn};

use swapsettle_common::{AccountId, Amount, Asset, AssetPair, OrderId, OrderStatus};
use swapsettle_coordinator::{
    CancelOrderRequest, CancelPurpose, ExchangeConfig, ExchangeCoordinator, PlaceOrderRequest,
};
use swapsettle_ledger::MemoryLedger;
use swapsettle_orders::{MemoryOrderStore, OrderStore};

use crate::metrics::SimulationMetrics;
use crate::scenario::{AssertCondition, FaultType, Scenario, ScenarioStep};
use crate::trader::{SimulatedTrader, TraderFactory};

/// Controls the simulation.
pub struct SimulationController {
    /// Number of traders.
    trader_count: usize,
    /// Simulation speed multiplier.
    speed: f64,
    /// Random number generator.
    rng: Arc<RwLock<StdRng>>,
    /// Simulated traders.
    traders: Arc<RwLock<Vec<SimulatedTrader>>>,
    /// Simulation metrics.
    metrics: Arc<RwLock<SimulationMetrics>>,
    /// Running flag.
    running: Arc<RwLock<bool>>,
    /// Exchange under test.
    coordinator: Arc<ExchangeCoordinator>,
    ledger: Arc<MemoryLedger>,
    orders: Arc<MemoryOrderStore>,
    /// Ledger totals after funding.
    opening_totals: RwLock<HashMap<Asset, Decimal>>,
    /// Scenario labels.
    labels: RwLock<HashMap<String, OrderId>>,
    /// Pair of every accepted order.
    placed: RwLock<HashMap<OrderId, AssetPair>>,
    /// Settled volume of orders removed by cancellation, per pair.
    removed_settled: RwLock<HashMap<AssetPair, Amount>>,
    /// Accounts currently frozen by fault injection.
    frozen: RwLock<Vec<AccountId>>,
}

impl SimulationController {
    /// Create a new simulation controller over in-memory stores.
    pub fn new(trader_count: usize, speed: f64, seed: Option<u64>, config: ExchangeConfig) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        let ledger = Arc::new(MemoryLedger::new());
        let orders = Arc::new(MemoryOrderStore::new());
        let coordinator = Arc::new(ExchangeCoordinator::new(
            config,
            ledger.clone(),
            orders.clone(),
        ));

        Self {
            trader_count,
            speed: if speed > 0.0 { speed } else { 1.0 },
            rng: Arc::new(RwLock::new(rng)),
            traders: Arc::new(RwLock::new(Vec::new())),
            metrics: Arc::new(RwLock::new(SimulationMetrics::new())),
            running: Arc::new(RwLock::new(false)),
            coordinator,
            ledger,
            orders,
            opening_totals: RwLock::new(HashMap::new()),
            labels: RwLock::new(HashMap::new()),
            placed: RwLock::new(HashMap::new()),
            removed_settled: RwLock::new(HashMap::new()),
            frozen: RwLock::new(Vec::new()),
        }
    }

    /// Fund the traders and start the exchange.
    pub async fn initialize(&self, opening_balance: Decimal) -> anyhow::Result<()> {
        info!("Initializing simulation with {} traders", self.trader_count);

        let traders = TraderFactory::create_traders(self.trader_count);
        for trader in &traders {
            self.ledger.open_account(trader.opening_balances(opening_balance));
            info!(
                "Funded trader {} ({}) with {} of every asset",
                trader.id, trader.name, opening_balance
            );
        }
        *self.traders.write().await = traders;

        let totals = Asset::ALL
            .into_iter()
            .map(|asset| (asset, self.ledger.total(asset)))
            .collect();
        *self.opening_totals.write().await = totals;

        self.coordinator.start().await?;
        Ok(())
    }

    /// Run a scenario. The first failed assertion aborts it.
    pub async fn run_scenario(&self, scenario: Scenario) -> anyhow::Result<()> {
        info!("Running scenario: {} - {}", scenario.name, scenario.description);

        *self.running.write().await = true;

        for (index, step) in scenario.steps.iter().enumerate() {
            if !*self.running.read().await {
                break;
            }

            if let Err(e) = self.execute_step(step).await {
                *self.running.write().await = false;
                return Err(e.context(format!("step {} of {} failed", index + 1, scenario.name)));
            }
        }

        *self.running.write().await = false;
        self.coordinator.stop().await?;

        Ok(())
    }

    /// Run random concurrent load.
    pub async fn run(
        self: &Arc<Self>,
        duration: Option<Duration>,
        concurrency: usize,
        fault_rate: f64,
    ) -> anyhow::Result<()> {
        info!("Running simulation in continuous mode");

        *self.running.write().await = true;

        let controller = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                if !*controller.running.read().await {
                    break;
                }

                let batch: Vec<_> = (0..concurrency.max(1))
                    .map(|_| {
                        let controller = controller.clone();
                        tokio::spawn(async move { controller.random_action(fault_rate).await })
                    })
                    .collect();
                for result in futures::future::join_all(batch).await {
                    if let Err(e) = result {
                        warn!("Load task panicked: {}", e);
                    }
                }

                let delay = Duration::from_millis((100.0 / controller.speed) as u64);
                tokio::time::sleep(delay).await;
            }
        });

        match duration {
            Some(d) => {
                tokio::time::sleep(d).await;
            }
            None => {
                tokio::signal::ctrl_c().await?;
            }
        }

        *self.running.write().await = false;
        handle.await?;

        self.clear_faults().await;
        self.coordinator.stop().await?;
        self.verify_conservation().await
    }

    /// One random placement, occasionally preceded by a cancellation or a
    /// transient ledger fault.
    async fn random_action(&self, fault_rate: f64) {
        let traders = self.traders.read().await.clone();
        if traders.is_empty() {
            return;
        }

        let (trader, pair, cents, cancel_roll, fault_roll) = {
            let mut rng = self.rng.write().await;
            let trader = traders[rng.gen_range(0..traders.len())].clone();
            let pair = AssetPair::all()[rng.gen_range(0..6)];
            let cents: i64 = rng.gen_range(100..5_000);
            (trader, pair, cents, rng.gen::<f64>(), rng.gen::<f64>())
        };

        if fault_roll < fault_rate {
            self.ledger.fail_next_adjustments(1);
        }

        if cancel_roll < 0.1 {
            self.cancel_random_open(&trader).await;
            return;
        }

        let amount = Decimal::new(cents, 2);
        let _ = self
            .place(
                None,
                &trader.id,
                pair.from.code(),
                pair.to.code(),
                &amount.to_string(),
            )
            .await;
    }

    async fn cancel_random_open(&self, trader: &SimulatedTrader) {
        let open = match self.orders.find_by_status(&OrderStatus::OPEN).await {
            Ok(open) => open,
            Err(e) => {
                warn!("Open order scan failed: {}", e);
                return;
            }
        };
        let Some(order) = open
            .into_iter()
            .find(|o| o.owner == trader.id && o.escrow_confirmed)
        else {
            return;
        };
        if let Err(e) = self.cancel(order.id, &trader.id).await {
            warn!("Cancellation of {} failed: {}", order.id, e);
        }
    }

    async fn place(
        &self,
        label: Option<&str>,
        owner: &AccountId,
        from: &str,
        to: &str,
        amount: &str,
    ) -> anyhow::Result<Option<OrderId>> {
        let started = Instant::now();
        let response = self
            .coordinator
            .place_order(PlaceOrderRequest {
                owner: owner.to_string(),
                from_asset: from.to_string(),
                to_asset: to.to_string(),
                amount: amount.to_string(),
            })
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                self.metrics.write().await.record_store_error();
                return Err(e.into());
            }
        };

        if !response.success {
            self.metrics.write().await.record_rejected();
            info!(
                "Order from {} rejected: {}",
                owner,
                response.reason.as_deref().unwrap_or("unknown")
            );
            return Ok(None);
        }

        let order_id = response
            .order_id
            .ok_or_else(|| anyhow!("accepted placement without an order id"))?;
        let latency = started.elapsed().as_millis() as u64;
        self.metrics
            .write()
            .await
            .record_accepted(latency, response.retryable);

        let pair = AssetPair::new(from.parse()?, to.parse()?)?;
        self.placed.write().await.insert(order_id, pair);
        if let Some(label) = label {
            self.labels.write().await.insert(label.to_string(), order_id);
        }

        info!(
            "Order {} placed: {:?} settled {:?}",
            order_id, response.status, response.settled_amount
        );
        Ok(Some(order_id))
    }

    async fn cancel(&self, order_id: OrderId, owner: &AccountId) -> anyhow::Result<()> {
        let response = self
            .coordinator
            .cancel_order(CancelOrderRequest {
                order_id: order_id.to_string(),
                owner: owner.to_string(),
            })
            .await?;

        ensure!(
            response.success,
            "cancellation refused: {}",
            response.reason.unwrap_or_default()
        );
        self.metrics.write().await.record_cancellation();

        if response.purpose == Some(CancelPurpose::Deleted) {
            let settled = response.settled_amount.unwrap_or(Amount::ZERO);
            if let Some(pair) = self.placed.read().await.get(&order_id).copied() {
                let mut removed = self.removed_settled.write().await;
                let entry = removed.entry(pair).or_insert(Amount::ZERO);
                *entry = *entry + settled;
            }
        }
        Ok(())
    }

    async fn label(&self, label: &str) -> anyhow::Result<OrderId> {
        self.labels
            .read()
            .await
            .get(label)
            .copied()
            .ok_or_else(|| anyhow!("unknown order label {}", label))
    }

    /// Execute a single scenario step.
    async fn execute_step(&self, step: &ScenarioStep) -> anyhow::Result<()> {
        match step {
            ScenarioStep::Wait { millis } => {
                let adjusted = (*millis as f64 / self.speed) as u64;
                info!("Waiting {}ms (adjusted: {}ms)", millis, adjusted);
                tokio::time::sleep(Duration::from_millis(adjusted)).await;
            }
            ScenarioStep::PlaceOrder {
                label,
                trader,
                from,
                to,
                amount,
                expect_rejection,
            } => {
                info!("Placing {}: {} {} {} -> {}", label, trader, amount, from, to);
                let placed = self
                    .place(Some(label), &AccountId::new(trader.as_str()), from, to, amount)
                    .await?;
                if *expect_rejection {
                    ensure!(placed.is_none(), "order {} was accepted", label);
                } else {
                    ensure!(placed.is_some(), "order {} was rejected", label);
                }
            }
            ScenarioStep::CancelOrder { label, trader } => {
                info!("Cancelling {} for {}", label, trader);
                let order_id = self.label(label).await?;
                self.cancel(order_id, &AccountId::new(trader.as_str())).await?;
            }
            ScenarioStep::Resettle { label } => {
                let order_id = self.label(label).await?;
                match self.coordinator.resettle(order_id).await {
                    Ok(outcome) => info!(
                        "Resettled {}: {} at {} ({} fills)",
                        label,
                        outcome.status,
                        outcome.settled_amount,
                        outcome.fills.len()
                    ),
                    Err(e) => warn!("Resettle of {} failed: {}", label, e),
                }
            }
            ScenarioStep::InjectFault { fault_type } => {
                info!("Injecting fault {:?}", fault_type);
                self.inject_fault(fault_type).await;
            }
            ScenarioStep::ClearFaults => {
                info!("Clearing faults");
                self.clear_faults().await;
            }
            ScenarioStep::Assert { condition } => {
                info!("Asserting condition: {:?}", condition);
                self.check(condition).await?;
            }
        }

        Ok(())
    }

    async fn inject_fault(&self, fault_type: &FaultType) {
        match fault_type {
            FaultType::LedgerOffline => self.ledger.set_unavailable(true),
            FaultType::OrderStoreOffline => self.orders.set_unavailable(true),
            FaultType::StoreLatency { delay_ms } => {
                let delay = Some(Duration::from_millis(*delay_ms));
                self.ledger.set_latency(delay);
                self.orders.set_latency(delay);
            }
            FaultType::FailAdjustments { count } => self.ledger.fail_next_adjustments(*count),
            FaultType::FreezeAccount { trader } => {
                let account = AccountId::new(trader.as_str());
                self.ledger.freeze_account(&account);
                self.frozen.write().await.push(account);
            }
        }
    }

    async fn clear_faults(&self) {
        self.ledger.set_unavailable(false);
        self.orders.set_unavailable(false);
        self.ledger.set_latency(None);
        self.orders.set_latency(None);
        self.ledger.fail_next_adjustments(0);
        self.orders.fail_next_updates(0);
        for account in self.frozen.write().await.drain(..) {
            self.ledger.thaw_account(&account);
        }
    }

    async fn check(&self, condition: &AssertCondition) -> anyhow::Result<()> {
        match condition {
            AssertCondition::BalanceEquals {
                trader,
                asset,
                amount,
            } => {
                let asset: Asset = asset.parse()?;
                let expected: Decimal = amount.parse()?;
                let actual = self
                    .coordinator
                    .ledger()
                    .balance(&AccountId::new(trader.as_str()), asset)
                    .await?;
                ensure!(
                    actual == expected,
                    "{} {} balance is {}, expected {}",
                    trader,
                    asset,
                    actual,
                    expected
                );
            }
            AssertCondition::OrderState {
                label,
                status,
                settled,
            } => {
                let order_id = self.label(label).await?;
                let order = self
                    .orders
                    .get(order_id)
                    .await?
                    .ok_or_else(|| anyhow!("order {} not found", label))?;
                let status: OrderStatus = status.parse()?;
                let settled = Amount::parse(settled)?;
                ensure!(
                    order.status == status && order.settled_amount == settled,
                    "order {} is {} at {}, expected {} at {}",
                    label,
                    order.status,
                    order.settled_amount,
                    status,
                    settled
                );
            }
            AssertCondition::OrderRemoved { label } => {
                let order_id = self.label(label).await?;
                ensure!(
                    self.orders.get(order_id).await?.is_none(),
                    "order {} still exists",
                    label
                );
            }
            AssertCondition::BacklogEquals { pair, amount } => {
                let expected: Decimal = amount.parse()?;
                let backlog = self.coordinator.settlement_backlog().await?;
                let (_, actual) = backlog
                    .report()
                    .into_iter()
                    .find(|(p, _)| p.to_string() == *pair)
                    .ok_or_else(|| anyhow!("unknown pair {}", pair))?;
                ensure!(
                    actual == expected,
                    "backlog on {} is {}, expected {}",
                    pair,
                    actual,
                    expected
                );
            }
            AssertCondition::Conserved => self.verify_conservation().await?,
        }
        Ok(())
    }

    /// Check that every balance movement is journaled, that every order
    /// satisfies its invariants and that fills landed on both sides of each
    /// market.
    pub async fn verify_conservation(&self) -> anyhow::Result<()> {
        let opening = self.opening_totals.read().await.clone();
        let journal_net = self.coordinator.ledger().journal().net_by_asset();
        for asset in Asset::ALL {
            let expected = opening.get(&asset).copied().unwrap_or(Decimal::ZERO)
                + journal_net.get(&asset).copied().unwrap_or(Decimal::ZERO);
            let actual = self.ledger.total(asset);
            ensure!(
                actual == expected,
                "{} total is {}, journal implies {}",
                asset,
                actual,
                expected
            );
        }

        let orders = self.orders.snapshot();
        for order in &orders {
            order
                .check_invariants()
                .map_err(|e| anyhow!("order {} broken: {}", order.id, e))?;
        }

        let removed = self.removed_settled.read().await.clone();
        // A fill still owed by a counter-order counts toward its initiator.
        let settled_on = |pair: AssetPair| -> Amount {
            let owed: Amount = orders
                .iter()
                .filter(|o| o.pair() == pair.inverse())
                .filter_map(|o| o.unmirrored_fill.map(|f| f.amount))
                .sum();
            orders
                .iter()
                .filter(|o| o.pair() == pair)
                .map(|o| o.settled_amount)
                .sum::<Amount>()
                + removed.get(&pair).copied().unwrap_or(Amount::ZERO)
                + owed
        };
        for pair in AssetPair::all() {
            let side = settled_on(pair);
            let counter = settled_on(pair.inverse());
            ensure!(
                side == counter,
                "{} settled {} but its counter side settled {}",
                pair,
                side,
                counter
            );
        }

        info!("Conservation holds across {} orders", orders.len());
        Ok(())
    }

    /// Get simulation metrics.
    pub async fn metrics(&self) -> SimulationMetrics {
        self.metrics.read().await.clone()
    }

    /// Exchange metrics in Prometheus text format.
    pub fn exchange_metrics(&self) -> String {
        self.coordinator.metrics().to_prometheus()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ExchangeConfig {
        let mut config = ExchangeConfig::default();
        config.settlement_config.retry_worker_enabled = false;
        config
    }

    #[tokio::test]
    async fn test_builtin_scenarios_pass() {
        for name in Scenario::builtin() {
            let controller = SimulationController::new(3, 10.0, Some(7), config());
            let scenario = Scenario::load(name).unwrap();
            let opening: Decimal = scenario.opening_balance.parse().unwrap();
            controller.initialize(opening).await.unwrap();
            controller
                .run_scenario(scenario)
                .await
                .unwrap_or_else(|e| panic!("{name}: {e:#}"));
        }
    }

    #[tokio::test]
    async fn test_failed_assertion_aborts_scenario() {
        let controller = SimulationController::new(2, 1.0, Some(1), config());
        controller.initialize(Decimal::from(100)).await.unwrap();
        let scenario = Scenario {
            name: "wrong".into(),
            description: "expects a balance that never appears".into(),
            opening_balance: "100".into(),
            steps: vec![ScenarioStep::Assert {
                condition: AssertCondition::BalanceEquals {
                    trader: "P".into(),
                    asset: "NATIVE".into(),
                    amount: "1".into(),
                },
            }],
        };
        assert!(controller.run_scenario(scenario).await.is_err());
    }

    #[tokio::test]
    async fn test_random_load_conserves() {
        let controller = Arc::new(SimulationController::new(4, 50.0, Some(42), config()));
        controller.initialize(Decimal::from(10_000)).await.unwrap();
        controller
            .run(Some(Duration::from_millis(300)), 4, 0.05)
            .await
            .unwrap();

        let metrics = controller.metrics().await;
        assert!(metrics.total_orders > 0);
    }
}
