//! SwapSettle Coordinator Binary
//!
//! Runs the exchange coordinator and its retry worker until interrupted.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use swapsettle_coordinator::{ExchangeConfig, ExchangeCoordinator};
use swapsettle_ledger::LedgerStore;
use swapsettle_orders::OrderStore;

const STATUS_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ExchangeConfig::from_env();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting SwapSettle coordinator");

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    let node_id = config
        .node_id
        .clone()
        .unwrap_or_else(|| format!("swapsettle-{}", uuid::Uuid::new_v4()));
    info!(node_id = %node_id, "Node ID assigned");

    let (ledger_store, order_store) = open_stores(&config).await?;

    let mut config = config;
    config.node_id = Some(node_id.clone());
    let coordinator = Arc::new(ExchangeCoordinator::new(config, ledger_store, order_store));

    let coordinator_clone = coordinator.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            return;
        }
        info!("Shutdown signal received");
        if let Err(e) = coordinator_clone.stop().await {
            error!(error = %e, "Error during shutdown");
        }
    });

    coordinator.start().await?;
    info!(node_id = %node_id, "Coordinator running");

    let mut status = tokio::time::interval(STATUS_INTERVAL);
    while coordinator.is_accepting_requests() {
        tokio::select! {
            _ = status.tick() => log_status(&coordinator).await,
            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
        }
    }

    info!("Coordinator shutdown complete");
    Ok(())
}

async fn log_status(coordinator: &ExchangeCoordinator) {
    match coordinator.settlement_backlog().await {
        Ok(backlog) => {
            for (pair, pending) in backlog.report() {
                info!(pair = %pair, pending = %pending, "Settlement backlog");
            }
        }
        Err(e) => error!(error = %e, "Backlog query failed"),
    }
    let metrics = coordinator.metrics().snapshot();
    info!(
        placed = metrics.orders_placed,
        rejected = metrics.orders_rejected,
        cancelled = metrics.orders_cancelled,
        fills = metrics.fills_applied,
        incomplete = metrics.settlements_incomplete,
        "Coordinator metrics"
    );
}

#[cfg(feature = "postgres")]
async fn open_stores(
    config: &ExchangeConfig,
) -> anyhow::Result<(Arc<dyn LedgerStore>, Arc<dyn OrderStore>)> {
    use sqlx::postgres::PgPoolOptions;
    use swapsettle_ledger::PgLedger;
    use swapsettle_orders::PgOrderStore;

    let Some(url) = config.store_config.database_url.as_deref() else {
        return Err(anyhow::anyhow!("DATABASE_URL is required with the postgres feature"));
    };
    let pool = PgPoolOptions::new()
        .max_connections(config.store_config.max_connections)
        .acquire_timeout(config.store_config.operation_timeout)
        .connect(url)
        .await?;
    info!("Connected to PostgreSQL");

    Ok((
        Arc::new(PgLedger::new(pool.clone())),
        Arc::new(PgOrderStore::new(pool)),
    ))
}

#[cfg(not(feature = "postgres"))]
async fn open_stores(
    config: &ExchangeConfig,
) -> anyhow::Result<(Arc<dyn LedgerStore>, Arc<dyn OrderStore>)> {
    use swapsettle_ledger::MemoryLedger;
    use swapsettle_orders::MemoryOrderStore;

    if config.store_config.database_url.is_some() {
        tracing::warn!("DATABASE_URL set but built without the postgres feature; using memory stores");
    }
    Ok((
        Arc::new(MemoryLedger::new()),
        Arc::new(MemoryOrderStore::new()),
    ))
}
