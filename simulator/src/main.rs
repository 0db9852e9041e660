//! SwapSettle Simulator
//!
//! Drives scenarios and random concurrent load against an in-memory
//! exchange, then checks that balances and fills still add up.

use std::sync::Arc;

use clap::Parser;
use rust_decimal::Decimal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod controller;
mod metrics;
mod scenario;
mod trader;

use controller::SimulationController;
use scenario::Scenario;
use swapsettle_coordinator::ExchangeConfig;

/// SwapSettle Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "SwapSettle scenario runner and load generator")]
struct Args {
    /// Number of simulated traders to create
    #[arg(short, long, default_value = "5")]
    traders: usize,

    /// Scenario to run (built-in name or path to a JSON file)
    #[arg(short, long)]
    scenario: Option<String>,

    /// Run every built-in scenario
    #[arg(long)]
    all_scenarios: bool,

    /// Simulation speed multiplier
    #[arg(long, default_value = "1.0")]
    speed: f64,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Run duration in seconds (0 = until Ctrl+C)
    #[arg(long, default_value = "0")]
    duration: u64,

    /// Concurrent placements per load tick
    #[arg(long, default_value = "4")]
    concurrency: usize,

    /// Probability of a transient ledger failure per placement
    #[arg(long, default_value = "0.0")]
    fault_rate: f64,

    /// Opening balance of every asset for load mode
    #[arg(long, default_value = "10000")]
    opening_balance: Decimal,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Starting SwapSettle Simulator");
    info!("Traders: {}", args.traders);
    info!("Speed: {}x", args.speed);

    let config = ExchangeConfig::from_env();
    if let Err(e) = config.validate() {
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    let scenarios: Vec<String> = if args.all_scenarios {
        Scenario::builtin().iter().map(|s| s.to_string()).collect()
    } else {
        args.scenario.iter().cloned().collect()
    };

    if !scenarios.is_empty() {
        for name in scenarios {
            let scenario = Scenario::load(&name)?;
            let opening: Decimal = scenario.opening_balance.parse()?;

            let controller =
                SimulationController::new(args.traders.max(2), args.speed, args.seed, config.clone());
            controller.initialize(opening).await?;
            controller.run_scenario(scenario).await?;
            info!("Scenario {} passed", name);
        }
        return Ok(());
    }

    info!("Running random load");
    info!("Press Ctrl+C to stop");

    let controller = Arc::new(SimulationController::new(
        args.traders,
        args.speed,
        args.seed,
        config,
    ));
    controller.initialize(args.opening_balance).await?;

    let duration = if args.duration > 0 {
        Some(std::time::Duration::from_secs(args.duration))
    } else {
        None
    };
    controller
        .run(duration, args.concurrency, args.fault_rate)
        .await?;

    let metrics = controller.metrics().await;
    info!("Simulation complete");
    info!("Total orders: {}", metrics.total_orders);
    info!("Accepted: {}", metrics.accepted_orders);
    info!("Rejected: {}", metrics.rejected_orders);
    info!("Deferred settlements: {}", metrics.deferred_settlements);
    info!("Cancellations: {}", metrics.cancellations);
    info!("Store errors: {}", metrics.store_errors);
    info!("Acceptance rate: {:.2}", metrics.acceptance_rate());
    info!("Average latency: {}ms", metrics.average_latency_ms());
    info!("p99 latency: {}ms", metrics.p99_latency_ms());
    info!("Exchange metrics:\n{}", controller.exchange_metrics());

    Ok(())
}
