//! Simulated trading accounts.

use rust_decimal::Decimal;

use swapsettle_common::{AccountId, Asset};
use swapsettle_ledger::AccountBalances;

/// A simulated account holder.
#[derive(Debug, Clone)]
pub struct SimulatedTrader {
    /// Account identifier.
    pub id: AccountId,
    /// Display name.
    pub name: String,
}

impl SimulatedTrader {
    /// Create a new simulated trader.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: AccountId::new(id.into()),
            name: name.into(),
        }
    }

    /// Opening balances: `initial` of every asset.
    pub fn opening_balances(&self, initial: Decimal) -> AccountBalances {
        Asset::ALL
            .into_iter()
            .fold(AccountBalances::zero(self.id.clone()), |balances, asset| {
                balances.with(asset, initial)
            })
    }
}

/// Factory for simulated traders.
pub struct TraderFactory;

impl TraderFactory {
    /// Create `count` traders. The first ones reuse scenario names.
    pub fn create_traders(count: usize) -> Vec<SimulatedTrader> {
        let names = [
            ("P", "Patricia"),
            ("Q", "Quentin"),
            ("R", "Rosa"),
            ("S", "Samir"),
            ("T", "Tomoko"),
        ];

        (0..count)
            .map(|i| match names.get(i) {
                Some((id, name)) => SimulatedTrader::new(*id, *name),
                None => SimulatedTrader::new(format!("TRADER_{}", i + 1), format!("Trader {}", i + 1)),
            })
            .collect()
    }
}
