//! Read-only view of unmatched volume per directed pair.

use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

use swapsettle_common::{Amount, AssetPair, OrderStatus, Result};
use swapsettle_orders::OrderStore;

/// Pending volume on one directed pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BacklogEntry {
    /// Conversion direction.
    pub pair: AssetPair,
    /// Sum of pending amounts at matching scale.
    pub pending: Amount,
    /// Number of open orders contributing.
    pub orders: usize,
}

/// Pending volume for all six directed pairs, in reporting order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettlementBacklog {
    pub entries: Vec<BacklogEntry>,
}

impl SettlementBacklog {
    /// Build the backlog from the open orders in `store`.
    pub async fn query(store: &dyn OrderStore) -> Result<Self> {
        let open = store.find_by_status(&OrderStatus::OPEN).await?;

        let entries = AssetPair::all()
            .into_iter()
            .map(|pair| {
                let live: Vec<_> = open
                    .iter()
                    .filter(|o| o.pair() == pair && o.escrow_confirmed)
                    .collect();
                BacklogEntry {
                    pair,
                    pending: live.iter().map(|o| o.pending_amount()).sum(),
                    orders: live.len(),
                }
            })
            .collect();

        Ok(Self { entries })
    }

    /// Pending volume on `pair`.
    pub fn pending(&self, pair: AssetPair) -> Amount {
        self.entries
            .iter()
            .find(|e| e.pair == pair)
            .map(|e| e.pending)
            .unwrap_or(Amount::ZERO)
    }

    /// Pending volumes rounded to reporting scale.
    pub fn report(&self) -> Vec<(AssetPair, Decimal)> {
        self.entries
            .iter()
            .map(|e| (e.pair, e.pending.to_report()))
            .collect()
    }
}

impl fmt::Display for SettlementBacklog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (pair, pending) in self.report() {
            writeln!(f, "{pair}: {pending}")?;
        }
        Ok(())
    }
}
