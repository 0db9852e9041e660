//! Counter-order selection.
//!
//! Every asset converts 1:1, so matching is purely about availability:
//! candidates for an order on `A -> B` are live orders on `B -> A`, consumed
//! strictly oldest first.

use std::sync::Arc;

use tracing::{debug, instrument};

use swapsettle_common::{Amount, AssetPair, ExchangeOrder, OrderStatus, Result};
use swapsettle_orders::OrderStore;

/// Selects counter-orders for a directed pair.
#[derive(Clone)]
pub struct MatchingEngine {
    orders: Arc<dyn OrderStore>,
}

impl MatchingEngine {
    /// Create a matching engine over an order store.
    pub fn new(orders: Arc<dyn OrderStore>) -> Self {
        Self { orders }
    }

    /// Counter-orders able to absorb `needed` of an order converting along
    /// `pair`, in FIFO priority.
    ///
    /// The returned sequence stops after the candidate whose pending amount
    /// brings the running total to `needed`; it holds every candidate when
    /// liquidity is short and is empty when there is none.
    #[instrument(skip(self))]
    pub async fn find_counter_orders(
        &self,
        needed: Amount,
        pair: AssetPair,
    ) -> Result<CounterOrders> {
        if needed.is_zero() {
            return Ok(CounterOrders::new(Vec::new(), needed));
        }

        let candidates = self
            .orders
            .find_by_pair(pair.inverse(), &OrderStatus::OPEN)
            .await?;
        debug!(candidates = candidates.len(), "Scanned counter side");

        Ok(CounterOrders::new(candidates, needed))
    }
}

/// Lazy FIFO walk over counter-order candidates.
#[derive(Debug)]
pub struct CounterOrders {
    candidates: std::vec::IntoIter<ExchangeOrder>,
    needed: Amount,
    accumulated: Amount,
}

impl CounterOrders {
    fn new(candidates: Vec<ExchangeOrder>, needed: Amount) -> Self {
        Self {
            candidates: candidates.into_iter(),
            needed,
            accumulated: Amount::ZERO,
        }
    }

    /// Pending amount of the candidates yielded so far.
    pub fn accumulated(&self) -> Amount {
        self.accumulated
    }
}

impl Iterator for CounterOrders {
    type Item = ExchangeOrder;

    fn next(&mut self) -> Option<ExchangeOrder> {
        if self.accumulated >= self.needed {
            return None;
        }
        // Unconfirmed escrow or nothing left to fill: not liquidity.
        let candidate = self.candidates.by_ref().find(|order| order.is_matchable())?;
        self.accumulated = self.accumulated + candidate.pending_amount();
        Some(candidate)
    }
}
