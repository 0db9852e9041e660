//! Simulation metrics.

use std::collections::VecDeque;

/// Simulation metrics.
#[derive(Debug, Clone)]
pub struct SimulationMetrics {
    /// Placements attempted.
    pub total_orders: u64,
    /// Placements accepted.
    pub accepted_orders: u64,
    /// Placements rejected.
    pub rejected_orders: u64,
    /// Accepted placements whose settlement was deferred.
    pub deferred_settlements: u64,
    /// Cancellations accepted.
    pub cancellations: u64,
    /// Calls that failed with a store error.
    pub store_errors: u64,
    /// Placement latency samples (ms).
    latency_samples: VecDeque<u64>,
    /// Maximum samples to keep.
    max_samples: usize,
}

impl SimulationMetrics {
    /// Create new metrics.
    pub fn new() -> Self {
        Self {
            total_orders: 0,
            accepted_orders: 0,
            rejected_orders: 0,
            deferred_settlements: 0,
            cancellations: 0,
            store_errors: 0,
            latency_samples: VecDeque::with_capacity(10000),
            max_samples: 10000,
        }
    }

    /// Record an accepted placement.
    pub fn record_accepted(&mut self, latency_ms: u64, deferred: bool) {
        self.total_orders += 1;
        self.accepted_orders += 1;
        if deferred {
            self.deferred_settlements += 1;
        }

        if self.latency_samples.len() >= self.max_samples {
            self.latency_samples.pop_front();
        }
        self.latency_samples.push_back(latency_ms);
    }

    /// Record a rejected placement.
    pub fn record_rejected(&mut self) {
        self.total_orders += 1;
        self.rejected_orders += 1;
    }

    /// Record a store failure surfaced to the caller.
    pub fn record_store_error(&mut self) {
        self.total_orders += 1;
        self.store_errors += 1;
    }

    /// Record an accepted cancellation.
    pub fn record_cancellation(&mut self) {
        self.cancellations += 1;
    }

    /// Get average placement latency in ms.
    pub fn average_latency_ms(&self) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let sum: u64 = self.latency_samples.iter().sum();
        sum / self.latency_samples.len() as u64
    }

    /// Get p99 placement latency.
    pub fn p99_latency_ms(&self) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let mut sorted: Vec<_> = self.latency_samples.iter().copied().collect();
        sorted.sort_unstable();

        let idx = (sorted.len() * 99 / 100).min(sorted.len() - 1);
        sorted[idx]
    }

    /// Get acceptance rate.
    pub fn acceptance_rate(&self) -> f64 {
        if self.total_orders == 0 {
            return 0.0;
        }

        self.accepted_orders as f64 / self.total_orders as f64
    }
}

impl Default for SimulationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics() {
        let mut metrics = SimulationMetrics::new();

        metrics.record_accepted(100, false);
        metrics.record_accepted(200, true);
        metrics.record_accepted(150, false);
        metrics.record_rejected();

        assert_eq!(metrics.total_orders, 4);
        assert_eq!(metrics.accepted_orders, 3);
        assert_eq!(metrics.rejected_orders, 1);
        assert_eq!(metrics.deferred_settlements, 1);
        assert_eq!(metrics.average_latency_ms(), 150);
        assert_eq!(metrics.p99_latency_ms(), 200);
        assert_eq!(metrics.acceptance_rate(), 0.75);
    }
}
