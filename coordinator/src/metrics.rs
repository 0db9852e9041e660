//! Metrics collection for exchange monitoring.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Exchange metrics.
#[derive(Default)]
pub struct Metrics {
    /// Orders accepted with escrow in place.
    pub orders_placed: AtomicU64,
    /// Placements rejected before any mutation.
    pub orders_rejected: AtomicU64,
    /// Orders cancelled or finalized.
    pub orders_cancelled: AtomicU64,
    /// Settlement runs started.
    pub settlements_total: AtomicU64,
    /// Settlement runs in progress.
    pub settlements_active: AtomicU64,
    /// Settlement runs that left the initiating order done.
    pub settlements_completed: AtomicU64,
    /// Settlement runs that stopped part-way.
    pub settlements_incomplete: AtomicU64,
    /// Counter-order fills applied.
    pub fills_applied: AtomicU64,
    /// Conditional updates retried after a conflict.
    pub conflicts_retried: AtomicU64,
    /// Pair lock acquisitions that timed out.
    pub lock_timeouts: AtomicU64,
    /// Orders handed to the retry worker.
    pub retries_queued: AtomicU64,
}

impl Metrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an accepted placement.
    pub fn order_placed(&self) {
        self.orders_placed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a rejected placement.
    pub fn order_rejected(&self) {
        self.orders_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a cancellation.
    pub fn order_cancelled(&self) {
        self.orders_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment settlement initiated.
    pub fn settlement_initiated(&self) {
        self.settlements_total.fetch_add(1, Ordering::Relaxed);
        self.settlements_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a settlement run that finished without error.
    pub fn settlement_finished(&self, completed: bool) {
        if completed {
            self.settlements_completed.fetch_add(1, Ordering::Relaxed);
        }
        self.settlements_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a settlement run that stopped part-way.
    pub fn settlement_incomplete(&self) {
        self.settlements_incomplete.fetch_add(1, Ordering::Relaxed);
        self.settlements_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record one applied fill.
    pub fn fill_applied(&self) {
        self.fills_applied.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a conflict that was retried.
    pub fn conflict_retried(&self) {
        self.conflicts_retried.fetch_add(1, Ordering::Relaxed);
    }

    /// Record lock timeout.
    pub fn lock_timeout(&self) {
        self.lock_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an order queued for retry.
    pub fn retry_queued(&self) {
        self.retries_queued.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            orders_placed: self.orders_placed.load(Ordering::Relaxed),
            orders_rejected: self.orders_rejected.load(Ordering::Relaxed),
            orders_cancelled: self.orders_cancelled.load(Ordering::Relaxed),
            settlements_total: self.settlements_total.load(Ordering::Relaxed),
            settlements_active: self.settlements_active.load(Ordering::Relaxed),
            settlements_completed: self.settlements_completed.load(Ordering::Relaxed),
            settlements_incomplete: self.settlements_incomplete.load(Ordering::Relaxed),
            fills_applied: self.fills_applied.load(Ordering::Relaxed),
            conflicts_retried: self.conflicts_retried.load(Ordering::Relaxed),
            lock_timeouts: self.lock_timeouts.load(Ordering::Relaxed),
            retries_queued: self.retries_queued.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let s = self.snapshot();
        let series: [(&str, &str, &str, u64); 11] = [
            ("orders_placed", "Orders accepted with escrow", "counter", s.orders_placed),
            ("orders_rejected", "Orders rejected at placement", "counter", s.orders_rejected),
            ("orders_cancelled", "Orders cancelled or finalized", "counter", s.orders_cancelled),
            ("settlements_total", "Settlement runs started", "counter", s.settlements_total),
            ("settlements_active", "Settlement runs in progress", "gauge", s.settlements_active),
            (
                "settlements_completed",
                "Settlement runs completing the initiating order",
                "counter",
                s.settlements_completed,
            ),
            (
                "settlements_incomplete",
                "Settlement runs stopped part-way",
                "counter",
                s.settlements_incomplete,
            ),
            ("fills_applied", "Counter-order fills applied", "counter", s.fills_applied),
            ("conflicts_retried", "Conditional updates retried", "counter", s.conflicts_retried),
            ("lock_timeouts", "Pair lock acquisition timeouts", "counter", s.lock_timeouts),
            ("retries_queued", "Orders queued for settlement retry", "counter", s.retries_queued),
        ];

        let mut out = String::new();
        for (name, help, kind, value) in series {
            let _ = writeln!(out, "# HELP swapsettle_{name} {help}");
            let _ = writeln!(out, "# TYPE swapsettle_{name} {kind}");
            let _ = writeln!(out, "swapsettle_{name} {value}\n");
        }
        out
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub orders_placed: u64,
    pub orders_rejected: u64,
    pub orders_cancelled: u64,
    pub settlements_total: u64,
    pub settlements_active: u64,
    pub settlements_completed: u64,
    pub settlements_incomplete: u64,
    pub fills_applied: u64,
    pub conflicts_retried: u64,
    pub lock_timeouts: u64,
    pub retries_queued: u64,
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<Metrics>;
