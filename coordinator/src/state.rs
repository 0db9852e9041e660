//! Exchange coordinator state definitions.

/// Coordinator operational state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// Coordinator is starting up.
    Starting,
    /// Coordinator is running and accepting requests.
    Running,
    /// Coordinator is shutting down, not accepting new requests.
    ShuttingDown,
    /// Coordinator is stopped.
    Stopped,
}

impl CoordinatorState {
    /// Check if the coordinator is accepting new requests.
    pub fn accepts_requests(&self) -> bool {
        matches!(self, CoordinatorState::Running)
    }

    /// Suggested client back-off while not accepting requests.
    pub fn retry_after_ms(&self) -> u64 {
        match self {
            CoordinatorState::Starting => 1_000,
            CoordinatorState::Running => 0,
            CoordinatorState::ShuttingDown | CoordinatorState::Stopped => 5_000,
        }
    }
}
