//! Time utilities and timing constants for SwapSettle.

use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;

use crate::error::{Result, SwapError};

/// Timing constants.
pub mod constants {
    use super::Duration;

    /// Deadline for a single-record store operation (10 seconds).
    pub fn store_operation_timeout() -> Duration {
        Duration::from_secs(10)
    }

    /// Deadline for a multi-record store scan (20 seconds).
    pub fn store_scan_timeout() -> Duration {
        Duration::from_secs(20)
    }

    /// Pair lock acquisition timeout (10 seconds).
    pub fn lock_acquisition_timeout() -> Duration {
        Duration::from_secs(10)
    }

    /// Interval between retry worker sweeps (5 seconds).
    pub fn retry_sweep_interval() -> Duration {
        Duration::from_secs(5)
    }

    /// Delay before a queued settlement is retried (500 milliseconds).
    pub fn retry_backoff() -> Duration {
        Duration::from_millis(500)
    }

    /// Compare-and-swap attempts before a conflict is surfaced.
    pub const MAX_CONFLICT_RETRIES: u32 = 5;
}

/// A timestamp with timezone (always UTC).
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp.
pub fn now() -> Timestamp {
    Utc::now()
}

/// Run `future` under a deadline.
///
/// Elapsing is reported as [`SwapError::Timeout`] naming `operation`; the
/// operation's outcome is then unknown and must be treated as failed.
pub async fn with_timeout<T, F>(limit: Duration, operation: &str, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(SwapError::Timeout(format!(
            "{operation} exceeded {}ms",
            limit.as_millis()
        ))),
    }
}
