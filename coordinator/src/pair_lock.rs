//! In-process serialization of work on an asset market.
//!
//! Settlement and cancellation touching the same unordered asset pair take
//! the market's lock. Cross-process safety still rests on the stores'
//! conditional updates; this only removes avoidable conflicts.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use swapsettle_common::{Asset, AssetPair, OrderId, Result, SwapError};

/// Unordered market key shared by both directions of a pair.
pub type MarketKey = (Asset, Asset);

/// Who holds a market lock and since when.
#[derive(Debug, Clone)]
pub struct PairLock {
    /// Market being held.
    pub market: MarketKey,
    /// Order whose settlement or cancellation holds the lock.
    pub holder: OrderId,
    /// When the lock was acquired.
    pub acquired_at: Instant,
}

impl PairLock {
    /// Time held so far.
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

/// Guard releasing the market lock on drop.
pub struct PairGuard {
    _guard: OwnedMutexGuard<()>,
    holders: Arc<DashMap<MarketKey, PairLock>>,
    market: MarketKey,
}

impl PairGuard {
    /// Market this guard holds.
    pub fn market(&self) -> MarketKey {
        self.market
    }
}

impl Drop for PairGuard {
    fn drop(&mut self) {
        if let Some((_, lock)) = self.holders.remove(&self.market) {
            debug!(
                holder = %lock.holder,
                held_ms = lock.held_for().as_millis() as u64,
                "Pair lock released"
            );
        }
    }
}

/// Manager for per-market locks.
pub struct PairLockManager {
    /// One mutex per market, created on first use.
    locks: DashMap<MarketKey, Arc<Mutex<()>>>,
    /// Current holders by market.
    holders: Arc<DashMap<MarketKey, PairLock>>,
    /// How long to wait before giving up.
    acquisition_timeout: Duration,
}

impl PairLockManager {
    /// Create a new lock manager.
    pub fn new(acquisition_timeout: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            holders: Arc::new(DashMap::new()),
            acquisition_timeout,
        }
    }

    /// Acquire the lock for the market `pair` trades on.
    ///
    /// Fails with a retryable `ServiceUnavailable` if the lock is not
    /// obtained within the acquisition timeout.
    pub async fn acquire(&self, pair: AssetPair, holder: OrderId) -> Result<PairGuard> {
        let market = pair.market();
        let mutex = self
            .locks
            .entry(market)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let guard = match tokio::time::timeout(self.acquisition_timeout, mutex.lock_owned()).await
        {
            Ok(guard) => guard,
            Err(_) => {
                let current = self.holders.get(&market).map(|l| l.holder);
                warn!(
                    holder = %holder,
                    market = ?market,
                    current_holder = ?current,
                    "Pair lock acquisition timed out"
                );
                return Err(SwapError::ServiceUnavailable {
                    retry_after_ms: self.acquisition_timeout.as_millis() as u64,
                });
            }
        };

        self.holders.insert(
            market,
            PairLock {
                market,
                holder,
                acquired_at: Instant::now(),
            },
        );
        debug!(holder = %holder, market = ?market, "Pair lock acquired");

        Ok(PairGuard {
            _guard: guard,
            holders: self.holders.clone(),
            market,
        })
    }

    /// Current holder of a market, if any.
    pub fn holder(&self, market: &MarketKey) -> Option<PairLock> {
        self.holders.get(market).map(|l| l.clone())
    }

    /// Get count of held locks.
    pub fn active_lock_count(&self) -> usize {
        self.holders.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(from: Asset, to: Asset) -> AssetPair {
        AssetPair::new(from, to).unwrap()
    }

    #[tokio::test]
    async fn test_both_directions_share_a_lock() {
        let manager = PairLockManager::new(Duration::from_millis(50));
        let holder = OrderId::new();

        let guard = manager
            .acquire(pair(Asset::StableA, Asset::NativeToken), holder)
            .await
            .unwrap();
        assert_eq!(manager.active_lock_count(), 1);
        assert_eq!(manager.holder(&guard.market()).unwrap().holder, holder);

        let err = manager
            .acquire(pair(Asset::NativeToken, Asset::StableA), OrderId::new())
            .await
            .err()
            .unwrap();
        assert!(err.is_retryable());

        drop(guard);
        assert_eq!(manager.active_lock_count(), 0);
        assert!(manager
            .acquire(pair(Asset::NativeToken, Asset::StableA), OrderId::new())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_distinct_markets_do_not_block() {
        let manager = PairLockManager::new(Duration::from_millis(50));
        let _a = manager
            .acquire(pair(Asset::StableA, Asset::NativeToken), OrderId::new())
            .await
            .unwrap();
        let _b = manager
            .acquire(pair(Asset::StableA, Asset::StableB), OrderId::new())
            .await
            .unwrap();
        assert_eq!(manager.active_lock_count(), 2);
    }
}
