//! In-memory ledger store.
//!
//! Used for testing, the simulator and development without a database.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use swapsettle_common::{AccountId, Asset, Result, SwapError};

use crate::balance::AccountBalances;
use crate::store::LedgerStore;

/// DashMap-backed ledger with fault injection hooks.
#[derive(Default)]
pub struct MemoryLedger {
    accounts: DashMap<AccountId, AccountBalances>,
    failing_adjustments: AtomicU32,
    unavailable: AtomicBool,
    frozen: RwLock<HashSet<AccountId>>,
    latency: Mutex<Option<Duration>>,
}

impl MemoryLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace an account with the given balances.
    pub fn open_account(&self, balances: AccountBalances) {
        self.accounts.insert(balances.account_id.clone(), balances);
    }

    /// Sum of `asset` across every account.
    pub fn total(&self, asset: Asset) -> Decimal {
        self.accounts.iter().map(|entry| entry.value().get(asset)).sum()
    }

    /// Fail the next `count` balance adjustments with `StorageUnavailable`.
    pub fn fail_next_adjustments(&self, count: u32) {
        self.failing_adjustments.store(count, Ordering::SeqCst);
    }

    /// Fail adjustments to `account` until thawed. Reads still succeed.
    pub fn freeze_account(&self, account: &AccountId) {
        self.frozen.write().insert(account.clone());
    }

    /// Undo [`MemoryLedger::freeze_account`].
    pub fn thaw_account(&self, account: &AccountId) {
        self.frozen.write().remove(account);
    }

    /// Make every operation fail until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay every operation by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    async fn before_operation(&self) -> Result<()> {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SwapError::StorageUnavailable("ledger offline".into()));
        }
        Ok(())
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_adjustments
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn get_balance(&self, account: &AccountId, asset: Asset) -> Result<Decimal> {
        self.before_operation().await?;
        self.accounts
            .get(account)
            .map(|balances| balances.value().get(asset))
            .ok_or_else(|| SwapError::AccountNotFound(account.clone()))
    }

    async fn get_balances(&self, account: &AccountId) -> Result<AccountBalances> {
        self.before_operation().await?;
        self.accounts
            .get(account)
            .map(|balances| balances.value().clone())
            .ok_or_else(|| SwapError::AccountNotFound(account.clone()))
    }

    async fn adjust_balance(
        &self,
        account: &AccountId,
        asset: Asset,
        expected: Decimal,
        delta: Decimal,
    ) -> Result<Decimal> {
        self.before_operation().await?;
        if self.take_injected_failure() {
            return Err(SwapError::StorageUnavailable(format!(
                "injected failure adjusting {account} {asset}"
            )));
        }
        if self.frozen.read().contains(account) {
            return Err(SwapError::StorageUnavailable(format!("account {account} frozen")));
        }

        let mut entry = self
            .accounts
            .get_mut(account)
            .ok_or_else(|| SwapError::AccountNotFound(account.clone()))?;
        let balances = entry.value_mut();

        let current = balances.get(asset);
        if current != expected {
            return Err(SwapError::conflict("balance", format!("{account}/{asset}")));
        }
        let next = current + delta;
        if next.is_sign_negative() && !next.is_zero() {
            return Err(SwapError::InsufficientFunds {
                asset,
                required: (-delta).to_string(),
                available: current.to_string(),
            });
        }

        *balances.get_mut(asset) = next;
        balances.updated_at = Utc::now();
        Ok(next)
    }
}
