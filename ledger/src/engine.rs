//! Core ledger engine implementation.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, info, instrument, warn};

use swapsettle_common::time::constants;
use swapsettle_common::{with_timeout, AccountId, Amount, Asset, OrderId, Result, SwapError};

use crate::balance::{AccountBalances, BalanceChange, BalanceChangeType};
use crate::journal::{EntryPurpose, Journal, JournalEntry};
use crate::store::LedgerStore;

/// Applies debits and credits to a [`LedgerStore`] as compare-and-swap
/// adjustments against the value just read, journaling every change.
pub struct LedgerEngine {
    store: Arc<dyn LedgerStore>,
    journal: Arc<Journal>,
    operation_timeout: Duration,
    max_conflict_retries: u32,
}

impl LedgerEngine {
    /// Create a new ledger engine with default timing.
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            journal: Arc::new(Journal::new()),
            operation_timeout: constants::store_operation_timeout(),
            max_conflict_retries: constants::MAX_CONFLICT_RETRIES,
        }
    }

    /// Override the per-call deadline.
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Override how many compare-and-swap conflicts are absorbed.
    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries.max(1);
        self
    }

    /// The audit journal.
    pub fn journal(&self) -> &Arc<Journal> {
        &self.journal
    }

    /// Check if a movement for `order_id` with `purpose` was already applied
    /// by this engine.
    pub fn has_applied(&self, order_id: OrderId, purpose: EntryPurpose) -> bool {
        self.journal.count(order_id, purpose) > 0
    }

    /// Current balance of one asset.
    pub async fn balance(&self, account: &AccountId, asset: Asset) -> Result<Decimal> {
        with_timeout(
            self.operation_timeout,
            "ledger.get_balance",
            self.store.get_balance(account, asset),
        )
        .await
    }

    /// All balances of an account.
    pub async fn balances(&self, account: &AccountId) -> Result<AccountBalances> {
        with_timeout(
            self.operation_timeout,
            "ledger.get_balances",
            self.store.get_balances(account),
        )
        .await
    }

    /// Fail with `InsufficientFunds` unless `account` holds at least `amount`.
    pub async fn ensure_funds(&self, account: &AccountId, asset: Asset, amount: Amount) -> Result<()> {
        let available = self.balance(account, asset).await?;
        if available < amount.value() {
            return Err(SwapError::InsufficientFunds {
                asset,
                required: amount.to_string(),
                available: available.to_string(),
            });
        }
        Ok(())
    }

    /// Debit an account (reduce balance).
    #[instrument(skip(self))]
    pub async fn debit(
        &self,
        account: &AccountId,
        asset: Asset,
        amount: Amount,
        order_id: OrderId,
        purpose: EntryPurpose,
    ) -> Result<BalanceChange> {
        self.apply(account, asset, amount, BalanceChangeType::Debit, order_id, purpose)
            .await
    }

    /// Credit an account (increase balance).
    #[instrument(skip(self))]
    pub async fn credit(
        &self,
        account: &AccountId,
        asset: Asset,
        amount: Amount,
        order_id: OrderId,
        purpose: EntryPurpose,
    ) -> Result<BalanceChange> {
        self.apply(account, asset, amount, BalanceChangeType::Credit, order_id, purpose)
            .await
    }

    async fn apply(
        &self,
        account: &AccountId,
        asset: Asset,
        amount: Amount,
        change_type: BalanceChangeType,
        order_id: OrderId,
        purpose: EntryPurpose,
    ) -> Result<BalanceChange> {
        let delta = change_type.delta(amount.value());
        let mut attempt = 0;

        loop {
            attempt += 1;
            let before = self.balance(account, asset).await?;
            if change_type == BalanceChangeType::Debit && before < amount.value() {
                return Err(SwapError::InsufficientFunds {
                    asset,
                    required: amount.to_string(),
                    available: before.to_string(),
                });
            }

            let outcome = with_timeout(
                self.operation_timeout,
                "ledger.adjust_balance",
                self.store.adjust_balance(account, asset, before, delta),
            )
            .await;

            match outcome {
                Ok(after) => {
                    let change = BalanceChange {
                        account_id: account.clone(),
                        asset,
                        change_type,
                        amount: amount.value(),
                        balance_before: before,
                        balance_after: after,
                        timestamp: Utc::now(),
                    };
                    self.journal
                        .record(JournalEntry::from_change(order_id, purpose, &change));
                    info!(
                        order_id = %order_id,
                        purpose = %purpose,
                        balance_after = %after,
                        "Balance adjusted"
                    );
                    return Ok(change);
                }
                Err(SwapError::Conflict { .. }) if attempt < self.max_conflict_retries => {
                    debug!(attempt, "Balance moved concurrently, re-reading");
                    continue;
                }
                Err(err) => {
                    warn!(error = %err, attempt, "Balance adjustment failed");
                    return Err(err);
                }
            }
        }
    }
}
