//! Ledger store port.
//!
//! The ledger itself is owned by an external collaborator; the exchange core
//! only reads balances and applies conditional adjustments.

use async_trait::async_trait;
use rust_decimal::Decimal;

use swapsettle_common::{AccountId, Asset, Result};

use crate::balance::AccountBalances;

/// Durable per-account balances for the three asset classes.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Current balance of `asset` held by `account`.
    ///
    /// Fails with `AccountNotFound` if the account is unknown.
    async fn get_balance(&self, account: &AccountId, asset: Asset) -> Result<Decimal>;

    /// All balances held by `account`.
    async fn get_balances(&self, account: &AccountId) -> Result<AccountBalances>;

    /// Apply `delta` to the balance of `asset` if it still equals `expected`.
    ///
    /// Returns the new balance. Fails with `Conflict` if the balance moved
    /// since it was read, and `InsufficientFunds` if the result would be
    /// negative.
    async fn adjust_balance(
        &self,
        account: &AccountId,
        asset: Asset,
        expected: Decimal,
        delta: Decimal,
    ) -> Result<Decimal>;
}
