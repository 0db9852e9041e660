//! Account balance tracking.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use swapsettle_common::{AccountId, Asset};

/// Balances of one account across the three asset classes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalances {
    /// Account identifier.
    pub account_id: AccountId,
    /// Native token balance.
    pub native: Decimal,
    /// Stable asset balance on the first chain.
    pub stable_a: Decimal,
    /// Stable asset balance on the second chain.
    pub stable_b: Decimal,
    /// When any balance was last updated.
    pub updated_at: DateTime<Utc>,
}

impl AccountBalances {
    /// Create a new zero balance.
    pub fn zero(account_id: AccountId) -> Self {
        Self {
            account_id,
            native: Decimal::ZERO,
            stable_a: Decimal::ZERO,
            stable_b: Decimal::ZERO,
            updated_at: Utc::now(),
        }
    }

    /// Builder-style initial balance for one asset.
    pub fn with(mut self, asset: Asset, amount: Decimal) -> Self {
        *self.get_mut(asset) = amount;
        self
    }

    /// Balance of `asset`.
    pub fn get(&self, asset: Asset) -> Decimal {
        match asset {
            Asset::NativeToken => self.native,
            Asset::StableA => self.stable_a,
            Asset::StableB => self.stable_b,
        }
    }

    pub(crate) fn get_mut(&mut self, asset: Asset) -> &mut Decimal {
        match asset {
            Asset::NativeToken => &mut self.native,
            Asset::StableA => &mut self.stable_a,
            Asset::StableB => &mut self.stable_b,
        }
    }

    /// Check if account has sufficient funds of `asset`.
    pub fn has_sufficient_funds(&self, asset: Asset, amount: Decimal) -> bool {
        self.get(asset) >= amount
    }
}

/// A completed balance mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceChange {
    /// Account affected.
    pub account_id: AccountId,
    /// Asset affected.
    pub asset: Asset,
    /// Change type.
    pub change_type: BalanceChangeType,
    /// Amount changed (always positive).
    pub amount: Decimal,
    /// Balance before change.
    pub balance_before: Decimal,
    /// Balance after change.
    pub balance_after: Decimal,
    /// When the change occurred.
    pub timestamp: DateTime<Utc>,
}

/// Type of balance change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BalanceChangeType {
    /// Credit (increase).
    Credit,
    /// Debit (decrease).
    Debit,
}

impl BalanceChangeType {
    /// Signed delta for `amount`.
    pub fn delta(&self, amount: Decimal) -> Decimal {
        match self {
            BalanceChangeType::Credit => amount,
            BalanceChangeType::Debit => -amount,
        }
    }
}
