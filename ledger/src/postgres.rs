//! PostgreSQL ledger store (feature `postgres`).
//!
//! Uses dynamic queries (sqlx::query) so the crate builds without a
//! DATABASE_URL. Schema lives in `migrations/0001_init.sql`.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use std::str::FromStr;

use swapsettle_common::{AccountId, Asset, Result, SwapError};

use crate::balance::AccountBalances;
use crate::store::LedgerStore;

/// Ledger backed by the `ledger_balances` table.
#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    /// Wrap an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create an account with the given balances; existing rows are kept.
    pub async fn open_account(&self, balances: &AccountBalances) -> Result<()> {
        for asset in Asset::ALL {
            sqlx::query(
                "INSERT INTO ledger_balances (account_id, asset, balance, updated_at) \
                 VALUES ($1, $2, $3, NOW()) \
                 ON CONFLICT (account_id, asset) DO NOTHING",
            )
            .bind(balances.account_id.as_str())
            .bind(asset.code())
            .bind(balances.get(asset))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        }
        Ok(())
    }
}

/// Map a driver error onto the exchange error type.
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> SwapError {
    match err {
        sqlx::Error::Database(db_err) if db_err.code().map(|c| c == "23505").unwrap_or(false) => {
            SwapError::conflict("row", db_err.message())
        }
        sqlx::Error::PoolTimedOut => SwapError::Timeout("ledger pool acquire".into()),
        other => SwapError::StorageUnavailable(other.to_string()),
    }
}

#[async_trait]
impl LedgerStore for PgLedger {
    async fn get_balance(&self, account: &AccountId, asset: Asset) -> Result<Decimal> {
        let row = sqlx::query(
            "SELECT balance FROM ledger_balances WHERE account_id = $1 AND asset = $2",
        )
        .bind(account.as_str())
        .bind(asset.code())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        match row {
            Some(row) => row.try_get("balance").map_err(map_sqlx_error),
            None => Err(SwapError::AccountNotFound(account.clone())),
        }
    }

    async fn get_balances(&self, account: &AccountId) -> Result<AccountBalances> {
        let rows = sqlx::query(
            "SELECT asset, balance, updated_at FROM ledger_balances WHERE account_id = $1",
        )
        .bind(account.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if rows.is_empty() {
            return Err(SwapError::AccountNotFound(account.clone()));
        }

        let mut balances = AccountBalances::zero(account.clone());
        for row in rows {
            let code: String = row.try_get("asset").map_err(map_sqlx_error)?;
            let asset = Asset::from_str(&code)?;
            let balance: Decimal = row.try_get("balance").map_err(map_sqlx_error)?;
            *balances.get_mut(asset) = balance;
            balances.updated_at = row.try_get("updated_at").map_err(map_sqlx_error)?;
        }
        Ok(balances)
    }

    async fn adjust_balance(
        &self,
        account: &AccountId,
        asset: Asset,
        expected: Decimal,
        delta: Decimal,
    ) -> Result<Decimal> {
        let next = expected + delta;
        if next.is_sign_negative() && !next.is_zero() {
            return Err(SwapError::InsufficientFunds {
                asset,
                required: (-delta).to_string(),
                available: expected.to_string(),
            });
        }

        let updated = sqlx::query(
            "UPDATE ledger_balances SET balance = balance + $4, updated_at = NOW() \
             WHERE account_id = $1 AND asset = $2 AND balance = $3 \
             RETURNING balance",
        )
        .bind(account.as_str())
        .bind(asset.code())
        .bind(expected)
        .bind(delta)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        match updated {
            Some(row) => row.try_get("balance").map_err(map_sqlx_error),
            None => {
                // Distinguish a lost race from a missing account.
                self.get_balance(account, asset).await?;
                Err(SwapError::conflict("balance", format!("{account}/{asset}")))
            }
        }
    }
}
