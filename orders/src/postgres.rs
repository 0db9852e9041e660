//! PostgreSQL order store (feature `postgres`).
//!
//! Uses dynamic queries (sqlx::query) instead of compile-time checked
//! macros so the crate builds without a DATABASE_URL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use uuid::Uuid;

use swapsettle_common::{
    AccountId, Amount, Asset, AssetPair, ExchangeOrder, OrderId, OrderStatus, OrderUpdate, Result,
    SwapError, UnmirroredFill,
};

use crate::repository::OrderStore;

const ORDER_COLUMNS: &str = "id, owner, from_asset, to_asset, requested_amount, settled_amount, \
     status, version, escrow_confirmed, target_credited, cancelled_at, created_at, updated_at, \
     mirror_order_id, mirror_amount, mirror_order_version";

/// Order store backed by the `exchange_orders` table.
#[derive(Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    /// Wrap an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn map_sqlx_error(err: sqlx::Error) -> SwapError {
    match err {
        sqlx::Error::Database(db_err) if db_err.code().map(|c| c == "23505").unwrap_or(false) => {
            SwapError::conflict("order", db_err.message())
        }
        sqlx::Error::PoolTimedOut => SwapError::Timeout("order pool acquire".into()),
        other => SwapError::StorageUnavailable(other.to_string()),
    }
}

fn corrupt(column: &str, err: impl std::fmt::Display) -> SwapError {
    SwapError::StorageUnavailable(format!("corrupt exchange_orders.{column}: {err}"))
}

fn parse_order_row(row: &PgRow) -> Result<ExchangeOrder> {
    let id: Uuid = row.try_get("id").map_err(map_sqlx_error)?;
    let owner: String = row.try_get("owner").map_err(map_sqlx_error)?;
    let from_asset: String = row.try_get("from_asset").map_err(map_sqlx_error)?;
    let to_asset: String = row.try_get("to_asset").map_err(map_sqlx_error)?;
    let requested: Decimal = row.try_get("requested_amount").map_err(map_sqlx_error)?;
    let settled: Decimal = row.try_get("settled_amount").map_err(map_sqlx_error)?;
    let status: String = row.try_get("status").map_err(map_sqlx_error)?;
    let version: i64 = row.try_get("version").map_err(map_sqlx_error)?;
    let mirror_order_id: Option<Uuid> = row.try_get("mirror_order_id").map_err(map_sqlx_error)?;
    let mirror_amount: Option<Decimal> = row.try_get("mirror_amount").map_err(map_sqlx_error)?;
    let mirror_version: Option<i64> =
        row.try_get("mirror_order_version").map_err(map_sqlx_error)?;

    let unmirrored_fill = match (mirror_order_id, mirror_amount, mirror_version) {
        (Some(order_id), Some(amount), Some(order_version)) => Some(UnmirroredFill {
            order_id: OrderId::from_uuid(order_id),
            amount: Amount::from_decimal(amount).map_err(|e| corrupt("mirror_amount", e))?,
            order_version: u64::try_from(order_version)
                .map_err(|e| corrupt("mirror_order_version", e))?,
        }),
        (None, None, None) => None,
        _ => return Err(corrupt("mirror_order_id", "partially set owed fill")),
    };

    Ok(ExchangeOrder {
        id: OrderId::from_uuid(id),
        owner: AccountId::new(owner),
        from_asset: Asset::from_str(&from_asset).map_err(|e| corrupt("from_asset", e))?,
        to_asset: Asset::from_str(&to_asset).map_err(|e| corrupt("to_asset", e))?,
        requested_amount: Amount::from_decimal(requested)
            .map_err(|e| corrupt("requested_amount", e))?,
        settled_amount: Amount::from_decimal(settled).map_err(|e| corrupt("settled_amount", e))?,
        status: OrderStatus::from_str(&status).map_err(|e| corrupt("status", e))?,
        version: u64::try_from(version).map_err(|e| corrupt("version", e))?,
        escrow_confirmed: row.try_get("escrow_confirmed").map_err(map_sqlx_error)?,
        target_credited: row.try_get("target_credited").map_err(map_sqlx_error)?,
        cancelled_at: row
            .try_get::<Option<DateTime<Utc>>, _>("cancelled_at")
            .map_err(map_sqlx_error)?,
        created_at: row.try_get("created_at").map_err(map_sqlx_error)?,
        updated_at: row.try_get("updated_at").map_err(map_sqlx_error)?,
        unmirrored_fill,
    })
}

fn status_names(statuses: &[OrderStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

fn version_param(version: u64) -> Result<i64> {
    i64::try_from(version)
        .map_err(|_| SwapError::validation(format!("Version {version} out of range"), "version"))
}

type MirrorColumns = (Option<Uuid>, Option<Decimal>, Option<i64>);

fn mirror_params(fill: Option<UnmirroredFill>) -> Result<MirrorColumns> {
    match fill {
        Some(fill) => Ok((
            Some(*fill.order_id.as_uuid()),
            Some(fill.amount.value()),
            Some(version_param(fill.order_version)?),
        )),
        None => Ok((None, None, None)),
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn insert(&self, order: &ExchangeOrder) -> Result<()> {
        let (mirror_id, mirror_amount, mirror_version) = mirror_params(order.unmirrored_fill)?;
        sqlx::query(
            "INSERT INTO exchange_orders (id, owner, from_asset, to_asset, requested_amount, \
             settled_amount, status, version, escrow_confirmed, target_credited, cancelled_at, \
             created_at, updated_at, mirror_order_id, mirror_amount, mirror_order_version) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
        )
        .bind(order.id.as_uuid())
        .bind(order.owner.as_str())
        .bind(order.from_asset.code())
        .bind(order.to_asset.code())
        .bind(order.requested_amount.value())
        .bind(order.settled_amount.value())
        .bind(order.status.as_str())
        .bind(version_param(order.version)?)
        .bind(order.escrow_confirmed)
        .bind(order.target_credited)
        .bind(order.cancelled_at)
        .bind(order.created_at)
        .bind(order.updated_at)
        .bind(mirror_id)
        .bind(mirror_amount)
        .bind(mirror_version)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn get(&self, id: OrderId) -> Result<Option<ExchangeOrder>> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM exchange_orders WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.as_ref().map(parse_order_row).transpose()
    }

    async fn find_by_pair(
        &self,
        pair: AssetPair,
        statuses: &[OrderStatus],
    ) -> Result<Vec<ExchangeOrder>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM exchange_orders \
             WHERE from_asset = $1 AND to_asset = $2 AND status = ANY($3) \
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(pair.from.code())
        .bind(pair.to.code())
        .bind(status_names(statuses))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter().map(parse_order_row).collect()
    }

    async fn find_unmirrored(&self, pair: AssetPair) -> Result<Vec<ExchangeOrder>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM exchange_orders \
             WHERE from_asset = $1 AND to_asset = $2 AND mirror_order_id IS NOT NULL \
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(pair.from.code())
        .bind(pair.to.code())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter().map(parse_order_row).collect()
    }

    async fn find_by_status(&self, statuses: &[OrderStatus]) -> Result<Vec<ExchangeOrder>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM exchange_orders \
             WHERE status = ANY($1) ORDER BY created_at ASC, id ASC"
        ))
        .bind(status_names(statuses))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter().map(parse_order_row).collect()
    }

    async fn update_fields(
        &self,
        id: OrderId,
        expected_version: u64,
        update: &OrderUpdate,
    ) -> Result<ExchangeOrder> {
        let current = self.get(id).await?.ok_or(SwapError::OrderNotFound(id))?;
        if current.version != expected_version {
            return Err(SwapError::conflict("order", id));
        }
        let next = current.apply(update)?;
        let (mirror_id, mirror_amount, mirror_version) = mirror_params(next.unmirrored_fill)?;

        let row = sqlx::query(&format!(
            "UPDATE exchange_orders SET settled_amount = $3, status = $4, version = $5, \
             escrow_confirmed = $6, target_credited = $7, cancelled_at = $8, updated_at = $9, \
             mirror_order_id = $10, mirror_amount = $11, mirror_order_version = $12 \
             WHERE id = $1 AND version = $2 \
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(id.as_uuid())
        .bind(version_param(expected_version)?)
        .bind(next.settled_amount.value())
        .bind(next.status.as_str())
        .bind(version_param(next.version)?)
        .bind(next.escrow_confirmed)
        .bind(next.target_credited)
        .bind(next.cancelled_at)
        .bind(next.updated_at)
        .bind(mirror_id)
        .bind(mirror_amount)
        .bind(mirror_version)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        match row {
            Some(row) => parse_order_row(&row),
            None => Err(SwapError::conflict("order", id)),
        }
    }

    async fn delete(&self, id: OrderId, expected_version: u64) -> Result<()> {
        let result = sqlx::query("DELETE FROM exchange_orders WHERE id = $1 AND version = $2")
            .bind(id.as_uuid())
            .bind(version_param(expected_version)?)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return match self.get(id).await? {
                Some(_) => Err(SwapError::conflict("order", id)),
                None => Err(SwapError::OrderNotFound(id)),
            };
        }
        Ok(())
    }
}
