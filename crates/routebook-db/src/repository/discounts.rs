//! # Unauthorized Discount Repository
//!
//! Stores the per-booker monthly unauthorized discount aggregate.
//!
//! ```text
//! booker_discount_months   (booker, YYYY-MM) → sum of uncleared orders
//! booker_discount_orders   one row per counted order, PK order_id
//!                          cleared_by_reset set when a reset zeroed it
//! discount_resets          audit trail, cleared order ids as JSON
//! ```
//!
//! The aggregate is rebuilt with [`BookerDiscountAggregate::from_parts`] so
//! the counting rules stay in `routebook-core`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use tracing::debug;

use routebook_core::discounts::{DiscountReset, MonthlyDiscount};
use routebook_core::{BookerDiscountAggregate, Money, MonthKey};

use super::money;
use crate::error::{DbError, DbResult};

fn month_key(column: &str, raw: &str) -> DbResult<MonthKey> {
    raw.parse().map_err(|_| DbError::corrupt(column, raw))
}

#[derive(Debug, FromRow)]
struct ResetRow {
    month: String,
    reset_by: String,
    reset_at: DateTime<Utc>,
    cleared_amount: String,
    cleared_order_ids: String,
}

impl TryFrom<ResetRow> for DiscountReset {
    type Error = DbError;

    fn try_from(row: ResetRow) -> DbResult<Self> {
        let cleared_order_ids: Vec<String> = serde_json::from_str(&row.cleared_order_ids)
            .map_err(|_| DbError::corrupt("discount_resets.cleared_order_ids", &row.cleared_order_ids))?;

        Ok(DiscountReset {
            month: month_key("discount_resets.month", &row.month)?,
            reset_by: row.reset_by,
            reset_at: row.reset_at,
            cleared_amount: money("discount_resets.cleared_amount", &row.cleared_amount)?,
            cleared_order_ids,
        })
    }
}

/// Repository for unauthorized discount aggregates.
#[derive(Debug, Clone)]
pub struct DiscountRepository {
    pool: SqlitePool,
}

impl DiscountRepository {
    /// Creates a new DiscountRepository.
    pub fn new(pool: SqlitePool) -> Self {
        DiscountRepository { pool }
    }

    /// Loads a booker's aggregate: live months, every counted order and the
    /// reset history.
    pub async fn load(&self, conn: &mut SqliteConnection, booker_id: &str) -> DbResult<BookerDiscountAggregate> {
        let month_rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT month, amount FROM booker_discount_months WHERE booker_id = ?1",
        )
        .bind(booker_id)
        .fetch_all(&mut *conn)
        .await?;

        let mut months: BTreeMap<MonthKey, MonthlyDiscount> = BTreeMap::new();
        for (month, amount) in month_rows {
            months.insert(
                month_key("booker_discount_months.month", &month)?,
                MonthlyDiscount {
                    amount: money("booker_discount_months.amount", &amount)?,
                    order_ids: Vec::new(),
                },
            );
        }

        let order_rows: Vec<(String, String, Option<String>)> = sqlx::query_as(
            r#"
            SELECT order_id, month, cleared_by_reset
            FROM booker_discount_orders
            WHERE booker_id = ?1
            ORDER BY counted_at, order_id
            "#,
        )
        .bind(booker_id)
        .fetch_all(&mut *conn)
        .await?;

        let mut counted = Vec::with_capacity(order_rows.len());
        for (order_id, month, cleared_by_reset) in order_rows {
            if cleared_by_reset.is_none() {
                let key = month_key("booker_discount_orders.month", &month)?;
                months.entry(key).or_default().order_ids.push(order_id.clone());
            }
            counted.push(order_id);
        }

        let reset_rows: Vec<ResetRow> = sqlx::query_as(
            r#"
            SELECT month, reset_by, reset_at, cleared_amount, cleared_order_ids
            FROM discount_resets
            WHERE booker_id = ?1
            ORDER BY reset_at, id
            "#,
        )
        .bind(booker_id)
        .fetch_all(&mut *conn)
        .await?;
        let resets = reset_rows
            .into_iter()
            .map(DiscountReset::try_from)
            .collect::<DbResult<Vec<_>>>()?;

        debug!(booker_id = %booker_id, months = months.len(), "Loaded discount aggregate");
        Ok(BookerDiscountAggregate::from_parts(booker_id, months, counted, resets))
    }

    /// Loads an aggregate using a pooled connection.
    pub async fn load_for_booker(&self, booker_id: &str) -> DbResult<BookerDiscountAggregate> {
        let mut conn = self.pool.acquire().await?;
        self.load(&mut conn, booker_id).await
    }

    /// Marks an order as counted. Returns `false` if it already was.
    pub async fn insert_contribution(
        &self,
        conn: &mut SqliteConnection,
        booker_id: &str,
        month: MonthKey,
        order_id: &str,
        amount: Money,
        counted_at: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO booker_discount_orders (order_id, booker_id, month, amount, counted_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(order_id)
        .bind(booker_id)
        .bind(month.to_string())
        .bind(amount.to_storage())
        .bind(counted_at)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Recomputes a month's total from its uncleared contribution rows and
    /// stores it. Returns the new total.
    ///
    /// The total is always derived from `booker_discount_orders`, so two
    /// submissions counted one after the other can never overwrite each
    /// other's amount.
    pub async fn refresh_month_total(
        &self,
        conn: &mut SqliteConnection,
        booker_id: &str,
        month: MonthKey,
    ) -> DbResult<Money> {
        let amounts: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT amount FROM booker_discount_orders
            WHERE booker_id = ?1 AND month = ?2 AND cleared_by_reset IS NULL
            "#,
        )
        .bind(booker_id)
        .bind(month.to_string())
        .fetch_all(&mut *conn)
        .await?;

        let total = amounts
            .iter()
            .map(|(raw,)| money("booker_discount_orders.amount", raw))
            .collect::<DbResult<Vec<Money>>>()?
            .into_iter()
            .sum::<Money>();

        debug!(booker_id = %booker_id, month = %month, amount = %total, "Refreshing month total");

        sqlx::query(
            r#"
            INSERT INTO booker_discount_months (booker_id, month, amount)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (booker_id, month) DO UPDATE SET amount = excluded.amount
            "#,
        )
        .bind(booker_id)
        .bind(month.to_string())
        .bind(total.to_storage())
        .execute(&mut *conn)
        .await?;

        Ok(total)
    }

    /// Persists a reset: audit row, zeroed month, cleared order markers.
    ///
    /// Cleared orders keep their row so they are never counted again.
    pub async fn record_reset(
        &self,
        conn: &mut SqliteConnection,
        reset_id: &str,
        booker_id: &str,
        reset: &DiscountReset,
    ) -> DbResult<()> {
        let cleared_ids = serde_json::to_string(&reset.cleared_order_ids)
            .map_err(|e| DbError::Internal(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO discount_resets (id, booker_id, month, reset_by, reset_at, cleared_amount, cleared_order_ids)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(reset_id)
        .bind(booker_id)
        .bind(reset.month.to_string())
        .bind(&reset.reset_by)
        .bind(reset.reset_at)
        .bind(reset.cleared_amount.to_storage())
        .bind(cleared_ids)
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            r#"
            UPDATE booker_discount_orders
            SET cleared_by_reset = ?1
            WHERE booker_id = ?2 AND month = ?3 AND cleared_by_reset IS NULL
            "#,
        )
        .bind(reset_id)
        .bind(booker_id)
        .bind(reset.month.to_string())
        .execute(&mut *conn)
        .await?;

        self.refresh_month_total(conn, booker_id, reset.month).await?;
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
