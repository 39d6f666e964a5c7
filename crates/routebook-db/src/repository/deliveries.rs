//! # Delivery Repository
//!
//! Deliveries, their append-only payment history and the outstanding
//! balance rows derived from them.
//!
//! ```text
//! deliveries            one row per order (UNIQUE order_id)
//!   └── delivery_payments   PK (delivery_id, sequence) = idempotency key
//! outstanding_payments  one row per order while remaining_balance > 0
//! ```

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use tracing::debug;

use routebook_core::{Delivery, OutstandingPayment, PaymentKind, PaymentRecord, PaymentStatus};

use super::money;
use crate::error::{DbError, DbResult};

// =============================================================================
// Row Types
// =============================================================================

#[derive(Debug, FromRow)]
struct DeliveryRow {
    id: String,
    order_id: String,
    shop_id: String,
    branch_id: String,
    salesman_id: Option<String>,
    total_amount: String,
    paid_amount: String,
    remaining_balance: String,
    payment_status: PaymentStatus,
    last_sequence: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DeliveryRow {
    fn into_delivery(self, payment_history: Vec<PaymentRecord>) -> DbResult<Delivery> {
        Ok(Delivery {
            total_amount: money("deliveries.total_amount", &self.total_amount)?,
            paid_amount: money("deliveries.paid_amount", &self.paid_amount)?,
            remaining_balance: money("deliveries.remaining_balance", &self.remaining_balance)?,
            id: self.id,
            order_id: self.order_id,
            shop_id: self.shop_id,
            branch_id: self.branch_id,
            salesman_id: self.salesman_id,
            payment_status: self.payment_status,
            last_sequence: self.last_sequence,
            payment_history,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct PaymentRow {
    sequence: i64,
    kind: PaymentKind,
    amount: String,
    paid_at: DateTime<Utc>,
    notes: Option<String>,
}

impl TryFrom<PaymentRow> for PaymentRecord {
    type Error = DbError;

    fn try_from(row: PaymentRow) -> DbResult<Self> {
        Ok(PaymentRecord {
            amount: money("delivery_payments.amount", &row.amount)?,
            sequence: row.sequence,
            kind: row.kind,
            paid_at: row.paid_at,
            notes: row.notes,
        })
    }
}

#[derive(Debug, FromRow)]
struct OutstandingRow {
    order_id: String,
    delivery_id: String,
    shop_id: String,
    branch_id: String,
    total_amount: String,
    paid_amount: String,
    remaining_balance: String,
    opened_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OutstandingRow> for OutstandingPayment {
    type Error = DbError;

    fn try_from(row: OutstandingRow) -> DbResult<Self> {
        Ok(OutstandingPayment {
            total_amount: money("outstanding_payments.total_amount", &row.total_amount)?,
            paid_amount: money("outstanding_payments.paid_amount", &row.paid_amount)?,
            remaining_balance: money(
                "outstanding_payments.remaining_balance",
                &row.remaining_balance,
            )?,
            order_id: row.order_id,
            delivery_id: row.delivery_id,
            shop_id: row.shop_id,
            branch_id: row.branch_id,
            opened_at: row.opened_at,
            updated_at: row.updated_at,
        })
    }
}

const OUTSTANDING_COLUMNS: &str = "order_id, delivery_id, shop_id, branch_id, total_amount, \
     paid_amount, remaining_balance, opened_at, updated_at";

// =============================================================================
// Repository
// =============================================================================

/// Repository for deliveries and collected cash.
#[derive(Debug, Clone)]
pub struct DeliveryRepository {
    pool: SqlitePool,
}

impl DeliveryRepository {
    /// Creates a new DeliveryRepository.
    pub fn new(pool: SqlitePool) -> Self {
        DeliveryRepository { pool }
    }

    pub async fn insert(&self, conn: &mut SqliteConnection, delivery: &Delivery) -> DbResult<()> {
        debug!(id = %delivery.id, order_id = %delivery.order_id, "Inserting delivery");

        sqlx::query(
            r#"
            INSERT INTO deliveries (
                id, order_id, shop_id, branch_id, salesman_id,
                total_amount, paid_amount, remaining_balance, payment_status,
                last_sequence, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(&delivery.id)
        .bind(&delivery.order_id)
        .bind(&delivery.shop_id)
        .bind(&delivery.branch_id)
        .bind(&delivery.salesman_id)
        .bind(delivery.total_amount.to_storage())
        .bind(delivery.paid_amount.to_storage())
        .bind(delivery.remaining_balance.to_storage())
        .bind(delivery.payment_status)
        .bind(delivery.last_sequence)
        .bind(delivery.created_at)
        .bind(delivery.updated_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Gets the delivery of an order with its full payment history.
    pub async fn get_by_order(&self, conn: &mut SqliteConnection, order_id: &str) -> DbResult<Option<Delivery>> {
        let row: Option<DeliveryRow> = sqlx::query_as(
            r#"
            SELECT
                id, order_id, shop_id, branch_id, salesman_id,
                total_amount, paid_amount, remaining_balance, payment_status,
                last_sequence, created_at, updated_at
            FROM deliveries
            WHERE order_id = ?1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&mut *conn)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let history = self.payment_history(conn, &row.id).await?;
        row.into_delivery(history).map(Some)
    }

    /// Gets the delivery of an order using a pooled connection.
    pub async fn get_by_order_id(&self, order_id: &str) -> DbResult<Option<Delivery>> {
        let mut conn = self.pool.acquire().await?;
        self.get_by_order(&mut conn, order_id).await
    }

    /// Writes the running amounts and the salesman back.
    pub async fn update(&self, conn: &mut SqliteConnection, delivery: &Delivery) -> DbResult<()> {
        debug!(
            id = %delivery.id,
            paid = %delivery.paid_amount,
            remaining = %delivery.remaining_balance,
            "Updating delivery"
        );

        let result = sqlx::query(
            r#"
            UPDATE deliveries SET
                salesman_id = ?2,
                total_amount = ?3,
                paid_amount = ?4,
                remaining_balance = ?5,
                payment_status = ?6,
                last_sequence = ?7,
                updated_at = ?8
            WHERE id = ?1
            "#,
        )
        .bind(&delivery.id)
        .bind(&delivery.salesman_id)
        .bind(delivery.total_amount.to_storage())
        .bind(delivery.paid_amount.to_storage())
        .bind(delivery.remaining_balance.to_storage())
        .bind(delivery.payment_status)
        .bind(delivery.last_sequence)
        .bind(delivery.updated_at)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Delivery", &delivery.id));
        }
        Ok(())
    }

    /// Appends one payment history row.
    ///
    /// Fails with `UniqueViolation` if the sequence is already stored.
    pub async fn insert_payment(
        &self,
        conn: &mut SqliteConnection,
        delivery_id: &str,
        record: &PaymentRecord,
    ) -> DbResult<()> {
        debug!(
            delivery_id = %delivery_id,
            sequence = record.sequence,
            kind = %record.kind,
            amount = %record.amount,
            "Inserting payment"
        );

        sqlx::query(
            r#"
            INSERT INTO delivery_payments (delivery_id, sequence, kind, amount, paid_at, notes)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(delivery_id)
        .bind(record.sequence)
        .bind(record.kind)
        .bind(record.amount.to_storage())
        .bind(record.paid_at)
        .bind(&record.notes)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Upserts the outstanding row while a balance remains, deletes it once
    /// the delivery is fully paid.
    pub async fn sync_outstanding(&self, conn: &mut SqliteConnection, delivery: &Delivery) -> DbResult<()> {
        match delivery.outstanding() {
            Some(open) => {
                debug!(order_id = %open.order_id, remaining = %open.remaining_balance, "Upserting outstanding balance");
                sqlx::query(
                    r#"
                    INSERT INTO outstanding_payments (
                        order_id, delivery_id, shop_id, branch_id,
                        total_amount, paid_amount, remaining_balance, opened_at, updated_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                    ON CONFLICT (order_id) DO UPDATE SET
                        total_amount = excluded.total_amount,
                        paid_amount = excluded.paid_amount,
                        remaining_balance = excluded.remaining_balance,
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(&open.order_id)
                .bind(&open.delivery_id)
                .bind(&open.shop_id)
                .bind(&open.branch_id)
                .bind(open.total_amount.to_storage())
                .bind(open.paid_amount.to_storage())
                .bind(open.remaining_balance.to_storage())
                .bind(open.opened_at)
                .bind(open.updated_at)
                .execute(&mut *conn)
                .await?;
            }
            None => {
                debug!(order_id = %delivery.order_id, "Clearing outstanding balance");
                sqlx::query("DELETE FROM outstanding_payments WHERE order_id = ?1")
                    .bind(&delivery.order_id)
                    .execute(&mut *conn)
                    .await?;
            }
        }
        Ok(())
    }

    pub async fn get_outstanding(
        &self,
        conn: &mut SqliteConnection,
        order_id: &str,
    ) -> DbResult<Option<OutstandingPayment>> {
        let row: Option<OutstandingRow> = sqlx::query_as(&format!(
            "SELECT {OUTSTANDING_COLUMNS} FROM outstanding_payments WHERE order_id = ?1"
        ))
        .bind(order_id)
        .fetch_optional(&mut *conn)
        .await?;

        row.map(OutstandingPayment::try_from).transpose()
    }

    /// Open balances of one shop, oldest first.
    pub async fn outstanding_for_shop(&self, shop_id: &str) -> DbResult<Vec<OutstandingPayment>> {
        let rows: Vec<OutstandingRow> = sqlx::query_as(&format!(
            "SELECT {OUTSTANDING_COLUMNS} FROM outstanding_payments WHERE shop_id = ?1 ORDER BY opened_at, order_id"
        ))
        .bind(shop_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(OutstandingPayment::try_from).collect()
    }

    async fn payment_history(&self, conn: &mut SqliteConnection, delivery_id: &str) -> DbResult<Vec<PaymentRecord>> {
        let rows: Vec<PaymentRow> = sqlx::query_as(
            r#"
            SELECT sequence, kind, amount, paid_at, notes
            FROM delivery_payments
            WHERE delivery_id = ?1
            ORDER BY sequence
            "#,
        )
        .bind(delivery_id)
        .fetch_all(&mut *conn)
        .await?;

        rows.into_iter().map(PaymentRecord::try_from).collect()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use crate::test_support::{assigned_in_db, seed_reference};
    use chrono::Utc;
    use routebook_core::delivery::PaymentRequest;
    use routebook_core::Money;

    #[tokio::test]
    async fn test_delivery_round_trip_with_history() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        seed_reference(&db).await;
        let order = assigned_in_db(&db, "order-1", 10_000).await;

        let mut delivery = Delivery::for_order(&order, "delivery-1".to_string(), Utc::now()).unwrap();
        let outcome = delivery
            .record_payment(PaymentRequest::new(1, Money::from_units(4000)), Utc::now())
            .unwrap();

        let repo = db.deliveries();
        let mut tx = db.begin().await.unwrap();
        repo.insert(&mut tx, &delivery).await.unwrap();
        repo.insert_payment(&mut tx, &delivery.id, outcome.record().unwrap())
            .await
            .unwrap();
        repo.sync_outstanding(&mut tx, &delivery).await.unwrap();
        tx.commit().await.unwrap();

        let loaded = repo.get_by_order_id("order-1").await.unwrap().unwrap();
        assert_eq!(loaded.paid_amount, Money::from_units(4000));
        assert_eq!(loaded.remaining_balance, Money::from_units(6000));
        assert_eq!(loaded.payment_status, PaymentStatus::Partial);
        assert_eq!(loaded.payment_history.len(), 1);
        assert_eq!(loaded.last_sequence, 1);

        let open = repo.outstanding_for_shop("shop-1").await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].remaining_balance, Money::from_units(6000));
    }

    #[tokio::test]
    async fn test_outstanding_row_removed_when_paid() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        seed_reference(&db).await;
        let order = assigned_in_db(&db, "order-1", 500).await;

        let mut delivery = Delivery::for_order(&order, "delivery-1".to_string(), Utc::now()).unwrap();
        let repo = db.deliveries();
        let mut conn = db.pool().acquire().await.unwrap();
        repo.insert(&mut conn, &delivery).await.unwrap();
        repo.sync_outstanding(&mut conn, &delivery).await.unwrap();
        assert!(repo.get_outstanding(&mut conn, "order-1").await.unwrap().is_some());

        delivery
            .record_payment(PaymentRequest::new(1, Money::from_units(500)), Utc::now())
            .unwrap();
        repo.update(&mut conn, &delivery).await.unwrap();
        repo.sync_outstanding(&mut conn, &delivery).await.unwrap();
        assert!(repo.get_outstanding(&mut conn, "order-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_payment_sequence_is_rejected() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        seed_reference(&db).await;
        let order = assigned_in_db(&db, "order-1", 500).await;

        let mut delivery = Delivery::for_order(&order, "delivery-1".to_string(), Utc::now()).unwrap();
        let outcome = delivery
            .record_payment(PaymentRequest::new(1, Money::from_units(100)), Utc::now())
            .unwrap();
        let record = outcome.record().unwrap();

        let repo = db.deliveries();
        let mut conn = db.pool().acquire().await.unwrap();
        repo.insert(&mut conn, &delivery).await.unwrap();
        repo.insert_payment(&mut conn, &delivery.id, record).await.unwrap();
        let err = repo.insert_payment(&mut conn, &delivery.id, record).await.unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));
    }
}
