//! # Order Repository
//!
//! Database operations for orders and their frozen line items.
//!
//! ## Order Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Order Lifecycle                                   │
//! │                                                                         │
//! │  1. CREATE DRAFT                                                       │
//! │     └── next_order_seq() → ORD-000042                                  │
//! │     └── insert() → orders row + order_items rows                       │
//! │                                                                         │
//! │  2. EDIT (draft only)                                                  │
//! │     └── replace_items() → delete + reinsert lines                      │
//! │     └── update() → new frozen totals                                   │
//! │                                                                         │
//! │  3. TRANSITIONS                                                        │
//! │     └── update() → status, payment fields, timestamps                  │
//! │                                                                         │
//! │  Orders are never deleted; cancellation is a status.                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use tracing::debug;

use routebook_core::{Order, OrderItem, OrderStatus, OrderTotals, PaymentMode, PaymentStatus, ReturnRecord};

use super::{money, percent};
use crate::error::{DbError, DbResult};

// =============================================================================
// Row Types
// =============================================================================

#[derive(Debug, FromRow)]
struct OrderRow {
    id: String,
    order_number: String,
    shop_id: String,
    booker_id: String,
    branch_id: String,
    status: OrderStatus,
    subtotal: String,
    total_discount: String,
    allowed_discount: String,
    line_unauthorized_discount: String,
    order_level_excess: String,
    unauthorized_discount: String,
    grand_total: String,
    booker_max_discount_amount: String,
    unauthorized_acknowledged: bool,
    payment_mode: Option<PaymentMode>,
    paid_amount: String,
    remaining_balance: String,
    payment_status: PaymentStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    submitted_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
}

impl OrderRow {
    fn into_order(self, items: Vec<OrderItem>) -> DbResult<Order> {
        let totals = OrderTotals {
            subtotal: money("orders.subtotal", &self.subtotal)?,
            total_discount: money("orders.total_discount", &self.total_discount)?,
            allowed_discount: money("orders.allowed_discount", &self.allowed_discount)?,
            line_unauthorized_discount: money(
                "orders.line_unauthorized_discount",
                &self.line_unauthorized_discount,
            )?,
            order_level_excess: money("orders.order_level_excess", &self.order_level_excess)?,
            unauthorized_discount: money("orders.unauthorized_discount", &self.unauthorized_discount)?,
            grand_total: money("orders.grand_total", &self.grand_total)?,
        };

        Ok(Order {
            id: self.id,
            order_number: self.order_number,
            shop_id: self.shop_id,
            booker_id: self.booker_id,
            branch_id: self.branch_id,
            status: self.status,
            items,
            totals,
            booker_max_discount_amount: money(
                "orders.booker_max_discount_amount",
                &self.booker_max_discount_amount,
            )?,
            unauthorized_acknowledged: self.unauthorized_acknowledged,
            payment_mode: self.payment_mode,
            paid_amount: money("orders.paid_amount", &self.paid_amount)?,
            remaining_balance: money("orders.remaining_balance", &self.remaining_balance)?,
            payment_status: self.payment_status,
            created_at: self.created_at,
            updated_at: self.updated_at,
            submitted_at: self.submitted_at,
            delivered_at: self.delivered_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ItemRow {
    product_id: String,
    product_name: String,
    category: String,
    quantity: i64,
    unit_price: String,
    discount_percent: String,
    line_total: String,
    discount_amount: String,
    final_amount: String,
    effective_max_discount: String,
    is_unauthorized_discount: bool,
    unauthorized_amount: String,
}

impl TryFrom<ItemRow> for OrderItem {
    type Error = DbError;

    fn try_from(row: ItemRow) -> DbResult<Self> {
        Ok(OrderItem {
            unit_price: money("order_items.unit_price", &row.unit_price)?,
            discount_percent: percent("order_items.discount_percent", &row.discount_percent)?,
            line_total: money("order_items.line_total", &row.line_total)?,
            discount_amount: money("order_items.discount_amount", &row.discount_amount)?,
            final_amount: money("order_items.final_amount", &row.final_amount)?,
            effective_max_discount: percent(
                "order_items.effective_max_discount",
                &row.effective_max_discount,
            )?,
            unauthorized_amount: money("order_items.unauthorized_amount", &row.unauthorized_amount)?,
            is_unauthorized_discount: row.is_unauthorized_discount,
            quantity: row.quantity,
            product_id: row.product_id,
            product_name: row.product_name,
            category: row.category,
        })
    }
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for order database operations.
#[derive(Debug, Clone)]
pub struct OrderRepository {
    pool: SqlitePool,
}

impl OrderRepository {
    /// Creates a new OrderRepository.
    pub fn new(pool: SqlitePool) -> Self {
        OrderRepository { pool }
    }

    /// Next value of the human-readable order sequence.
    ///
    /// Must run inside the inserting transaction; the UNIQUE constraint on
    /// `order_seq` rejects a racing writer.
    pub async fn next_order_seq(&self, conn: &mut SqliteConnection) -> DbResult<i64> {
        let seq: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(order_seq), 0) + 1 FROM orders")
            .fetch_one(&mut *conn)
            .await?;
        Ok(seq)
    }

    /// Inserts a new order with its items.
    pub async fn insert(&self, conn: &mut SqliteConnection, order: &Order, order_seq: i64) -> DbResult<()> {
        debug!(id = %order.id, order_number = %order.order_number, "Inserting order");

        let t = &order.totals;
        sqlx::query(
            r#"
            INSERT INTO orders (
                id, order_seq, order_number, shop_id, booker_id, branch_id, status,
                subtotal, total_discount, allowed_discount, line_unauthorized_discount,
                order_level_excess, unauthorized_discount, grand_total,
                booker_max_discount_amount, unauthorized_acknowledged,
                payment_mode, paid_amount, remaining_balance, payment_status,
                created_at, updated_at, submitted_at, delivered_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7,
                ?8, ?9, ?10, ?11,
                ?12, ?13, ?14,
                ?15, ?16,
                ?17, ?18, ?19, ?20,
                ?21, ?22, ?23, ?24
            )
            "#,
        )
        .bind(&order.id)
        .bind(order_seq)
        .bind(&order.order_number)
        .bind(&order.shop_id)
        .bind(&order.booker_id)
        .bind(&order.branch_id)
        .bind(order.status)
        .bind(t.subtotal.to_storage())
        .bind(t.total_discount.to_storage())
        .bind(t.allowed_discount.to_storage())
        .bind(t.line_unauthorized_discount.to_storage())
        .bind(t.order_level_excess.to_storage())
        .bind(t.unauthorized_discount.to_storage())
        .bind(t.grand_total.to_storage())
        .bind(order.booker_max_discount_amount.to_storage())
        .bind(order.unauthorized_acknowledged)
        .bind(order.payment_mode)
        .bind(order.paid_amount.to_storage())
        .bind(order.remaining_balance.to_storage())
        .bind(order.payment_status)
        .bind(order.created_at)
        .bind(order.updated_at)
        .bind(order.submitted_at)
        .bind(order.delivered_at)
        .execute(&mut *conn)
        .await?;

        self.insert_items(conn, &order.id, &order.items).await
    }

    /// Gets an order with its items.
    pub async fn get(&self, conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Order>> {
        let row: Option<OrderRow> = sqlx::query_as(
            r#"
            SELECT
                id, order_number, shop_id, booker_id, branch_id, status,
                subtotal, total_discount, allowed_discount, line_unauthorized_discount,
                order_level_excess, unauthorized_discount, grand_total,
                booker_max_discount_amount, unauthorized_acknowledged,
                payment_mode, paid_amount, remaining_balance, payment_status,
                created_at, updated_at, submitted_at, delivered_at
            FROM orders
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let items = self.get_items(conn, id).await?;
        row.into_order(items).map(Some)
    }

    /// Gets an order using a pooled connection.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Order>> {
        let mut conn = self.pool.acquire().await?;
        self.get(&mut conn, id).await
    }

    /// Gets an order or fails with `NotFound`.
    pub async fn require(&self, conn: &mut SqliteConnection, id: &str) -> DbResult<Order> {
        self.get(conn, id)
            .await?
            .ok_or_else(|| DbError::not_found("Order", id))
    }

    /// Writes status, frozen totals, payment fields and timestamps back.
    ///
    /// Items are not touched; see [`OrderRepository::replace_items`].
    pub async fn update(&self, conn: &mut SqliteConnection, order: &Order) -> DbResult<()> {
        debug!(id = %order.id, status = %order.status, "Updating order");

        let t = &order.totals;
        let result = sqlx::query(
            r#"
            UPDATE orders SET
                status = ?2,
                subtotal = ?3,
                total_discount = ?4,
                allowed_discount = ?5,
                line_unauthorized_discount = ?6,
                order_level_excess = ?7,
                unauthorized_discount = ?8,
                grand_total = ?9,
                unauthorized_acknowledged = ?10,
                payment_mode = ?11,
                paid_amount = ?12,
                remaining_balance = ?13,
                payment_status = ?14,
                updated_at = ?15,
                submitted_at = ?16,
                delivered_at = ?17
            WHERE id = ?1
            "#,
        )
        .bind(&order.id)
        .bind(order.status)
        .bind(t.subtotal.to_storage())
        .bind(t.total_discount.to_storage())
        .bind(t.allowed_discount.to_storage())
        .bind(t.line_unauthorized_discount.to_storage())
        .bind(t.order_level_excess.to_storage())
        .bind(t.unauthorized_discount.to_storage())
        .bind(t.grand_total.to_storage())
        .bind(order.unauthorized_acknowledged)
        .bind(order.payment_mode)
        .bind(order.paid_amount.to_storage())
        .bind(order.remaining_balance.to_storage())
        .bind(order.payment_status)
        .bind(order.updated_at)
        .bind(order.submitted_at)
        .bind(order.delivered_at)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Order", &order.id));
        }
        Ok(())
    }

    /// Replaces every line of a draft order.
    pub async fn replace_items(
        &self,
        conn: &mut SqliteConnection,
        order_id: &str,
        items: &[OrderItem],
    ) -> DbResult<()> {
        debug!(order_id = %order_id, count = items.len(), "Replacing order items");

        sqlx::query("DELETE FROM order_items WHERE order_id = ?1")
            .bind(order_id)
            .execute(&mut *conn)
            .await?;

        self.insert_items(conn, order_id, items).await
    }

    // -------------------------------------------------------------------------
    // Returns
    // -------------------------------------------------------------------------

    /// Stores a return. Returns `false` if its id is already stored.
    pub async fn insert_return(&self, conn: &mut SqliteConnection, record: &ReturnRecord) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO returns (
                id, order_id, shop_id, branch_id, total_value, reason, created_by, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&record.id)
        .bind(&record.order_id)
        .bind(&record.shop_id)
        .bind(&record.branch_id)
        .bind(record.total_value.to_storage())
        .bind(&record.reason)
        .bind(&record.created_by)
        .bind(record.created_at)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    // -------------------------------------------------------------------------
    // Items
    // -------------------------------------------------------------------------

    async fn insert_items(
        &self,
        conn: &mut SqliteConnection,
        order_id: &str,
        items: &[OrderItem],
    ) -> DbResult<()> {
        for (line_no, item) in items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO order_items (
                    order_id, line_no, product_id, product_name, category, quantity,
                    unit_price, discount_percent, line_total, discount_amount, final_amount,
                    effective_max_discount, is_unauthorized_discount, unauthorized_amount
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                "#,
            )
            .bind(order_id)
            .bind(line_no as i64)
            .bind(&item.product_id)
            .bind(&item.product_name)
            .bind(&item.category)
            .bind(item.quantity)
            .bind(item.unit_price.to_storage())
            .bind(item.discount_percent.to_storage())
            .bind(item.line_total.to_storage())
            .bind(item.discount_amount.to_storage())
            .bind(item.final_amount.to_storage())
            .bind(item.effective_max_discount.to_storage())
            .bind(item.is_unauthorized_discount)
            .bind(item.unauthorized_amount.to_storage())
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }

    async fn get_items(&self, conn: &mut SqliteConnection, order_id: &str) -> DbResult<Vec<OrderItem>> {
        let rows: Vec<ItemRow> = sqlx::query_as(
            r#"
            SELECT
                product_id, product_name, category, quantity,
                unit_price, discount_percent, line_total, discount_amount, final_amount,
                effective_max_discount, is_unauthorized_discount, unauthorized_amount
            FROM order_items
            WHERE order_id = ?1
            ORDER BY line_no
            "#,
        )
        .bind(order_id)
        .fetch_all(&mut *conn)
        .await?;

        rows.into_iter().map(OrderItem::try_from).collect()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
