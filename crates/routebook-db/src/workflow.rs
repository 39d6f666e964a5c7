//! # Order Workflow
//!
//! The transactional entry points used by the booker, KPO and salesman apps.
//!
//! ## One Operation = One Transaction
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                 record_delivery_payment(order, seq 1, 4000)             │
//! │                                                                         │
//! │  BEGIN                                                                  │
//! │   ├── load order + delivery                                             │
//! │   ├── Delivery::record_delivery_payment()   (routebook-core)            │
//! │   ├── INSERT delivery_payments (delivery, 1)                            │
//! │   ├── UPDATE deliveries                                                 │
//! │   ├── UPSERT / DELETE outstanding_payments                              │
//! │   ├── OrderStateMachine::mark_delivered()   (routebook-core)            │
//! │   ├── UPDATE orders                                                     │
//! │   └── ledger: SALE_DELIVERED:<order> unless already posted              │
//! │  COMMIT                                                                 │
//! │                                                                         │
//! │  Any error before COMMIT drops the transaction: nothing is written.     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Idempotency Keys
//! | Operation | Key |
//! |---|---|
//! | `create_order` | client-generated order id |
//! | payments and adjustments | (delivery id, sequence) |
//! | ledger postings | posting key |
//! | discount aggregate | order id |

use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::{debug, info, warn};
use uuid::Uuid;

use routebook_core::delivery::{PaymentOutcome, PaymentRequest};
use routebook_core::discounts::DiscountReset;
use routebook_core::ledger::{
    adjustment_entry, payment_entry, plan_duplicate_cleanup, posting_key, return_entry,
    sale_delivered_entry, CleanupPlan, PostingContext,
};
use routebook_core::totals::LineInput;
use routebook_core::validation::{validate_reference, validate_uuid};
use routebook_core::{
    format_order_number, CoreError, Delivery, LedgerEntry, Money, MonthKey, Order, OrderStateMachine,
    OrderStatus, OrderTotalsCalculator, PaymentRecord, Percent, Posting, ReturnRecord, SalesUser,
};

use crate::config::EngineConfig;
use crate::error::WorkflowResult;
use crate::pool::Database;
use crate::side_effects::SideTasks;

// =============================================================================
// Requests and Receipts
// =============================================================================

/// One requested line, referencing a product by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLineRequest {
    pub product_id: String,
    pub quantity: i64,
    pub discount_percent: Percent,
}

impl OrderLineRequest {
    pub fn new(product_id: impl Into<String>, quantity: i64, discount_percent: Percent) -> Self {
        OrderLineRequest {
            product_id: product_id.into(),
            quantity,
            discount_percent,
        }
    }
}

/// A new order as sent by the booker's device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    /// Client-generated UUID; retries with the same id return the same order.
    pub order_id: String,
    pub shop_id: String,
    pub booker_id: String,
    pub lines: Vec<OrderLineRequest>,
}

/// Result of a payment or adjustment.
#[derive(Debug, Clone)]
pub struct PaymentReceipt {
    pub outcome: PaymentOutcome,
    pub delivery: Delivery,
    /// Ledger entry recording the event, when it posts one.
    pub ledger_entry: Option<LedgerEntry>,
}

/// Result of a reconciliation run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    /// SALE_DELIVERED entries looked at.
    pub examined: usize,
    pub plan: CleanupPlan,
    /// Rows actually deleted (0 on a dry run).
    pub deleted: u64,
    pub dry_run: bool,
}

// =============================================================================
// Workflow
// =============================================================================

/// Transactional order-to-cash operations over a [`Database`].
#[derive(Debug, Clone)]
pub struct OrderWorkflow {
    db: Database,
    default_category_max: Percent,
    side_tasks: SideTasks,
}

impl OrderWorkflow {
    pub fn new(db: Database, default_category_max: Percent) -> Self {
        OrderWorkflow {
            db,
            default_category_max,
            side_tasks: SideTasks::new(),
        }
    }

    pub fn from_config(db: Database, config: &EngineConfig) -> Self {
        Self::new(db, config.default_category_max_discount)
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Waits for best-effort side tasks spawned so far.
    pub async fn settle(&self) {
        self.side_tasks.settle().await;
    }

    // -------------------------------------------------------------------------
    // Orders
    // -------------------------------------------------------------------------

    /// Prices and stores a draft order.
    ///
    /// Replaying a request with a known order id returns the stored order
    /// unchanged.
    pub async fn create_order(&self, request: CreateOrderRequest) -> WorkflowResult<Order> {
        validate_uuid(&request.order_id)?;
        validate_reference("shop_id", &request.shop_id)?;
        validate_reference("booker_id", &request.booker_id)?;

        let mut tx = self.db.begin().await?;

        if let Some(existing) = self.db.orders().get(&mut tx, &request.order_id).await? {
            if existing.booker_id != request.booker_id || existing.shop_id != request.shop_id {
                return Err(CoreError::invalid(
                    "order_id",
                    format!("order id {} is already used by another order", request.order_id),
                )
                .into());
            }
            debug!(order_id = %existing.id, "Create replayed; returning stored order");
            return Ok(existing);
        }

        let booker = self.require_user(&mut tx, &request.booker_id).await?;
        let shop = self
            .db
            .reference()
            .get_shop(&mut tx, &request.shop_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Shop", request.shop_id.clone()))?;
        if !shop.is_active {
            return Err(CoreError::invalid("shop_id", format!("shop {} is inactive", shop.id)).into());
        }

        let lines = self.resolve_lines(&mut tx, &request.lines).await?;
        let policy = self
            .db
            .reference()
            .load_policy(&mut tx, self.default_category_max)
            .await?;
        let priced = OrderTotalsCalculator::new(&policy).calculate(&lines, &booker)?;

        let seq = self.db.orders().next_order_seq(&mut tx).await?;
        let order = Order::new_draft(
            request.order_id,
            format_order_number(seq),
            &shop,
            &booker,
            priced,
            Utc::now(),
        );
        self.db.orders().insert(&mut tx, &order, seq).await?;
        tx.commit().await?;

        info!(
            order_id = %order.id,
            order_number = %order.order_number,
            grand_total = %order.grand_total(),
            unauthorized = %order.totals.unauthorized_discount,
            "Order created"
        );
        Ok(order)
    }

    /// Re-prices a draft order with new lines.
    ///
    /// The booker's amount cap stays the one snapshotted at creation.
    pub async fn update_order_items(&self, order_id: &str, lines: &[OrderLineRequest]) -> WorkflowResult<Order> {
        let mut tx = self.db.begin().await?;
        let mut order = self.db.orders().require(&mut tx, order_id).await?;

        let mut booker = self.require_user(&mut tx, &order.booker_id).await?;
        booker.max_discount_amount = order.booker_max_discount_amount;

        let inputs = self.resolve_lines(&mut tx, lines).await?;
        let policy = self
            .db
            .reference()
            .load_policy(&mut tx, self.default_category_max)
            .await?;
        let priced = OrderTotalsCalculator::new(&policy).calculate(&inputs, &booker)?;

        OrderStateMachine::reprice(&mut order, priced, Utc::now())?;
        self.db.orders().replace_items(&mut tx, &order.id, &order.items).await?;
        self.db.orders().update(&mut tx, &order).await?;
        tx.commit().await?;

        info!(order_id = %order.id, grand_total = %order.grand_total(), "Order items updated");
        Ok(order)
    }

    /// `draft → submitted`.
    ///
    /// On success the unauthorized discount is added to the booker's monthly
    /// aggregate by a side task.
    pub async fn submit_order(&self, order_id: &str, acknowledge_unauthorized: bool) -> WorkflowResult<Order> {
        let mut tx = self.db.begin().await?;
        let mut order = self.db.orders().require(&mut tx, order_id).await?;
        let shop = self.db.reference().get_shop(&mut tx, &order.shop_id).await?;

        OrderStateMachine::submit(&mut order, shop.as_ref(), acknowledge_unauthorized, Utc::now())?;
        self.db.orders().update(&mut tx, &order).await?;
        tx.commit().await?;

        info!(
            order_id = %order.id,
            unauthorized = %order.totals.unauthorized_discount,
            acknowledged = order.unauthorized_acknowledged,
            "Order submitted"
        );

        if order.totals.has_unauthorized_discount() {
            let db = self.db.clone();
            let submitted = order.clone();
            self.side_tasks.spawn("discount_aggregate", async move {
                count_unauthorized_discount(&db, &submitted).await
            });
        }
        Ok(order)
    }

    /// KPO decisions, administrative progression and cancellation.
    ///
    /// Entering `load_form_ready` or `assigned` opens the order's delivery.
    pub async fn transition_order(&self, order_id: &str, target: OrderStatus) -> WorkflowResult<Order> {
        let mut tx = self.db.begin().await?;
        let mut order = self.db.orders().require(&mut tx, order_id).await?;

        let from = order.status;
        self.apply_transition(&mut tx, &mut order, target).await?;
        tx.commit().await?;

        info!(order_id = %order.id, from = %from, to = %target, "Order status changed");
        Ok(order)
    }

    /// Moves the order to `assigned` and records the salesman on its delivery.
    pub async fn assign_order(&self, order_id: &str, salesman_id: &str) -> WorkflowResult<Delivery> {
        validate_reference("salesman_id", salesman_id)?;

        let mut tx = self.db.begin().await?;
        let mut order = self.db.orders().require(&mut tx, order_id).await?;
        self.require_user(&mut tx, salesman_id).await?;

        let mut delivery = self
            .apply_transition(&mut tx, &mut order, OrderStatus::Assigned)
            .await?
            .ok_or_else(|| CoreError::not_found("Delivery for order", order_id))?;
        delivery.salesman_id = Some(salesman_id.to_string());
        delivery.updated_at = Utc::now();
        self.db.deliveries().update(&mut tx, &delivery).await?;
        tx.commit().await?;

        info!(order_id = %order.id, salesman_id = %salesman_id, "Order assigned");
        Ok(delivery)
    }

    // -------------------------------------------------------------------------
    // Payments
    // -------------------------------------------------------------------------

    /// Cash collected at the door; marks the order delivered and posts the
    /// sale.
    ///
    /// Without an amount, or with one outside the remaining balance, nothing
    /// is written and the outcome proposes the full balance. Retrying with
    /// [`PaymentRequest::confirmed`] records it.
    pub async fn record_delivery_payment(
        &self,
        order_id: &str,
        request: PaymentRequest,
        recorded_by: &str,
    ) -> WorkflowResult<PaymentReceipt> {
        validate_reference("recorded_by", recorded_by)?;

        let mut tx = self.db.begin().await?;
        let mut order = self.db.orders().require(&mut tx, order_id).await?;
        let existing = self.db.deliveries().get_by_order(&mut tx, order_id).await?;

        if let Some(delivery) = &existing {
            if let Some(original) = delivery.find_payment(request.sequence) {
                debug!(order_id = %order_id, sequence = request.sequence, "Delivery payment replayed");
                let sale = self
                    .db
                    .ledger()
                    .find_sale_for_order(&mut tx, order_id)
                    .await?;
                return Ok(PaymentReceipt {
                    outcome: PaymentOutcome::Replayed(original.clone()),
                    delivery: delivery.clone(),
                    ledger_entry: sale,
                });
            }
        }

        if !order.status.is_deliverable() {
            return Err(CoreError::StatusGuard {
                order_id: order.id.clone(),
                current: order.status,
                required: OrderStatus::Assigned,
                operation: "recording the delivery payment".to_string(),
            }
            .into());
        }
        let mut delivery = existing.ok_or_else(|| CoreError::not_found("Delivery for order", order_id))?;

        let now = Utc::now();
        let outcome = delivery.record_delivery_payment(request, now)?;
        let record = match outcome {
            PaymentOutcome::Recorded(record) => record,
            pending => {
                return Ok(PaymentReceipt {
                    outcome: pending,
                    delivery,
                    ledger_entry: None,
                });
            }
        };

        self.store_payment(&mut tx, &delivery, &record).await?;
        OrderStateMachine::mark_delivered(&mut order, &delivery, now)?;
        self.db.orders().update(&mut tx, &order).await?;

        let sale = sale_delivered_entry(&order, &PostingContext::new(recorded_by, now))?;
        let posting = self.db.ledger().post(&mut tx, sale).await?;
        tx.commit().await?;

        info!(
            order_id = %order.id,
            delivery_id = %delivery.id,
            amount = %record.amount,
            remaining = %delivery.remaining_balance,
            payment_status = %delivery.payment_status,
            "Order delivered"
        );
        Ok(PaymentReceipt {
            outcome: PaymentOutcome::Recorded(record),
            delivery,
            ledger_entry: Some(posting.into_entry()),
        })
    }

    /// Cash collected later against an outstanding balance.
    ///
    /// The amount is required and must be positive; posts a PAYMENT entry.
    pub async fn collect_outstanding_payment(
        &self,
        order_id: &str,
        request: PaymentRequest,
        recorded_by: &str,
    ) -> WorkflowResult<PaymentReceipt> {
        validate_reference("recorded_by", recorded_by)?;

        let mut tx = self.db.begin().await?;
        let mut order = self.db.orders().require(&mut tx, order_id).await?;
        let mut delivery = self
            .db
            .deliveries()
            .get_by_order(&mut tx, order_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Delivery for order", order_id))?;

        if let Some(original) = delivery.find_payment(request.sequence).cloned() {
            let entry = self
                .db
                .ledger()
                .find_by_key(&mut tx, &posting_key::payment(order_id, request.sequence))
                .await?;
            return Ok(PaymentReceipt {
                outcome: PaymentOutcome::Replayed(original),
                delivery,
                ledger_entry: entry,
            });
        }

        if order.status != OrderStatus::Delivered {
            return Err(CoreError::StatusGuard {
                order_id: order.id.clone(),
                current: order.status,
                required: OrderStatus::Delivered,
                operation: "collecting an outstanding balance".to_string(),
            }
            .into());
        }
        if let Some(amount) = request.amount {
            if !amount.is_positive() {
                return Err(CoreError::invalid("amount", format!("payment {amount} must be positive")).into());
            }
        }

        let now = Utc::now();
        let outcome = delivery.record_payment(request, now)?;
        let record = outcome
            .record()
            .cloned()
            .ok_or_else(|| CoreError::invalid("amount", "payment amount is required"))?;

        self.store_payment(&mut tx, &delivery, &record).await?;
        order.apply_settlement(&delivery, now);
        self.db.orders().update(&mut tx, &order).await?;

        let entry = payment_entry(
            &order.id,
            &order.branch_id,
            record.amount,
            record.sequence,
            &PostingContext::new(recorded_by, now),
        )?;
        let posting = self.db.ledger().post(&mut tx, entry).await?;
        tx.commit().await?;

        info!(
            order_id = %order.id,
            amount = %record.amount,
            remaining = %delivery.remaining_balance,
            "Outstanding payment collected"
        );
        Ok(PaymentReceipt {
            outcome,
            delivery,
            ledger_entry: Some(posting.into_entry()),
        })
    }

    /// Lowers the collection recorded on a fully paid delivery.
    ///
    /// Reopens the outstanding balance and posts an ADJUSTMENT with the
    /// (negative) delta.
    pub async fn adjust_delivery_payment(
        &self,
        order_id: &str,
        sequence: i64,
        new_amount: Money,
        notes: Option<&str>,
        adjusted_by: &str,
    ) -> WorkflowResult<PaymentReceipt> {
        validate_reference("adjusted_by", adjusted_by)?;

        let mut tx = self.db.begin().await?;
        let mut order = self.db.orders().require(&mut tx, order_id).await?;
        let mut delivery = self
            .db
            .deliveries()
            .get_by_order(&mut tx, order_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Delivery for order", order_id))?;

        let now = Utc::now();
        let outcome = delivery.adjust_payment(sequence, new_amount, notes, now)?;
        let record = match outcome {
            PaymentOutcome::Recorded(record) => record,
            replayed => {
                let entry = self
                    .db
                    .ledger()
                    .find_by_key(&mut tx, &posting_key::adjustment(order_id, sequence))
                    .await?;
                return Ok(PaymentReceipt {
                    outcome: replayed,
                    delivery,
                    ledger_entry: entry,
                });
            }
        };

        self.store_payment(&mut tx, &delivery, &record).await?;
        order.apply_settlement(&delivery, now);
        self.db.orders().update(&mut tx, &order).await?;

        let entry = adjustment_entry(
            &order.id,
            &order.branch_id,
            record.amount,
            record.notes.as_deref(),
            record.sequence,
            &PostingContext::new(adjusted_by, now),
        )?;
        let posting = self.db.ledger().post(&mut tx, entry).await?;
        tx.commit().await?;

        info!(
            order_id = %order.id,
            delta = %record.amount,
            remaining = %delivery.remaining_balance,
            "Delivery payment adjusted"
        );
        Ok(PaymentReceipt {
            outcome: PaymentOutcome::Recorded(record),
            delivery,
            ledger_entry: Some(posting.into_entry()),
        })
    }

    // -------------------------------------------------------------------------
    // Discounts, Returns, Adjustments
    // -------------------------------------------------------------------------

    /// Zeroes one month of a booker's unauthorized discount.
    pub async fn reset_unauthorized_discount(
        &self,
        booker_id: &str,
        month: MonthKey,
        reset_by: &str,
    ) -> WorkflowResult<DiscountReset> {
        let mut tx = self.db.begin().await?;
        self.require_user(&mut tx, booker_id).await?;

        let mut aggregate = self.db.discounts().load(&mut tx, booker_id).await?;
        let reset = aggregate.reset(month, reset_by, Utc::now())?;
        self.db
            .discounts()
            .record_reset(&mut tx, &Uuid::new_v4().to_string(), booker_id, &reset)
            .await?;
        tx.commit().await?;

        info!(
            booker_id = %booker_id,
            month = %month,
            cleared = %reset.cleared_amount,
            orders = reset.cleared_order_ids.len(),
            reset_by = %reset_by,
            "Unauthorized discount reset"
        );
        Ok(reset)
    }

    /// Stores a return and posts its negative RETURN entry once.
    pub async fn record_return(&self, record: ReturnRecord) -> WorkflowResult<Posting> {
        validate_reference("shop_id", &record.shop_id)?;
        validate_reference("created_by", &record.created_by)?;

        let entry = return_entry(
            &record,
            &PostingContext::new(record.created_by.clone(), record.created_at),
        )?;

        let mut tx = self.db.begin().await?;
        self.db.orders().insert_return(&mut tx, &record).await?;
        let posting = self.db.ledger().post(&mut tx, entry).await?;
        tx.commit().await?;

        if posting.is_created() {
            info!(return_id = %record.id, value = %record.total_value, "Return posted");
        }
        Ok(posting)
    }

    /// Office correction of an order's cash, in its own sequence space.
    pub async fn post_ledger_adjustment(
        &self,
        order_id: &str,
        delta: Money,
        notes: Option<&str>,
        sequence: i64,
        created_by: &str,
    ) -> WorkflowResult<Posting> {
        validate_reference("created_by", created_by)?;
        if sequence <= 0 {
            return Err(CoreError::invalid("sequence", "must be positive").into());
        }

        let mut tx = self.db.begin().await?;
        let order = self.db.orders().require(&mut tx, order_id).await?;

        let mut entry = adjustment_entry(
            &order.id,
            &order.branch_id,
            delta,
            notes,
            sequence,
            &PostingContext::new(created_by, Utc::now()),
        )?;
        entry.posting_key = posting_key::manual_adjustment(&order.id, sequence);

        let posting = self.db.ledger().post(&mut tx, entry).await?;
        tx.commit().await?;

        if posting.is_created() {
            info!(order_id = %order.id, delta = %delta, "Ledger adjustment posted");
        }
        Ok(posting)
    }

    // -------------------------------------------------------------------------
    // Ledger Maintenance
    // -------------------------------------------------------------------------

    /// Stores ledger entries posted offline by devices.
    ///
    /// Returns how many were new. Duplicate sales are left for
    /// [`OrderWorkflow::reconcile_ledger`].
    pub async fn import_synced(&self, entries: &[LedgerEntry]) -> WorkflowResult<usize> {
        let mut tx = self.db.begin().await?;
        let mut imported = 0;
        for entry in entries {
            if self.db.ledger().import(&mut tx, entry).await? {
                imported += 1;
            }
        }
        tx.commit().await?;

        info!(received = entries.len(), imported, "Synced ledger entries imported");
        Ok(imported)
    }

    /// Deletes duplicate SALE_DELIVERED entries, keeping one per order.
    pub async fn reconcile_ledger(&self, branch_id: Option<&str>, dry_run: bool) -> WorkflowResult<ReconcileReport> {
        let mut tx = self.db.begin().await?;
        let sales = self.db.ledger().sale_entries(&mut tx, branch_id).await?;
        let plan = plan_duplicate_cleanup(&sales);

        let mut report = ReconcileReport {
            examined: sales.len(),
            plan,
            deleted: 0,
            dry_run,
        };

        if report.plan.is_empty() {
            info!(examined = report.examined, "Ledger has no duplicate sales");
            return Ok(report);
        }

        for id in &report.plan.delete {
            warn!(entry_id = %id, dry_run, "Duplicate SALE_DELIVERED entry");
        }

        if !dry_run {
            report.deleted = self.db.ledger().delete_sales(&mut tx, &report.plan.delete).await?;
            tx.commit().await?;
        }

        info!(
            examined = report.examined,
            duplicates = report.plan.delete.len(),
            deleted = report.deleted,
            dry_run,
            "Ledger reconciliation finished"
        );
        Ok(report)
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    async fn require_user(&self, conn: &mut SqliteConnection, id: &str) -> WorkflowResult<SalesUser> {
        self.db
            .reference()
            .get_user(conn, id)
            .await?
            .ok_or_else(|| CoreError::not_found("SalesUser", id).into())
    }

    async fn resolve_lines(
        &self,
        conn: &mut SqliteConnection,
        lines: &[OrderLineRequest],
    ) -> WorkflowResult<Vec<LineInput>> {
        let mut inputs = Vec::with_capacity(lines.len());
        for line in lines {
            let product = self
                .db
                .reference()
                .get_product(conn, &line.product_id)
                .await?
                .ok_or_else(|| CoreError::not_found("Product", line.product_id.clone()))?;
            inputs.push(LineInput::new(product, line.quantity, line.discount_percent));
        }
        Ok(inputs)
    }

    /// Applies a transition and opens the delivery when the order becomes
    /// deliverable. Returns the order's delivery if it has one.
    async fn apply_transition(
        &self,
        conn: &mut SqliteConnection,
        order: &mut Order,
        target: OrderStatus,
    ) -> WorkflowResult<Option<Delivery>> {
        let now = Utc::now();
        OrderStateMachine::transition(order, target, now)?;
        self.db.orders().update(conn, order).await?;

        if let Some(delivery) = self.db.deliveries().get_by_order(conn, &order.id).await? {
            return Ok(Some(delivery));
        }
        if !target.is_deliverable() {
            return Ok(None);
        }

        let delivery = Delivery::for_order(order, Uuid::new_v4().to_string(), now)?;
        self.db.deliveries().insert(conn, &delivery).await?;
        debug!(order_id = %order.id, delivery_id = %delivery.id, "Delivery opened");
        Ok(Some(delivery))
    }

    async fn store_payment(
        &self,
        conn: &mut SqliteConnection,
        delivery: &Delivery,
        record: &PaymentRecord,
    ) -> WorkflowResult<()> {
        let deliveries = self.db.deliveries();
        deliveries.insert_payment(conn, &delivery.id, record).await?;
        deliveries.update(conn, delivery).await?;
        deliveries.sync_outstanding(conn, delivery).await?;
        Ok(())
    }
}

/// Attempts made by the discount side task before it gives up.
const DISCOUNT_COUNT_ATTEMPTS: u32 = 5;

/// Adds a submitted order's unauthorized discount to its booker's month,
/// retrying while another writer holds the database lock.
async fn count_unauthorized_discount(db: &Database, order: &Order) -> WorkflowResult<()> {
    let mut attempt = 1;
    loop {
        match try_count_unauthorized_discount(db, order).await {
            Err(e) if e.is_busy() && attempt < DISCOUNT_COUNT_ATTEMPTS => {
                warn!(order_id = %order.id, attempt, error = %e, "Discount aggregate busy, retrying");
                tokio::time::sleep(Duration::from_millis(50 * u64::from(attempt))).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

/// Idempotent per order: the contribution row is keyed by order id and the
/// month total is recomputed from those rows in the same transaction.
async fn try_count_unauthorized_discount(db: &Database, order: &Order) -> WorkflowResult<()> {
    let mut tx = db.begin().await?;
    let discounts = db.discounts();

    let mut aggregate = discounts.load(&mut tx, &order.booker_id).await?;
    if !aggregate.record(order)? {
        debug!(order_id = %order.id, "Unauthorized discount already counted");
        return Ok(());
    }

    let month = MonthKey::of(order.created_at);
    let inserted = discounts
        .insert_contribution(
            &mut tx,
            &order.booker_id,
            month,
            &order.id,
            order.totals.unauthorized_discount,
            Utc::now(),
        )
        .await?;
    if !inserted {
        return Ok(());
    }
    let month_total = discounts.refresh_month_total(&mut tx, &order.booker_id, month).await?;
    tx.commit().await?;

    info!(
        booker_id = %order.booker_id,
        order_id = %order.id,
        month = %month,
        amount = %order.totals.unauthorized_discount,
        month_total = %month_total,
        "Unauthorized discount counted"
    );
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
