//! # Delivery Payment Reconciliation
//!
//! Turns cash collected at and after delivery into a running balance.
//!
//! ## Payment Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Delivery total 10000                                                   │
//! │                                                                         │
//! │  seq 1  COLLECTION  +4000   paid  4000  remaining 6000  PARTIAL        │
//! │  seq 2  COLLECTION  +6000   paid 10000  remaining    0  PAID           │
//! │  seq 3  ADJUSTMENT  -3000   paid  7000  remaining 3000  PARTIAL        │
//! │                                                                         │
//! │  Σ history.amount == paid          paid + remaining == total           │
//! │  OutstandingPayment exists  ⇔  remaining > 0                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Idempotency
//! Every payment carries a client sequence number. `(delivery id, sequence)`
//! identifies the payment: replaying an applied sequence returns the original
//! record and changes nothing. New sequences must be greater than the last
//! applied one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::status::OrderStatus;
use crate::types::Order;
use crate::validation::{normalize_optional_notes, validate_notes};

// =============================================================================
// Payment Status
// =============================================================================

/// Settlement state of a delivery (and of its order once delivered).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Unpaid,
    Partial,
    Paid,
}

impl PaymentStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "UNPAID",
            PaymentStatus::Partial => "PARTIAL",
            PaymentStatus::Paid => "PAID",
        }
    }

    /// Derives the status from the paid amount against the total.
    pub fn for_amounts(paid: Money, total: Money) -> Self {
        if paid >= total {
            PaymentStatus::Paid
        } else if paid.is_positive() {
            PaymentStatus::Partial
        } else {
            PaymentStatus::Unpaid
        }
    }
}

impl Default for PaymentStatus {
    fn default() -> Self {
        PaymentStatus::Unpaid
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "UNPAID" => Ok(PaymentStatus::Unpaid),
            "PARTIAL" => Ok(PaymentStatus::Partial),
            "PAID" => Ok(PaymentStatus::Paid),
            other => Err(CoreError::invalid(
                "payment_status",
                format!("unknown payment status '{other}'"),
            )),
        }
    }
}

// =============================================================================
// Payment History
// =============================================================================

/// Kind of a payment history row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentKind {
    /// Cash received from the shop.
    Collection,
    /// Correction of an over-recorded collection (signed delta).
    Adjustment,
}

impl PaymentKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            PaymentKind::Collection => "COLLECTION",
            PaymentKind::Adjustment => "ADJUSTMENT",
        }
    }
}

impl fmt::Display for PaymentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "COLLECTION" => Ok(PaymentKind::Collection),
            "ADJUSTMENT" => Ok(PaymentKind::Adjustment),
            other => Err(CoreError::invalid("kind", format!("unknown payment kind '{other}'"))),
        }
    }
}

/// One applied payment. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PaymentRecord {
    pub sequence: i64,
    pub kind: PaymentKind,
    /// Collected amount, or the signed delta of an adjustment.
    pub amount: Money,
    #[ts(as = "String")]
    pub paid_at: DateTime<Utc>,
    pub notes: Option<String>,
}

// =============================================================================
// Requests and Outcomes
// =============================================================================

/// A payment as submitted by the salesman's device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub sequence: i64,
    /// `None` asks for the full remaining balance.
    pub amount: Option<Money>,
    pub notes: Option<String>,
    /// Caller confirmed a proposed full-balance amount.
    pub confirm_full: bool,
}

impl PaymentRequest {
    pub fn new(sequence: i64, amount: Money) -> Self {
        PaymentRequest {
            sequence,
            amount: Some(amount),
            notes: None,
            confirm_full: false,
        }
    }

    /// A request without an amount.
    pub fn full_balance(sequence: i64) -> Self {
        PaymentRequest {
            sequence,
            amount: None,
            notes: None,
            confirm_full: false,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Marks the request as confirmed for the full remaining balance.
    pub fn confirmed(mut self) -> Self {
        self.confirm_full = true;
        self
    }
}

/// Result of applying a payment request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PaymentOutcome {
    /// Newly applied.
    Recorded(PaymentRecord),
    /// Sequence was already applied; this is the original record.
    Replayed(PaymentRecord),
    /// Nothing applied. The caller must confirm `proposed` and retry.
    NeedsConfirmation {
        proposed: Money,
        requested: Option<Money>,
    },
}

impl PaymentOutcome {
    /// The applied record, for both fresh and replayed payments.
    pub fn record(&self) -> Option<&PaymentRecord> {
        match self {
            PaymentOutcome::Recorded(record) | PaymentOutcome::Replayed(record) => Some(record),
            PaymentOutcome::NeedsConfirmation { .. } => None,
        }
    }

    #[inline]
    pub fn is_new(&self) -> bool {
        matches!(self, PaymentOutcome::Recorded(_))
    }
}

// =============================================================================
// Outstanding Payment
// =============================================================================

/// Open balance of a delivered order. Exists only while remaining > 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OutstandingPayment {
    pub order_id: String,
    pub delivery_id: String,
    pub shop_id: String,
    pub branch_id: String,
    pub total_amount: Money,
    pub paid_amount: Money,
    pub remaining_balance: Money,
    /// When the balance was first left open (the delivery date).
    #[ts(as = "String")]
    pub opened_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Delivery
// =============================================================================

/// The delivery of one order and the cash collected against it.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Delivery {
    pub id: String,
    pub order_id: String,
    pub shop_id: String,
    pub branch_id: String,
    pub salesman_id: Option<String>,
    /// Order grand total at delivery time.
    pub total_amount: Money,
    pub paid_amount: Money,
    pub remaining_balance: Money,
    pub payment_status: PaymentStatus,
    /// Highest applied payment sequence (0 = none).
    pub last_sequence: i64,
    pub payment_history: Vec<PaymentRecord>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Delivery {
    /// Opens the delivery of a deliverable order.
    pub fn for_order(order: &Order, id: String, now: DateTime<Utc>) -> CoreResult<Delivery> {
        if !order.status.is_deliverable() {
            return Err(CoreError::StatusGuard {
                order_id: order.id.clone(),
                current: order.status,
                required: OrderStatus::LoadFormReady,
                operation: "opening a delivery".to_string(),
            });
        }

        let total = order.grand_total();
        Ok(Delivery {
            id,
            order_id: order.id.clone(),
            shop_id: order.shop_id.clone(),
            branch_id: order.branch_id.clone(),
            salesman_id: None,
            total_amount: total,
            paid_amount: Money::zero(),
            remaining_balance: total,
            payment_status: PaymentStatus::for_amounts(Money::zero(), total),
            last_sequence: 0,
            payment_history: Vec::new(),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn with_salesman(mut self, salesman_id: impl Into<String>) -> Self {
        self.salesman_id = Some(salesman_id.into());
        self
    }

    /// Applied payment with this sequence, if any.
    pub fn find_payment(&self, sequence: i64) -> Option<&PaymentRecord> {
        self.payment_history.iter().find(|p| p.sequence == sequence)
    }

    /// Strict collection: `0 ≤ amount ≤ remaining`.
    ///
    /// ## Errors
    /// - `InvalidInput` when the amount is missing or the sequence is stale
    /// - `AmountOutOfRange` when the amount is outside the remaining balance
    pub fn record_payment(&mut self, request: PaymentRequest, now: DateTime<Utc>) -> CoreResult<PaymentOutcome> {
        if let Some(original) = self.replayed(request.sequence)? {
            return Ok(PaymentOutcome::Replayed(original));
        }

        let amount = request
            .amount
            .ok_or_else(|| CoreError::invalid("amount", "payment amount is required"))?;
        self.check_collection_range(amount)?;
        let notes = normalize_optional_notes(request.notes.as_deref())?;

        Ok(PaymentOutcome::Recorded(self.apply(
            request.sequence,
            PaymentKind::Collection,
            amount,
            notes,
            now,
        )))
    }

    /// Collection at the door, defaulting to the full remaining balance.
    ///
    /// ```text
    /// amount in range            → Recorded
    /// amount missing/out of range, not confirmed → NeedsConfirmation { proposed }
    /// amount missing/out of range, confirmed     → Recorded(full remaining)
    /// ```
    pub fn record_delivery_payment(
        &mut self,
        request: PaymentRequest,
        now: DateTime<Utc>,
    ) -> CoreResult<PaymentOutcome> {
        if let Some(original) = self.replayed(request.sequence)? {
            return Ok(PaymentOutcome::Replayed(original));
        }

        let amount = match request.amount {
            Some(amount) if self.check_collection_range(amount).is_ok() => amount,
            _ if request.confirm_full => self.remaining_balance,
            requested => {
                return Ok(PaymentOutcome::NeedsConfirmation {
                    proposed: self.remaining_balance,
                    requested,
                })
            }
        };
        let notes = normalize_optional_notes(request.notes.as_deref())?;

        Ok(PaymentOutcome::Recorded(self.apply(
            request.sequence,
            PaymentKind::Collection,
            amount,
            notes,
            now,
        )))
    }

    /// Lowers the recorded collection of a fully paid delivery.
    ///
    /// `0 ≤ new_amount < paid`, notes required. The history row carries the
    /// signed delta `new_amount - paid`.
    pub fn adjust_payment(
        &mut self,
        sequence: i64,
        new_amount: Money,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> CoreResult<PaymentOutcome> {
        if let Some(original) = self.replayed(sequence)? {
            return Ok(PaymentOutcome::Replayed(original));
        }

        if self.payment_status != PaymentStatus::Paid {
            return Err(CoreError::PaymentNotAdjustable {
                delivery_id: self.id.clone(),
                status: self.payment_status,
            });
        }
        if new_amount.is_negative() || new_amount >= self.paid_amount {
            return Err(CoreError::AmountOutOfRange {
                field: "adjusted amount".to_string(),
                amount: new_amount,
                min: Money::zero(),
                max: self.paid_amount,
            });
        }
        let notes = validate_notes(notes)?;

        let delta = new_amount - self.paid_amount;
        Ok(PaymentOutcome::Recorded(self.apply(
            sequence,
            PaymentKind::Adjustment,
            delta,
            Some(notes),
            now,
        )))
    }

    /// Snapshot of the open balance; `None` once fully paid.
    pub fn outstanding(&self) -> Option<OutstandingPayment> {
        if !self.remaining_balance.is_positive() {
            return None;
        }

        Some(OutstandingPayment {
            order_id: self.order_id.clone(),
            delivery_id: self.id.clone(),
            shop_id: self.shop_id.clone(),
            branch_id: self.branch_id.clone(),
            total_amount: self.total_amount,
            paid_amount: self.paid_amount,
            remaining_balance: self.remaining_balance,
            opened_at: self.created_at,
            updated_at: self.updated_at,
        })
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn replayed(&self, sequence: i64) -> CoreResult<Option<PaymentRecord>> {
        if sequence <= 0 {
            return Err(CoreError::invalid("sequence", "must be positive"));
        }
        if let Some(original) = self.find_payment(sequence) {
            return Ok(Some(original.clone()));
        }
        if sequence <= self.last_sequence {
            return Err(CoreError::invalid(
                "sequence",
                format!("{sequence} is not after last applied sequence {}", self.last_sequence),
            ));
        }
        Ok(None)
    }

    fn check_collection_range(&self, amount: Money) -> CoreResult<()> {
        if amount.is_negative() || amount > self.remaining_balance {
            return Err(CoreError::AmountOutOfRange {
                field: "payment".to_string(),
                amount,
                min: Money::zero(),
                max: self.remaining_balance,
            });
        }
        Ok(())
    }

    fn apply(
        &mut self,
        sequence: i64,
        kind: PaymentKind,
        amount: Money,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> PaymentRecord {
        let record = PaymentRecord {
            sequence,
            kind,
            amount,
            paid_at: now,
            notes,
        };

        self.paid_amount += amount;
        self.remaining_balance = self.total_amount - self.paid_amount;
        self.payment_status = PaymentStatus::for_amounts(self.paid_amount, self.total_amount);
        self.last_sequence = sequence;
        self.updated_at = now;
        self.payment_history.push(record.clone());
        record
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
