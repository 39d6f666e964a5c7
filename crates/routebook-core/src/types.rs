//! # Domain Types
//!
//! Reference data and order records shared by every component.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Product      │   │     Order       │   │   OrderItem     │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID)      │   │  id (UUID)      │   │  product_id     │       │
//! │  │  category       │   │  order_number   │   │  unit_price     │       │
//! │  │  unit_price     │   │  status         │   │  discount %     │       │
//! │  │  max_discount % │   │  totals         │   │  effective max  │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │   SalesUser     │   │      Shop       │   │  ReturnRecord   │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  role           │   │  branch_id      │   │  total_value    │       │
//! │  │  max discount % │   │  is_active      │   │  order_id?      │       │
//! │  │  max discount   │   └─────────────────┘   └─────────────────┘       │
//! │  └─────────────────┘                                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dual-Key Identity Pattern
//! Every order has:
//! - `id`: UUID v4 - immutable, used for relations and idempotent retries
//! - `order_number`: sequential `ORD-000042` shown to bookers and the KPO

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

use crate::delivery::{Delivery, PaymentStatus};
use crate::money::Money;
use crate::status::OrderStatus;
use crate::totals::{OrderTotals, PricedOrder};

// =============================================================================
// Percent
// =============================================================================

/// A percentage where `20` means 20%.
///
/// Kept as a decimal so limits like 7.5% compare exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Percent(#[ts(type = "string")] Decimal);

impl Percent {
    /// Wraps a decimal percentage.
    #[inline]
    pub const fn new(value: Decimal) -> Self {
        Percent(value)
    }

    /// Creates a percentage from whole percent units.
    #[inline]
    pub fn from_units(units: i64) -> Self {
        Percent(Decimal::from(units))
    }

    /// Zero percent.
    #[inline]
    pub const fn zero() -> Self {
        Percent(Decimal::ZERO)
    }

    /// The full hundred percent.
    #[inline]
    pub const fn hundred() -> Self {
        Percent(Decimal::ONE_HUNDRED)
    }

    /// Returns the decimal value (20 for 20%).
    #[inline]
    pub const fn value(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    /// Canonical storage representation.
    pub fn to_storage(&self) -> String {
        self.0.normalize().to_string()
    }

    /// Parses the storage representation written by [`Percent::to_storage`].
    pub fn from_storage(raw: &str) -> Result<Self, rust_decimal::Error> {
        Decimal::from_str(raw.trim()).map(Percent)
    }
}

impl Default for Percent {
    fn default() -> Self {
        Percent::zero()
    }
}

impl fmt::Display for Percent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0.normalize())
    }
}

// =============================================================================
// Product
// =============================================================================

/// A product bookers can order. Immutable reference data.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Product {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Display name, frozen onto order lines.
    pub name: String,

    /// Category used to look up the category discount limit.
    pub category: String,

    /// Live list price. Orders snapshot it at creation.
    pub unit_price: Money,

    /// Highest discount this product may carry on its own.
    pub max_discount_percent: Percent,
}

// =============================================================================
// Sales Users
// =============================================================================

/// Role of a field or office user. Authorization itself happens outside
/// the engine; the role is carried for audit and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    /// Creates orders at shops.
    Booker,
    /// Delivers orders and collects cash.
    Salesman,
    /// Branch office approver.
    Kpo,
    /// Branch administrator (resets discount aggregates).
    Admin,
}

/// The acting user whose discount limits apply to an order.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SalesUser {
    pub id: String,
    pub name: String,
    pub role: UserRole,
    pub branch_id: String,

    /// Highest discount percentage this user may grant on any line.
    pub max_discount_percent: Percent,

    /// Absolute discount cap per order. Zero means no cap.
    pub max_discount_amount: Money,
}

impl SalesUser {
    /// Returns the per-order discount cap, if one is configured.
    pub fn discount_cap(&self) -> Option<Money> {
        if self.max_discount_amount.is_positive() {
            Some(self.max_discount_amount)
        } else {
            None
        }
    }
}

/// A retail shop on a booker's route.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Shop {
    pub id: String,
    pub name: String,
    pub branch_id: String,
    pub is_active: bool,
}

// =============================================================================
// Payment Mode
// =============================================================================

/// How the shop settled the order at delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMode {
    /// Fully paid in cash on delivery.
    Cash,
    /// Delivered with an outstanding balance.
    Credit,
}

impl PaymentMode {
    /// Derives the mode from a delivery's payment status.
    pub fn from_status(status: PaymentStatus) -> Self {
        match status {
            PaymentStatus::Paid => PaymentMode::Cash,
            PaymentStatus::Partial | PaymentStatus::Unpaid => PaymentMode::Credit,
        }
    }
}

// =============================================================================
// Order Item
// =============================================================================

/// A priced order line.
///
/// Uses the snapshot pattern: unit price, name, category and the effective
/// discount limit are frozen when the line is priced, so recalculating a
/// submitted order never depends on live reference data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OrderItem {
    pub product_id: String,
    /// Product name at order time (frozen).
    pub product_name: String,
    /// Product category at order time (frozen).
    pub category: String,
    pub quantity: i64,
    /// Unit price at order time (frozen).
    pub unit_price: Money,
    pub discount_percent: Percent,
    /// quantity × unit_price
    pub line_total: Money,
    pub discount_amount: Money,
    /// line_total - discount_amount
    pub final_amount: Money,
    /// min(category max, product max, booker max) at order time.
    pub effective_max_discount: Percent,
    pub is_unauthorized_discount: bool,
    pub unauthorized_amount: Money,
}

impl OrderItem {
    /// Discount this line may carry without breaching its percentage limit.
    pub fn allowed_discount(&self) -> Money {
        self.discount_amount
            .min(self.line_total.percent(self.effective_max_discount))
    }
}

// =============================================================================
// Order
// =============================================================================

/// A booker's order at a shop.
///
/// Never hard-deleted: cancellation is a status.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Order {
    pub id: String,
    /// Sequential human-readable number (`ORD-000042`).
    pub order_number: String,
    pub shop_id: String,
    pub booker_id: String,
    pub branch_id: String,
    pub status: OrderStatus,
    pub items: Vec<OrderItem>,
    /// Totals frozen when the items were last priced.
    pub totals: OrderTotals,
    /// Booker's absolute discount cap at order time (zero = no cap).
    pub booker_max_discount_amount: Money,
    /// Booker confirmed submission despite an unauthorized discount.
    pub unauthorized_acknowledged: bool,
    pub payment_mode: Option<PaymentMode>,
    pub paid_amount: Money,
    pub remaining_balance: Money,
    pub payment_status: PaymentStatus,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub submitted_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub delivered_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Opens a draft order from freshly priced lines.
    ///
    /// The booker's absolute cap is snapshotted so later repricing of this
    /// order does not depend on the live user record.
    pub fn new_draft(
        id: String,
        order_number: String,
        shop: &Shop,
        booker: &SalesUser,
        priced: PricedOrder,
        now: DateTime<Utc>,
    ) -> Order {
        Order {
            id,
            order_number,
            shop_id: shop.id.clone(),
            booker_id: booker.id.clone(),
            branch_id: shop.branch_id.clone(),
            status: OrderStatus::Draft,
            remaining_balance: priced.totals.grand_total,
            items: priced.items,
            totals: priced.totals,
            booker_max_discount_amount: booker.max_discount_amount,
            unauthorized_acknowledged: false,
            payment_mode: None,
            paid_amount: Money::zero(),
            payment_status: PaymentStatus::Unpaid,
            created_at: now,
            updated_at: now,
            submitted_at: None,
            delivered_at: None,
        }
    }

    /// Copies the delivery's running payment state onto the order.
    pub fn apply_settlement(&mut self, delivery: &Delivery, now: DateTime<Utc>) {
        self.paid_amount = delivery.paid_amount;
        self.remaining_balance = delivery.remaining_balance;
        self.payment_status = delivery.payment_status;
        self.payment_mode = Some(PaymentMode::from_status(delivery.payment_status));
        self.updated_at = now;
    }

    /// Returns the frozen grand total.
    #[inline]
    pub fn grand_total(&self) -> Money {
        self.totals.grand_total
    }

    /// Returns the discount cap snapshot, if one was set.
    pub fn discount_cap(&self) -> Option<Money> {
        if self.booker_max_discount_amount.is_positive() {
            Some(self.booker_max_discount_amount)
        } else {
            None
        }
    }
}

/// Formats the human-readable order number for a sequence value.
pub fn format_order_number(sequence: i64) -> String {
    format!("ORD-{:06}", sequence)
}

// =============================================================================
// Returns
// =============================================================================

/// Goods taken back from a shop. Posted to the ledger as a negative entry.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ReturnRecord {
    pub id: String,
    pub order_id: Option<String>,
    pub shop_id: String,
    pub branch_id: String,
    pub total_value: Money,
    pub reason: String,
    pub created_by: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_display_and_storage() {
        let pct = Percent::from_storage("7.50").unwrap();
        assert_eq!(pct.to_string(), "7.5%");
        assert_eq!(pct.to_storage(), "7.5");
        assert!(Percent::from_units(-1).is_negative());
    }

    #[test]
    fn test_discount_cap_zero_means_unlimited() {
        let mut user = SalesUser {
            id: "u-1".to_string(),
            name: "Asif".to_string(),
            role: UserRole::Booker,
            branch_id: "b-1".to_string(),
            max_discount_percent: Percent::from_units(15),
            max_discount_amount: Money::zero(),
        };
        assert_eq!(user.discount_cap(), None);

        user.max_discount_amount = Money::from_units(1000);
        assert_eq!(user.discount_cap(), Some(Money::from_units(1000)));
    }

    #[test]
    fn test_payment_mode_from_status() {
        assert_eq!(PaymentMode::from_status(PaymentStatus::Paid), PaymentMode::Cash);
        assert_eq!(PaymentMode::from_status(PaymentStatus::Partial), PaymentMode::Credit);
        assert_eq!(PaymentMode::from_status(PaymentStatus::Unpaid), PaymentMode::Credit);
    }

    #[test]
    fn test_order_number_format() {
        assert_eq!(format_order_number(42), "ORD-000042");
        assert_eq!(format_order_number(1_234_567), "ORD-1234567");
    }
}
