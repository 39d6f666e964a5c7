//! # routebook-core: Pure Business Logic for RouteBook
//!
//! The order financial lifecycle as pure functions and owned state
//! transitions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        RouteBook Architecture                           │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              App layer (screens, sync, notifications)           │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ inbound requests                       │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               routebook-db :: OrderWorkflow                     │   │
//! │  │      one SQLite transaction per inbound operation               │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ routebook-core (THIS CRATE) ★                   │   │
//! │  │                                                                 │   │
//! │  │  policy ─► totals ─► status ─► delivery ─► ledger               │   │
//! │  │                │                                                │   │
//! │  │                └──────────► discounts ─► reports                │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`policy`] - Discount limits per category, product and user
//! - [`totals`] - Line and order totals, unauthorized discount evaluation
//! - [`status`] - Order status state machine
//! - [`delivery`] - Delivery payment reconciliation and outstanding balances
//! - [`ledger`] - Ledger entry construction, deduplication and cleanup
//! - [`discounts`] - Monthly unauthorized discount aggregates per booker
//! - [`reports`] - Read-only projections for dashboards
//! - [`money`] - Exact decimal Money type
//! - [`types`] - Reference data and order records
//! - [`error`] / [`validation`] - Error taxonomy and input rules
//!
//! ## Example Usage
//!
//! ```rust
//! use routebook_core::money::Money;
//! use routebook_core::policy::DiscountPolicy;
//! use routebook_core::totals::{LineInput, OrderTotalsCalculator};
//! use routebook_core::types::{Percent, Product, SalesUser, UserRole};
//!
//! let policy = DiscountPolicy::new(Percent::from_units(5));
//! let product = Product {
//!     id: "p-1".into(),
//!     name: "Tea 950g".into(),
//!     category: "tea".into(),
//!     unit_price: Money::from_units(100),
//!     max_discount_percent: Percent::from_units(10),
//! };
//! let booker = SalesUser {
//!     id: "b-1".into(),
//!     name: "Asif".into(),
//!     role: UserRole::Booker,
//!     branch_id: "lhr".into(),
//!     max_discount_percent: Percent::from_units(15),
//!     max_discount_amount: Money::zero(),
//! };
//!
//! let priced = OrderTotalsCalculator::new(&policy)
//!     .calculate(&[LineInput::new(product, 10, Percent::from_units(20))], &booker)
//!     .unwrap();
//!
//! assert_eq!(priced.totals.unauthorized_discount, Money::from_units(150));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod delivery;
pub mod discounts;
pub mod error;
pub mod ledger;
pub mod money;
pub mod policy;
pub mod reports;
pub mod status;
pub mod totals;
pub mod types;
pub mod validation;

#[cfg(test)]
pub(crate) mod test_support;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use delivery::{Delivery, OutstandingPayment, PaymentKind, PaymentRecord, PaymentStatus};
pub use discounts::{BookerDiscountAggregate, MonthKey};
pub use error::{CoreError, CoreResult, ValidationError};
pub use ledger::{LedgerEntry, LedgerEntryType, Posting};
pub use money::Money;
pub use policy::DiscountPolicy;
pub use status::{OrderStateMachine, OrderStatus};
pub use totals::{OrderTotals, OrderTotalsCalculator};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum quantity of a single order line.
///
/// Guards against typing 10000 instead of 100 on a handheld.
pub const MAX_ITEM_QUANTITY: i64 = 100_000;

/// Maximum lines on one order.
pub const MAX_ORDER_ITEMS: usize = 200;

/// Maximum length of free-text notes on payments and adjustments.
pub const MAX_NOTES_LEN: usize = 500;

/// Category limit used when a category has no configured limit.
pub const DEFAULT_CATEGORY_MAX_DISCOUNT_PERCENT: i64 = 5;
