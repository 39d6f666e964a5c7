//! # Repository Module
//!
//! Database repository implementations for RouteBook.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Pattern                                   │
//! │                                                                         │
//! │  OrderWorkflow                                                          │
//! │       │                                                                 │
//! │       │  let mut tx = db.begin().await?;                                │
//! │       │  db.orders().get(&mut tx, id)                                   │
//! │       │  db.ledger().post(&mut tx, entry)                               │
//! │       │  tx.commit().await?;                                            │
//! │       ▼                                                                 │
//! │  Repositories                                                           │
//! │  ├── write methods take `&mut SqliteConnection` so every statement of   │
//! │  │   one operation runs inside the caller's transaction                 │
//! │  └── `*_by_id` / report methods acquire their own pooled connection     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite Database                                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`ReferenceRepository`](reference::ReferenceRepository) - Users, shops, products, category limits
//! - [`OrderRepository`](orders::OrderRepository) - Orders and their frozen items
//! - [`DeliveryRepository`](deliveries::DeliveryRepository) - Deliveries, payments, outstanding balances
//! - [`LedgerRepository`](ledger::LedgerRepository) - Ledger postings and duplicate cleanup
//! - [`DiscountRepository`](discounts::DiscountRepository) - Monthly unauthorized discount aggregates
//! - [`ReportRepository`](reports::ReportRepository) - Read-only projections

pub mod deliveries;
pub mod discounts;
pub mod ledger;
pub mod orders;
pub mod reference;
pub mod reports;

use routebook_core::{Money, Percent};

use crate::error::{DbError, DbResult};

/// Parses a TEXT money column.
pub(crate) fn money(column: &str, raw: &str) -> DbResult<Money> {
    Money::from_storage(raw).map_err(|_| DbError::corrupt(column, raw))
}

/// Parses a TEXT percentage column.
pub(crate) fn percent(column: &str, raw: &str) -> DbResult<Percent> {
    Percent::from_storage(raw).map_err(|_| DbError::corrupt(column, raw))
}
