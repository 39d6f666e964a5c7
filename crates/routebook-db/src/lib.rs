//! # routebook-db: Persistence and Order Workflow for RouteBook
//!
//! SQLite storage for orders, deliveries, the branch ledger and discount
//! aggregates, and the transactional workflow that drives `routebook-core`.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        RouteBook Data Flow                              │
//! │                                                                         │
//! │  Booker / KPO / salesman request (record_delivery_payment)             │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   routebook-db (THIS CRATE)                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │ OrderWorkflow │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │ (workflow.rs) │    │               │    │  (embedded)  │  │   │
//! │  │   │               │    │ OrderRepo     │    │              │  │   │
//! │  │   │ one tx per    │───►│ DeliveryRepo  │    │ 001_initial  │  │   │
//! │  │   │ operation     │    │ LedgerRepo    │    │ _schema.sql  │  │   │
//! │  │   │               │    │ DiscountRepo  │    │              │  │   │
//! │  │   └───────┬───────┘    └───────────────┘    └──────────────┘  │   │
//! │  │           │ SideTasks (discount aggregate, best effort)        │   │
//! │  └───────────┼─────────────────────────────────────────────────────┘   │
//! │              ▼                                                          │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database (per branch)                │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`workflow`] - Inbound operations, one transaction each
//! - [`repository`] - Repository implementations (orders, ledger, etc.)
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`config`] - Environment configuration
//! - [`side_effects`] - Best-effort tasks after a commit
//! - [`error`] - Database and workflow error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use routebook_db::{Database, EngineConfig, OrderWorkflow};
//!
//! let config = EngineConfig::load()?;
//! let db = Database::new(config.db_config()).await?;
//! let workflow = OrderWorkflow::from_config(db, &config);
//!
//! let receipt = workflow
//!     .record_delivery_payment(&order_id, PaymentRequest::new(1, amount), &salesman_id)
//!     .await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod side_effects;
pub mod workflow;

#[cfg(test)]
pub(crate) mod test_support;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{ConfigError, EngineConfig};
pub use error::{DbError, DbResult, WorkflowError, WorkflowResult};
pub use pool::{Database, DbConfig};
pub use workflow::{CreateOrderRequest, OrderLineRequest, OrderWorkflow, PaymentReceipt, ReconcileReport};

// Repository re-exports for convenience
pub use repository::deliveries::DeliveryRepository;
pub use repository::discounts::DiscountRepository;
pub use repository::ledger::LedgerRepository;
pub use repository::orders::OrderRepository;
pub use repository::reference::ReferenceRepository;
pub use repository::reports::ReportRepository;
