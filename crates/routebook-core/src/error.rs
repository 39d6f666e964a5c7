//! # Error Types
//!
//! Domain-specific error types for routebook-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  routebook-core errors (this file)                                     │
//! │  ├── CoreError        - Business rule violations                       │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  routebook-db errors (separate crate)                                  │
//! │  ├── DbError          - Database operation failures                    │
//! │  └── WorkflowError    - CoreError | DbError for workflow callers        │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → WorkflowError → API layer         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Every failure leaves the input untouched (all-or-nothing)
//! 2. Errors carry the context a UI needs: states, bounds, amounts
//! 3. Errors are enum variants, never String

use thiserror::Error;

use crate::delivery::PaymentStatus;
use crate::ledger::LedgerEntryType;
use crate::money::Money;
use crate::status::OrderStatus;

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Bad quantities, percentages, notes or other caller input.
    #[error("Invalid {field}: {reason}")]
    InvalidInput { field: String, reason: String },

    /// Order status transition not allowed by the transition table.
    ///
    /// ## User Workflow
    /// ```text
    /// KPO clicks "Bill" on a draft order
    ///      │
    ///      ▼
    /// IllegalStateTransition { current: Draft, attempted: Billed }
    ///      │
    ///      ▼
    /// UI shows: "Order ORD-000042 is draft, cannot move to billed"
    /// ```
    #[error("Order {order_id} is {current}, cannot move to {attempted}")]
    IllegalStateTransition {
        order_id: String,
        current: OrderStatus,
        attempted: OrderStatus,
    },

    /// An operation requires the order to be in a specific status.
    #[error("Order {order_id} is {current}, {operation} requires {required}")]
    StatusGuard {
        order_id: String,
        current: OrderStatus,
        required: OrderStatus,
        operation: String,
    },

    /// Payment or adjustment amount outside its allowed bounds.
    ///
    /// Recoverable: the UI re-prompts with the bounds.
    #[error("{field} {amount} is out of range ({min} to {max})")]
    AmountOutOfRange {
        field: String,
        amount: Money,
        min: Money,
        max: Money,
    },

    /// Adjustments only correct a delivery that is marked fully paid.
    #[error("Delivery {delivery_id} is {status}, only paid deliveries can be adjusted")]
    PaymentNotAdjustable {
        delivery_id: String,
        status: PaymentStatus,
    },

    /// Submission carries an unauthorized discount that was not acknowledged.
    ///
    /// Recoverable: the caller shows `amount` and retries with the
    /// acknowledgement flag set.
    #[error("Order {order_id} has unauthorized discount {amount}; acknowledgement required")]
    UnauthorizedDiscountUnacknowledged { order_id: String, amount: Money },

    /// A ledger entry for this business event already exists.
    #[error("{entry_type} already posted for {reference}")]
    DuplicatePosting {
        entry_type: LedgerEntryType,
        reference: String,
    },

    /// Missing order, delivery, shop, product or user reference.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },
}

impl CoreError {
    /// Creates an InvalidInput error.
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        CoreError::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates a NotFound error.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        CoreError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// True for errors the UI resolves by re-prompting the user.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CoreError::AmountOutOfRange { .. }
                | CoreError::UnauthorizedDiscountUnacknowledged { .. }
                | CoreError::InvalidInput { .. }
        )
    }
}

/// Field-level validation failures surface as `InvalidInput`.
impl From<ValidationError> for CoreError {
    fn from(err: ValidationError) -> Self {
        CoreError::InvalidInput {
            field: err.field().to_string(),
            reason: err.to_string(),
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors, raised before business logic runs.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    Negative { field: String },

    /// Invalid format (e.g., invalid UUID, invalid month key).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

impl ValidationError {
    /// Name of the offending field.
    pub fn field(&self) -> &str {
        match self {
            ValidationError::Required { field }
            | ValidationError::TooLong { field, .. }
            | ValidationError::OutOfRange { field, .. }
            | ValidationError::Negative { field }
            | ValidationError::InvalidFormat { field, .. } => field,
        }
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
