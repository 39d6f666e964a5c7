//! # Validation Module
//!
//! Input validation for the engine's inbound requests.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: App layer (outside this workspace)                           │
//! │  └── Basic format checks, immediate user feedback                      │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE - field rules before any business logic          │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Component rules (totals, state machine, reconciler)          │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 4: SQLite constraints (NOT NULL, PRIMARY KEY, FOREIGN KEY)      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use routebook_core::validation::{validate_notes, validate_quantity};
//!
//! validate_quantity(5).unwrap();
//! assert!(validate_notes(Some("   ")).is_err());
//! ```

use crate::error::ValidationError;
use crate::types::Percent;
use crate::{MAX_ITEM_QUANTITY, MAX_NOTES_LEN, MAX_ORDER_ITEMS};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates an order line quantity.
///
/// ## Rules
/// - Must not be negative
/// - Must not exceed MAX_ITEM_QUANTITY
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty < 0 {
        return Err(ValidationError::Negative {
            field: "quantity".to_string(),
        });
    }

    if qty > MAX_ITEM_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 0,
            max: MAX_ITEM_QUANTITY,
        });
    }

    Ok(())
}

/// Validates a discount percentage.
///
/// ## Rules
/// - Must not be negative
/// - Must not exceed 100% (a line can never go below zero)
pub fn validate_discount_percent(pct: Percent) -> ValidationResult<()> {
    if pct.is_negative() {
        return Err(ValidationError::Negative {
            field: "discount_percent".to_string(),
        });
    }

    if pct > Percent::hundred() {
        return Err(ValidationError::OutOfRange {
            field: "discount_percent".to_string(),
            min: 0,
            max: 100,
        });
    }

    Ok(())
}

/// Validates the number of lines on an order.
pub fn validate_item_count(count: usize) -> ValidationResult<()> {
    if count > MAX_ORDER_ITEMS {
        return Err(ValidationError::OutOfRange {
            field: "order items".to_string(),
            min: 0,
            max: MAX_ORDER_ITEMS as i64,
        });
    }

    Ok(())
}

// =============================================================================
// String Validators
// =============================================================================

/// Validates a mandatory free-text reason (adjustments, resets).
///
/// ## Returns
/// The trimmed notes.
pub fn validate_notes(notes: Option<&str>) -> ValidationResult<String> {
    let notes = notes.map(str::trim).unwrap_or_default();

    if notes.is_empty() {
        return Err(ValidationError::Required {
            field: "notes".to_string(),
        });
    }

    if notes.len() > MAX_NOTES_LEN {
        return Err(ValidationError::TooLong {
            field: "notes".to_string(),
            max: MAX_NOTES_LEN,
        });
    }

    Ok(notes.to_string())
}

/// Normalizes optional notes: trims, drops empty strings, enforces length.
pub fn normalize_optional_notes(notes: Option<&str>) -> ValidationResult<Option<String>> {
    match notes.map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) if text.len() > MAX_NOTES_LEN => Err(ValidationError::TooLong {
            field: "notes".to_string(),
            max: MAX_NOTES_LEN,
        }),
        Some(text) => Ok(Some(text.to_string())),
    }
}

/// Validates a reference id (order, shop, booker, ...).
pub fn validate_reference(field: &str, id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// UUID Validators
// =============================================================================

/// Validates a client-supplied UUID (offline clients mint order ids).
///
/// ## Example
/// ```rust
/// use routebook_core::validation::validate_uuid;
///
/// assert!(validate_uuid("550e8400-e29b-41d4-a716-446655440000").is_ok());
/// assert!(validate_uuid("not-a-uuid").is_err());
/// ```
pub fn validate_uuid(id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "id".to_string(),
        });
    }

    uuid::Uuid::parse_str(id).map_err(|_| ValidationError::InvalidFormat {
        field: "id".to_string(),
        reason: "must be a valid UUID".to_string(),
    })?;

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
