//! # Money Module
//!
//! Provides the `Money` type for handling cash amounts safely.
//!
//! ## Why Decimal Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE ROUNDING DRIFT PROBLEM                                             │
//! │                                                                         │
//! │  Line 1: 7 × 33 at 7% discount  → discount 16.17                       │
//! │  Line 2: 3 × 19 at 7% discount  → discount  3.99                       │
//! │                                                                         │
//! │  Round each line, then add: drift accumulates per line                  │
//! │  Floats: 0.1 + 0.2 = 0.30000000000000004                                │
//! │                                                                         │
//! │  OUR SOLUTION: exact Decimal arithmetic everywhere                      │
//! │    Aggregate first, round ONLY when rendering                           │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use routebook_core::money::Money;
//! use routebook_core::types::Percent;
//!
//! let line_total = Money::from_units(100) * 10; // 1000
//! let discount = line_total.percent(Percent::from_units(20));
//! assert_eq!(discount, Money::from_units(200));
//! ```

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};
use std::str::FromStr;
use ts_rs::TS;

use crate::types::Percent;

/// Number of decimal places shown to users.
pub const DISPLAY_SCALE: u32 = 2;

// =============================================================================
// Money Type
// =============================================================================

/// A cash amount in the branch's single currency unit.
///
/// ## Design Decisions
/// - **Decimal (signed)**: negative values for returns and paybacks
/// - **Exact**: percentage math never rounds; only `rounded()` does
/// - **Serialized as string**: no precision loss through JSON
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(#[ts(type = "string")] Decimal);

impl Money {
    /// Wraps an exact decimal amount.
    #[inline]
    pub const fn new(amount: Decimal) -> Self {
        Money(amount)
    }

    /// Creates Money from whole currency units.
    ///
    /// ## Example
    /// ```rust
    /// use routebook_core::money::Money;
    ///
    /// let price = Money::from_units(250);
    /// assert_eq!(price.to_string(), "250.00");
    /// ```
    #[inline]
    pub fn from_units(units: i64) -> Self {
        Money(Decimal::from(units))
    }

    /// Returns the exact underlying decimal.
    #[inline]
    pub const fn amount(&self) -> Decimal {
        self.0
    }

    /// Returns zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(Decimal::ZERO)
    }

    /// Checks if the value is zero.
    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Checks if the value is positive (greater than zero).
    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// Checks if the value is negative (less than zero).
    #[inline]
    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    /// Returns the absolute value.
    #[inline]
    pub fn abs(&self) -> Self {
        Money(self.0.abs())
    }

    /// Returns `percent` of this amount, exactly.
    ///
    /// ```rust
    /// use routebook_core::money::Money;
    /// use routebook_core::types::Percent;
    ///
    /// let base = Money::from_units(1000);
    /// assert_eq!(base.percent(Percent::from_units(5)), Money::from_units(50));
    /// ```
    pub fn percent(&self, percent: Percent) -> Money {
        Money(self.0 * percent.value() / Decimal::ONE_HUNDRED)
    }

    /// Multiplies by a quantity.
    #[inline]
    pub fn multiply_quantity(&self, qty: i64) -> Self {
        Money(self.0 * Decimal::from(qty))
    }

    /// Clamps negative values to zero.
    #[inline]
    pub fn non_negative(self) -> Self {
        if self.is_negative() {
            Money::zero()
        } else {
            self
        }
    }

    /// Rounded copy for display (2 places, half away from zero).
    ///
    /// Never feed the result back into a calculation.
    pub fn rounded(&self) -> Decimal {
        self.0
            .round_dp_with_strategy(DISPLAY_SCALE, rust_decimal::RoundingStrategy::MidpointAwayFromZero)
    }

    /// Canonical storage representation (exact, normalized).
    pub fn to_storage(&self) -> String {
        self.0.normalize().to_string()
    }

    /// Parses the storage representation written by [`Money::to_storage`].
    pub fn from_storage(raw: &str) -> Result<Self, rust_decimal::Error> {
        Decimal::from_str(raw.trim()).map(Money)
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Display shows the rounded amount with two decimals.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.rounded())
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl From<Decimal> for Money {
    fn from(amount: Decimal) -> Self {
        Money(amount)
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Neg for Money {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Money(-self.0)
    }
}

/// Multiplication by quantity.
impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        self.multiply_quantity(qty)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + *m)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
