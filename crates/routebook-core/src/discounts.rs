//! # Unauthorized Discount Ledger
//!
//! Monthly totals of unauthorized discount per booker. These totals feed
//! salary deductions, so every contribution is keyed by order id and can
//! only be counted once.
//!
//! ```text
//! booker-1
//!   2024-02   1250.00   [order-7, order-9]
//!   2024-03    150.00   [order-12]
//!
//! reset(2024-02, admin-1)
//!   2024-02      0.00   []            audit: cleared 1250.00 [order-7, order-9]
//!   2024-03    150.00   [order-12]    untouched
//! ```
//!
//! A cleared order stays counted: replaying it after a reset adds nothing.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::types::Order;
use crate::validation::validate_reference;

// =============================================================================
// Month Key
// =============================================================================

/// Calendar month, rendered `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct MonthKey {
    year: i32,
    month: u32,
}

impl MonthKey {
    pub fn new(year: i32, month: u32) -> Result<Self, ValidationError> {
        if !(1..=12).contains(&month) || !(1..=9999).contains(&year) {
            return Err(ValidationError::InvalidFormat {
                field: "month".to_string(),
                reason: format!("{year}-{month} is not a calendar month"),
            });
        }
        Ok(MonthKey { year, month })
    }

    /// Month containing `at` (UTC).
    pub fn of(at: DateTime<Utc>) -> Self {
        MonthKey {
            year: at.year(),
            month: at.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for MonthKey {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidFormat {
            field: "month".to_string(),
            reason: format!("'{s}' is not YYYY-MM"),
        };

        let (year, month) = s.trim().split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        MonthKey::new(year, month)
    }
}

impl From<MonthKey> for String {
    fn from(key: MonthKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for MonthKey {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// =============================================================================
// Aggregate
// =============================================================================

/// One month of unauthorized discount for a booker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct MonthlyDiscount {
    pub amount: Money,
    pub order_ids: Vec<String>,
}

/// Audit row written by every reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DiscountReset {
    #[ts(as = "String")]
    pub month: MonthKey,
    pub reset_by: String,
    #[ts(as = "String")]
    pub reset_at: DateTime<Utc>,
    pub cleared_amount: Money,
    pub cleared_order_ids: Vec<String>,
}

/// Per-booker monthly totals plus the reset audit trail.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookerDiscountAggregate {
    pub booker_id: String,
    months: BTreeMap<MonthKey, MonthlyDiscount>,
    /// Every order ever counted, including ones cleared by a reset.
    counted: BTreeSet<String>,
    resets: Vec<DiscountReset>,
}

impl BookerDiscountAggregate {
    pub fn new(booker_id: impl Into<String>) -> Self {
        BookerDiscountAggregate {
            booker_id: booker_id.into(),
            ..Default::default()
        }
    }

    /// Rebuilds an aggregate from stored parts.
    pub fn from_parts(
        booker_id: impl Into<String>,
        months: BTreeMap<MonthKey, MonthlyDiscount>,
        counted: impl IntoIterator<Item = String>,
        resets: Vec<DiscountReset>,
    ) -> Self {
        let mut counted: BTreeSet<String> = counted.into_iter().collect();
        counted.extend(months.values().flat_map(|m| m.order_ids.iter().cloned()));
        BookerDiscountAggregate {
            booker_id: booker_id.into(),
            months,
            counted,
            resets,
        }
    }

    /// Adds the order's unauthorized discount to the month it was created.
    ///
    /// Returns `false` when there is nothing to add or the order was already
    /// counted.
    pub fn record(&mut self, order: &Order) -> CoreResult<bool> {
        if order.booker_id != self.booker_id {
            return Err(CoreError::invalid(
                "booker_id",
                format!("order {} belongs to booker {}", order.id, order.booker_id),
            ));
        }
        let amount = order.totals.unauthorized_discount;
        if !amount.is_positive() || self.counted.contains(&order.id) {
            return Ok(false);
        }

        let month = self.months.entry(MonthKey::of(order.created_at)).or_default();
        month.amount += amount;
        month.order_ids.push(order.id.clone());
        self.counted.insert(order.id.clone());
        Ok(true)
    }

    /// Zeroes one month and records who did it. Other months are untouched.
    pub fn reset(&mut self, month: MonthKey, reset_by: &str, now: DateTime<Utc>) -> CoreResult<DiscountReset> {
        validate_reference("reset_by", reset_by)?;

        let cleared = self
            .months
            .get_mut(&month)
            .map(std::mem::take)
            .unwrap_or_default();

        let audit = DiscountReset {
            month,
            reset_by: reset_by.to_string(),
            reset_at: now,
            cleared_amount: cleared.amount,
            cleared_order_ids: cleared.order_ids,
        };
        self.resets.push(audit.clone());
        Ok(audit)
    }

    pub fn month_total(&self, month: MonthKey) -> Money {
        self.months.get(&month).map(|m| m.amount).unwrap_or_default()
    }

    pub fn has_counted(&self, order_id: &str) -> bool {
        self.counted.contains(order_id)
    }

    /// Months in ascending order.
    pub fn months(&self) -> impl Iterator<Item = (MonthKey, &MonthlyDiscount)> {
        self.months.iter().map(|(k, v)| (*k, v))
    }

    pub fn resets(&self) -> &[DiscountReset] {
        &self.resets
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{booker, draft_order};
    use chrono::TimeZone;

    fn unauthorized_order(id: &str, created: DateTime<Utc>) -> Order {
        // 150 unauthorized at the default 5% limit
        let mut order = draft_order(&[(10, 100, 20)], &booker(15, 0));
        order.id = id.to_string();
        order.created_at = created;
        order
    }

    fn march() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 31, 23, 59, 0).unwrap()
    }

    fn april() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 1, 0, 5, 0).unwrap()
    }

    #[test]
    fn test_month_key_parse_and_display() {
        let key: MonthKey = "2024-03".parse().unwrap();
        assert_eq!(key, MonthKey::of(march()));
        assert_eq!(key.to_string(), "2024-03");
        assert!("2024-13".parse::<MonthKey>().is_err());
        assert!("2024-3".parse::<MonthKey>().is_err());
        assert!("March".parse::<MonthKey>().is_err());
        assert!(MonthKey::new(2024, 2).unwrap() < key);
    }

    #[test]
    fn test_record_is_idempotent_per_order() {
        let mut agg = BookerDiscountAggregate::new("booker-1");
        let order = unauthorized_order("order-1", march());

        assert!(agg.record(&order).unwrap());
        assert!(!agg.record(&order).unwrap());
        assert_eq!(agg.month_total(MonthKey::of(march())), Money::from_units(150));
    }

    #[test]
    fn test_orders_land_in_their_creation_month() {
        let mut agg = BookerDiscountAggregate::new("booker-1");
        agg.record(&unauthorized_order("order-1", march())).unwrap();
        agg.record(&unauthorized_order("order-2", april())).unwrap();
        agg.record(&unauthorized_order("order-3", april())).unwrap();

        let rows: Vec<(String, Money, usize)> = agg
            .months()
            .map(|(k, m)| (k.to_string(), m.amount, m.order_ids.len()))
            .collect();
        assert_eq!(
            rows,
            vec![
                ("2024-03".to_string(), Money::from_units(150), 1),
                ("2024-04".to_string(), Money::from_units(300), 2),
            ]
        );
    }

    #[test]
    fn test_authorized_order_adds_nothing() {
        let mut agg = BookerDiscountAggregate::new("booker-1");
        let order = draft_order(&[(10, 100, 5)], &booker(15, 0));
        assert!(!agg.record(&order).unwrap());
        assert_eq!(agg.months().count(), 0);
    }

    #[test]
    fn test_record_rejects_other_bookers_order() {
        let mut agg = BookerDiscountAggregate::new("booker-2");
        let err = agg.record(&unauthorized_order("order-1", march())).unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput { ref field, .. } if field == "booker_id"));
    }

    #[test]
    fn test_reset_clears_one_month_and_audits() {
        let mut agg = BookerDiscountAggregate::new("booker-1");
        agg.record(&unauthorized_order("order-1", march())).unwrap();
        agg.record(&unauthorized_order("order-2", april())).unwrap();

        let audit = agg.reset(MonthKey::of(march()), "admin-1", april()).unwrap();
        assert_eq!(audit.cleared_amount, Money::from_units(150));
        assert_eq!(audit.cleared_order_ids, vec!["order-1".to_string()]);

        assert_eq!(agg.month_total(MonthKey::of(march())), Money::zero());
        assert_eq!(agg.month_total(MonthKey::of(april())), Money::from_units(150));
        assert_eq!(agg.resets().len(), 1);

        // cleared orders stay counted
        assert!(!agg.record(&unauthorized_order("order-1", march())).unwrap());
        assert_eq!(agg.month_total(MonthKey::of(march())), Money::zero());
    }

    #[test]
    fn test_reset_of_empty_month_still_audits() {
        let mut agg = BookerDiscountAggregate::new("booker-1");
        let audit = agg.reset(MonthKey::new(2023, 12).unwrap(), "admin-1", april()).unwrap();
        assert_eq!(audit.cleared_amount, Money::zero());
        assert!(agg.reset(MonthKey::new(2023, 12).unwrap(), " ", april()).is_err());
        assert_eq!(agg.resets().len(), 1);
    }

    #[test]
    fn test_from_parts_restores_counted_orders() {
        let mut months = BTreeMap::new();
        months.insert(
            MonthKey::of(march()),
            MonthlyDiscount {
                amount: Money::from_units(150),
                order_ids: vec!["order-1".to_string()],
            },
        );
        let mut agg = BookerDiscountAggregate::from_parts("booker-1", months, ["order-0".to_string()], Vec::new());

        assert!(agg.has_counted("order-0"));
        assert!(!agg.record(&unauthorized_order("order-1", march())).unwrap());
    }
}
