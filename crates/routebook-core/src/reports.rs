//! # Reporting Projections
//!
//! Read-only views over ledger entries, outstanding balances and discount
//! aggregates. Nothing here mutates; the db crate feeds these from queries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::delivery::OutstandingPayment;
use crate::discounts::BookerDiscountAggregate;
use crate::error::{CoreError, CoreResult};
use crate::ledger::{LedgerEntry, LedgerEntryType};
use crate::money::Money;

// =============================================================================
// Date Range
// =============================================================================

/// Half-open range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DateRange {
    #[ts(as = "String")]
    pub start: DateTime<Utc>,
    #[ts(as = "String")]
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> CoreResult<Self> {
        if end < start {
            return Err(CoreError::invalid("date_range", "end is before start"));
        }
        Ok(DateRange { start, end })
    }

    #[inline]
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }
}

/// Branch entries inside the range, oldest first.
pub fn ledger_entries_in<'a>(
    entries: impl IntoIterator<Item = &'a LedgerEntry>,
    branch_id: &str,
    range: DateRange,
) -> Vec<LedgerEntry> {
    let mut selected: Vec<LedgerEntry> = entries
        .into_iter()
        .filter(|e| e.branch_id == branch_id && range.contains(e.created_at))
        .cloned()
        .collect();
    selected.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    selected
}

// =============================================================================
// Shop Credit
// =============================================================================

/// What a shop still owes across its delivered orders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ShopCreditSummary {
    pub shop_id: String,
    pub outstanding_total: Money,
    pub open_orders: u32,
    /// Opening date of the oldest unpaid balance.
    #[ts(as = "Option<String>")]
    pub oldest_outstanding: Option<DateTime<Utc>>,
}

impl ShopCreditSummary {
    pub fn from_outstanding<'a>(
        shop_id: &str,
        balances: impl IntoIterator<Item = &'a OutstandingPayment>,
    ) -> Self {
        let mut summary = ShopCreditSummary {
            shop_id: shop_id.to_string(),
            outstanding_total: Money::zero(),
            open_orders: 0,
            oldest_outstanding: None,
        };

        for balance in balances.into_iter().filter(|b| b.shop_id == shop_id) {
            if !balance.remaining_balance.is_positive() {
                continue;
            }
            summary.outstanding_total += balance.remaining_balance;
            summary.open_orders += 1;
            summary.oldest_outstanding = Some(match summary.oldest_outstanding {
                Some(oldest) => oldest.min(balance.opened_at),
                None => balance.opened_at,
            });
        }
        summary
    }
}

// =============================================================================
// Booker Discounts
// =============================================================================

/// One month of a booker's unauthorized discount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct BookerMonthRow {
    /// `YYYY-MM`
    pub month: String,
    pub amount: Money,
    pub order_count: u32,
}

/// Month rows in ascending order.
pub fn booker_monthly_rows(aggregate: &BookerDiscountAggregate) -> Vec<BookerMonthRow> {
    aggregate
        .months()
        .map(|(month, totals)| BookerMonthRow {
            month: month.to_string(),
            amount: totals.amount,
            order_count: totals.order_ids.len() as u32,
        })
        .collect()
}

// =============================================================================
// Branch Net Cash
// =============================================================================

/// Per-type sums of `net_cash` and their total.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NetCashSummary {
    pub sales: Money,
    pub payments: Money,
    pub returns: Money,
    pub adjustments: Money,
    pub net: Money,
}

impl NetCashSummary {
    pub fn add(&mut self, entry_type: LedgerEntryType, net_cash: Money) {
        match entry_type {
            LedgerEntryType::SaleDelivered => self.sales += net_cash,
            LedgerEntryType::Payment => self.payments += net_cash,
            LedgerEntryType::Return => self.returns += net_cash,
            LedgerEntryType::Adjustment => self.adjustments += net_cash,
        }
        self.net += net_cash;
    }

    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a LedgerEntry>) -> Self {
        let mut summary = NetCashSummary::default();
        for entry in entries {
            summary.add(entry.entry_type, entry.net_cash);
        }
        summary
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
