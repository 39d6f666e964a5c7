//! # Report Repository
//!
//! Read-only dashboard projections. Queries load the rows; the shaping is
//! done by `routebook_core::reports` so the database and in-memory views agree.

use sqlx::SqlitePool;
use tracing::debug;

use routebook_core::reports::{
    booker_monthly_rows, ledger_entries_in, BookerMonthRow, DateRange, NetCashSummary, ShopCreditSummary,
};
use routebook_core::LedgerEntry;

use super::deliveries::DeliveryRepository;
use super::discounts::DiscountRepository;
use super::ledger::LedgerRepository;
use crate::error::DbResult;

/// Repository for reporting reads.
#[derive(Debug, Clone)]
pub struct ReportRepository {
    pool: SqlitePool,
}

impl ReportRepository {
    /// Creates a new ReportRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ReportRepository { pool }
    }

    /// Ledger entries of a branch inside `range`, oldest first.
    pub async fn ledger_entries(&self, branch_id: &str, range: DateRange) -> DbResult<Vec<LedgerEntry>> {
        let entries = LedgerRepository::new(self.pool.clone())
            .entries_for_branch_between(branch_id, range.start, range.end)
            .await?;
        debug!(branch_id = %branch_id, total = entries.len(), "Loaded ledger entries in range");
        Ok(ledger_entries_in(&entries, branch_id, range))
    }

    /// What a shop still owes across its delivered orders.
    pub async fn shop_credit_summary(&self, shop_id: &str) -> DbResult<ShopCreditSummary> {
        let balances = DeliveryRepository::new(self.pool.clone())
            .outstanding_for_shop(shop_id)
            .await?;
        Ok(ShopCreditSummary::from_outstanding(shop_id, &balances))
    }

    /// Monthly unauthorized discount rows of a booker, ascending by month.
    pub async fn booker_monthly_unauthorized_discount(&self, booker_id: &str) -> DbResult<Vec<BookerMonthRow>> {
        let aggregate = DiscountRepository::new(self.pool.clone())
            .load_for_booker(booker_id)
            .await?;
        Ok(booker_monthly_rows(&aggregate))
    }

    /// Per-type net cash of a branch inside `range`.
    pub async fn branch_net_cash(&self, branch_id: &str, range: DateRange) -> DbResult<NetCashSummary> {
        let entries = self.ledger_entries(branch_id, range).await?;
        Ok(NetCashSummary::from_entries(&entries))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use chrono::{DateTime, TimeZone, Utc};
    use routebook_core::ledger::{payment_entry, PostingContext};
    use routebook_core::Money;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_ledger_entries_are_limited_to_branch_and_range() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        for (seq, branch, day) in [(1, "lhr", 1), (2, "lhr", 10), (3, "lhr", 20), (4, "khi", 10)] {
            let entry = payment_entry(
                "order-1",
                branch,
                Money::from_units(100),
                seq,
                &PostingContext::new("salesman-1", at(day)),
            )
            .unwrap();
            db.ledger().import(&mut conn, &entry).await.unwrap();
        }
        drop(conn);

        // End is exclusive.
        let range = DateRange::new(at(1), at(20)).unwrap();
        let entries = db.reports().ledger_entries("lhr", range).await.unwrap();
        let sequences: Vec<_> = entries.iter().map(|e| e.payment_sequence).collect();
        assert_eq!(sequences, vec![Some(1), Some(2)]);

        let cash = db.reports().branch_net_cash("lhr", range).await.unwrap();
        assert_eq!(cash.payments, Money::from_units(200));
    }
}
