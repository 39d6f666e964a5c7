//! # Ledger Repository
//!
//! Append-only storage of ledger entries.
//!
//! ## Posting Paths
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Ledger Writes                                   │
//! │                                                                         │
//! │  post()         check posting_key, insert if absent  → Posting          │
//! │                 SALE_DELIVERED is checked by order id instead           │
//! │                 (runs inside the workflow transaction)                  │
//! │                                                                         │
//! │  insert_new()   strict: existing posting_key → DuplicatePosting         │
//! │                                                                         │
//! │  import()       INSERT OR IGNORE by entry id; devices that posted       │
//! │                 offline may bring a second SALE_DELIVERED for an order  │
//! │                                                                         │
//! │  delete_sales() reconciliation only; guarded to SALE_DELIVERED rows     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use tracing::{debug, warn};

use routebook_core::{CoreError, LedgerEntry, LedgerEntryType, Posting};

use super::money;
use crate::error::{DbError, DbResult, WorkflowResult};

// =============================================================================
// Row Types
// =============================================================================

#[derive(Debug, FromRow)]
struct LedgerRow {
    id: String,
    posting_key: String,
    entry_type: LedgerEntryType,
    net_cash: String,
    discount_given: String,
    discount_allowed: String,
    unauthorized_discount: String,
    order_id: Option<String>,
    return_id: Option<String>,
    payment_sequence: Option<i64>,
    branch_id: String,
    created_by: String,
    notes: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<LedgerRow> for LedgerEntry {
    type Error = DbError;

    fn try_from(row: LedgerRow) -> DbResult<Self> {
        Ok(LedgerEntry {
            net_cash: money("ledger_entries.net_cash", &row.net_cash)?,
            discount_given: money("ledger_entries.discount_given", &row.discount_given)?,
            discount_allowed: money("ledger_entries.discount_allowed", &row.discount_allowed)?,
            unauthorized_discount: money(
                "ledger_entries.unauthorized_discount",
                &row.unauthorized_discount,
            )?,
            id: row.id,
            posting_key: row.posting_key,
            entry_type: row.entry_type,
            order_id: row.order_id,
            return_id: row.return_id,
            payment_sequence: row.payment_sequence,
            branch_id: row.branch_id,
            created_by: row.created_by,
            notes: row.notes,
            created_at: row.created_at,
        })
    }
}

const LEDGER_COLUMNS: &str = "id, posting_key, entry_type, net_cash, discount_given, discount_allowed, \
     unauthorized_discount, order_id, return_id, payment_sequence, branch_id, created_by, notes, created_at";

fn into_entries(rows: Vec<LedgerRow>) -> DbResult<Vec<LedgerEntry>> {
    rows.into_iter().map(LedgerEntry::try_from).collect()
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for ledger entries.
#[derive(Debug, Clone)]
pub struct LedgerRepository {
    pool: SqlitePool,
}

impl LedgerRepository {
    /// Creates a new LedgerRepository.
    pub fn new(pool: SqlitePool) -> Self {
        LedgerRepository { pool }
    }

    /// Earliest entry recorded under a posting key.
    pub async fn find_by_key(&self, conn: &mut SqliteConnection, posting_key: &str) -> DbResult<Option<LedgerEntry>> {
        let row: Option<LedgerRow> = sqlx::query_as(&format!(
            "SELECT {LEDGER_COLUMNS} FROM ledger_entries WHERE posting_key = ?1 ORDER BY created_at, id LIMIT 1"
        ))
        .bind(posting_key)
        .fetch_optional(&mut *conn)
        .await?;

        row.map(LedgerEntry::try_from).transpose()
    }

    /// Earliest SALE_DELIVERED entry of an order, whatever its posting key.
    pub async fn find_sale_for_order(
        &self,
        conn: &mut SqliteConnection,
        order_id: &str,
    ) -> DbResult<Option<LedgerEntry>> {
        let row: Option<LedgerRow> = sqlx::query_as(&format!(
            "SELECT {LEDGER_COLUMNS} FROM ledger_entries \
             WHERE entry_type = 'SALE_DELIVERED' AND order_id = ?1 \
             ORDER BY created_at, id LIMIT 1"
        ))
        .bind(order_id)
        .fetch_optional(&mut *conn)
        .await?;

        row.map(LedgerEntry::try_from).transpose()
    }

    /// The stored entry that already records `entry`'s business event.
    async fn find_posted(&self, conn: &mut SqliteConnection, entry: &LedgerEntry) -> DbResult<Option<LedgerEntry>> {
        match (entry.entry_type, entry.order_id.as_deref()) {
            (LedgerEntryType::SaleDelivered, Some(order_id)) => self.find_sale_for_order(conn, order_id).await,
            _ => self.find_by_key(conn, &entry.posting_key).await,
        }
    }

    /// Posts an entry unless its business event is already recorded.
    pub async fn post(&self, conn: &mut SqliteConnection, entry: LedgerEntry) -> DbResult<Posting> {
        if let Some(existing) = self.find_posted(conn, &entry).await? {
            debug!(posting_key = %entry.posting_key, existing_id = %existing.id, "Already posted");
            return Ok(Posting::AlreadyPosted(existing));
        }

        self.insert(conn, &entry).await?;
        Ok(Posting::Created(entry))
    }

    /// Inserts an entry whose posting key must not exist yet.
    pub async fn insert_new(&self, conn: &mut SqliteConnection, entry: LedgerEntry) -> WorkflowResult<()> {
        if self.find_posted(conn, &entry).await?.is_some() {
            return Err(CoreError::DuplicatePosting {
                entry_type: entry.entry_type,
                reference: entry.posting_key,
            }
            .into());
        }

        self.insert(conn, &entry).await?;
        Ok(())
    }

    /// Stores an entry produced elsewhere (a device ledger) as-is.
    ///
    /// Returns `false` when an entry with the same id is already stored.
    /// Posting keys are not checked here; duplicates are left for the
    /// reconciliation job.
    pub async fn import(&self, conn: &mut SqliteConnection, entry: &LedgerEntry) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO ledger_entries (
                id, posting_key, entry_type, net_cash, discount_given, discount_allowed,
                unauthorized_discount, order_id, return_id, payment_sequence,
                branch_id, created_by, notes, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.posting_key)
        .bind(entry.entry_type)
        .bind(entry.net_cash.to_storage())
        .bind(entry.discount_given.to_storage())
        .bind(entry.discount_allowed.to_storage())
        .bind(entry.unauthorized_discount.to_storage())
        .bind(&entry.order_id)
        .bind(&entry.return_id)
        .bind(entry.payment_sequence)
        .bind(&entry.branch_id)
        .bind(&entry.created_by)
        .bind(&entry.notes)
        .bind(entry.created_at)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Every SALE_DELIVERED entry, optionally limited to one branch.
    pub async fn sale_entries(&self, conn: &mut SqliteConnection, branch_id: Option<&str>) -> DbResult<Vec<LedgerEntry>> {
        let rows: Vec<LedgerRow> = match branch_id {
            Some(branch) => {
                sqlx::query_as(&format!(
                    "SELECT {LEDGER_COLUMNS} FROM ledger_entries \
                     WHERE entry_type = 'SALE_DELIVERED' AND branch_id = ?1 \
                     ORDER BY order_id, created_at, id"
                ))
                .bind(branch)
                .fetch_all(&mut *conn)
                .await?
            }
            None => {
                sqlx::query_as(&format!(
                    "SELECT {LEDGER_COLUMNS} FROM ledger_entries \
                     WHERE entry_type = 'SALE_DELIVERED' \
                     ORDER BY order_id, created_at, id"
                ))
                .fetch_all(&mut *conn)
                .await?
            }
        };

        into_entries(rows)
    }

    /// Deletes duplicate sale entries by id. Other entry types are never
    /// deleted, whatever ids are passed.
    pub async fn delete_sales(&self, conn: &mut SqliteConnection, ids: &[String]) -> DbResult<u64> {
        let mut deleted = 0;
        for id in ids {
            let result = sqlx::query(
                "DELETE FROM ledger_entries WHERE id = ?1 AND entry_type = 'SALE_DELIVERED'",
            )
            .bind(id)
            .execute(&mut *conn)
            .await?;

            if result.rows_affected() == 0 {
                warn!(id = %id, "Skipped delete of non-sale or missing ledger entry");
            }
            deleted += result.rows_affected();
        }
        Ok(deleted)
    }

    /// Entries of one branch created in `[start, end)`, oldest first.
    ///
    /// Served by `idx_ledger_branch_time`.
    pub async fn entries_for_branch_between(
        &self,
        branch_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> DbResult<Vec<LedgerEntry>> {
        let rows: Vec<LedgerRow> = sqlx::query_as(&format!(
            "SELECT {LEDGER_COLUMNS} FROM ledger_entries \
             WHERE branch_id = ?1 AND created_at >= ?2 AND created_at < ?3 \
             ORDER BY created_at, id"
        ))
        .bind(branch_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        into_entries(rows)
    }

    /// Entries referencing one order, oldest first.
    pub async fn entries_for_order(&self, order_id: &str) -> DbResult<Vec<LedgerEntry>> {
        let rows: Vec<LedgerRow> = sqlx::query_as(&format!(
            "SELECT {LEDGER_COLUMNS} FROM ledger_entries WHERE order_id = ?1 ORDER BY created_at, id"
        ))
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        into_entries(rows)
    }

    async fn insert(&self, conn: &mut SqliteConnection, entry: &LedgerEntry) -> DbResult<()> {
        debug!(
            id = %entry.id,
            posting_key = %entry.posting_key,
            net_cash = %entry.net_cash,
            "Inserting ledger entry"
        );

        if !self.import(conn, entry).await? {
            return Err(DbError::duplicate("ledger_entries.id", &entry.id));
        }
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use chrono::Duration;
    use routebook_core::ledger::{payment_entry, posting_key, PostingContext};
    use routebook_core::Money;

    fn payment(seq: i64) -> LedgerEntry {
        payment_entry(
            "order-1",
            "lhr",
            Money::from_units(250),
            seq,
            &PostingContext::new("salesman-1", Utc::now()),
        )
        .unwrap()
    }

    fn sale(id: &str, order_id: &str, branch_id: &str, at: DateTime<Utc>) -> LedgerEntry {
        LedgerEntry {
            id: id.to_string(),
            posting_key: posting_key::sale_delivered(order_id),
            entry_type: LedgerEntryType::SaleDelivered,
            net_cash: Money::from_units(800),
            discount_given: Money::zero(),
            discount_allowed: Money::zero(),
            unauthorized_discount: Money::zero(),
            order_id: Some(order_id.to_string()),
            return_id: None,
            payment_sequence: None,
            branch_id: branch_id.to_string(),
            created_by: "salesman-1".to_string(),
            notes: None,
            created_at: at,
        }
    }

    #[tokio::test]
    async fn test_post_is_idempotent_per_key() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.ledger();
        let mut conn = db.pool().acquire().await.unwrap();

        let first = repo.post(&mut conn, payment(1)).await.unwrap();
        assert!(first.is_created());

        let second = repo.post(&mut conn, payment(1)).await.unwrap();
        assert!(!second.is_created());
        assert_eq!(second.entry().id, first.entry().id);

        drop(conn);
        assert_eq!(repo.entries_for_order("order-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_insert_new_rejects_known_key() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.ledger();
        let mut conn = db.pool().acquire().await.unwrap();

        repo.insert_new(&mut conn, payment(1)).await.unwrap();
        let err = repo.insert_new(&mut conn, payment(1)).await.unwrap_err();
        assert!(matches!(
            err.as_core(),
            Some(CoreError::DuplicatePosting { .. })
        ));
    }

    #[tokio::test]
    async fn test_import_ignores_same_id_but_keeps_duplicate_keys() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.ledger();
        let mut conn = db.pool().acquire().await.unwrap();
        let now = Utc::now();

        assert!(repo.import(&mut conn, &sale("s-1", "order-1", "lhr", now)).await.unwrap());
        assert!(!repo.import(&mut conn, &sale("s-1", "order-1", "lhr", now)).await.unwrap());
        assert!(repo
            .import(&mut conn, &sale("s-2", "order-1", "lhr", now + Duration::seconds(5)))
            .await
            .unwrap());

        let sales = repo.sale_entries(&mut conn, Some("lhr")).await.unwrap();
        assert_eq!(sales.len(), 2);
        assert!(repo.sale_entries(&mut conn, Some("khi")).await.unwrap().is_empty());

        let found = repo
            .find_by_key(&mut conn, &posting_key::sale_delivered("order-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, "s-1");
    }

    #[tokio::test]
    async fn test_synced_sale_blocks_server_sale_for_same_order() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.ledger();
        let mut conn = db.pool().acquire().await.unwrap();
        let now = Utc::now();

        let mut synced = sale("s-device", "order-1", "lhr", now);
        synced.posting_key = "device-7:sale".to_string();
        assert!(repo.import(&mut conn, &synced).await.unwrap());

        let posting = repo
            .post(&mut conn, sale("s-server", "order-1", "lhr", now + Duration::seconds(5)))
            .await
            .unwrap();
        assert!(!posting.is_created());
        assert_eq!(posting.entry().id, "s-device");

        let err = repo
            .insert_new(&mut conn, sale("s-strict", "order-1", "lhr", now))
            .await
            .unwrap_err();
        assert!(matches!(err.as_core(), Some(CoreError::DuplicatePosting { .. })));

        assert_eq!(repo.sale_entries(&mut conn, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_sales_never_touches_other_types() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.ledger();
        let mut conn = db.pool().acquire().await.unwrap();

        let pay = payment(1);
        repo.import(&mut conn, &pay).await.unwrap();
        repo.import(&mut conn, &sale("s-1", "order-1", "lhr", Utc::now()))
            .await
            .unwrap();

        let deleted = repo
            .delete_sales(&mut conn, &[pay.id.clone(), "s-1".to_string()])
            .await
            .unwrap();
        assert_eq!(deleted, 1);

        drop(conn);
        let remaining = repo.entries_for_order("order-1").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].entry_type, LedgerEntryType::Payment);
    }
}
