//! # Ledger Posting
//!
//! Builds immutable ledger entries for cash-affecting events and keeps
//! exactly one entry per business event.
//!
//! ## Posting Keys
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Event                    Posting key                   net_cash        │
//! │  ───────────────────────  ────────────────────────────  ─────────────   │
//! │  order delivered          SALE_DELIVERED:<order>        +grand total    │
//! │  outstanding collected    PAYMENT:<order>:<seq>         +amount         │
//! │  goods returned           RETURN:<return>               -total value    │
//! │  payment corrected        ADJUSTMENT:<order>:<seq>      ±delta          │
//! │                                                                         │
//! │  check key ──► exists? ──yes──► AlreadyPosted(original)                │
//! │                   │                                                     │
//! │                   no ──► insert ──► Created(entry)                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Entries recorded offline can still arrive twice for the same sale. The
//! cleanup plan removes those: per order it keeps the earliest complete
//! SALE_DELIVERED entry and deletes the rest. RETURN entries are never
//! deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::status::OrderStatus;
use crate::types::{Order, ReturnRecord};
use crate::validation::{validate_notes, validate_reference};

// =============================================================================
// Entry Type
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerEntryType {
    SaleDelivered,
    Payment,
    Return,
    Adjustment,
}

impl LedgerEntryType {
    pub const ALL: [LedgerEntryType; 4] = [
        LedgerEntryType::SaleDelivered,
        LedgerEntryType::Payment,
        LedgerEntryType::Return,
        LedgerEntryType::Adjustment,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            LedgerEntryType::SaleDelivered => "SALE_DELIVERED",
            LedgerEntryType::Payment => "PAYMENT",
            LedgerEntryType::Return => "RETURN",
            LedgerEntryType::Adjustment => "ADJUSTMENT",
        }
    }
}

impl fmt::Display for LedgerEntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LedgerEntryType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LedgerEntryType::ALL
            .into_iter()
            .find(|t| t.as_str() == s.trim())
            .ok_or_else(|| CoreError::invalid("entry_type", format!("unknown ledger entry type '{s}'")))
    }
}

// =============================================================================
// Posting Keys
// =============================================================================

/// Deterministic idempotency keys, one per business event.
pub mod posting_key {
    use super::LedgerEntryType;

    pub fn sale_delivered(order_id: &str) -> String {
        format!("{}:{order_id}", LedgerEntryType::SaleDelivered)
    }

    pub fn payment(order_id: &str, sequence: i64) -> String {
        format!("{}:{order_id}:{sequence}", LedgerEntryType::Payment)
    }

    pub fn return_goods(return_id: &str) -> String {
        format!("{}:{return_id}", LedgerEntryType::Return)
    }

    pub fn adjustment(order_id: &str, sequence: i64) -> String {
        format!("{}:{order_id}:{sequence}", LedgerEntryType::Adjustment)
    }

    /// Office corrections have their own sequence space, apart from the
    /// delivery payment sequences.
    pub fn manual_adjustment(order_id: &str, sequence: i64) -> String {
        format!("{}:{order_id}:M{sequence}", LedgerEntryType::Adjustment)
    }
}

// =============================================================================
// Ledger Entry
// =============================================================================

/// An immutable record of one cash-affecting event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LedgerEntry {
    pub id: String,
    pub posting_key: String,
    pub entry_type: LedgerEntryType,
    /// Signed effect on branch cash.
    pub net_cash: Money,
    /// SALE_DELIVERED only; zero otherwise.
    pub discount_given: Money,
    pub discount_allowed: Money,
    pub unauthorized_discount: Money,
    pub order_id: Option<String>,
    pub return_id: Option<String>,
    /// PAYMENT and ADJUSTMENT only.
    pub payment_sequence: Option<i64>,
    pub branch_id: String,
    pub created_by: String,
    pub notes: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// True when every field the entry type requires is filled in.
    ///
    /// Imported entries from older devices may lack a branch or creator.
    pub fn is_complete(&self) -> bool {
        let has = |value: &Option<String>| value.as_deref().is_some_and(|v| !v.trim().is_empty());

        let references = match self.entry_type {
            LedgerEntryType::SaleDelivered => has(&self.order_id),
            LedgerEntryType::Payment | LedgerEntryType::Adjustment => {
                has(&self.order_id) && self.payment_sequence.is_some()
            }
            LedgerEntryType::Return => has(&self.return_id),
        };

        references
            && !self.posting_key.trim().is_empty()
            && !self.branch_id.trim().is_empty()
            && !self.created_by.trim().is_empty()
    }
}

/// Who is posting and when.
#[derive(Debug, Clone)]
pub struct PostingContext {
    pub entry_id: String,
    pub created_by: String,
    pub at: DateTime<Utc>,
}

impl PostingContext {
    /// Context with a fresh entry id.
    pub fn new(created_by: impl Into<String>, at: DateTime<Utc>) -> Self {
        PostingContext {
            entry_id: Uuid::new_v4().to_string(),
            created_by: created_by.into(),
            at,
        }
    }
}

/// Result of a posting request.
#[derive(Debug, Clone, PartialEq)]
pub enum Posting {
    Created(LedgerEntry),
    /// The event was already posted; carries the existing entry.
    AlreadyPosted(LedgerEntry),
}

impl Posting {
    pub fn entry(&self) -> &LedgerEntry {
        match self {
            Posting::Created(entry) | Posting::AlreadyPosted(entry) => entry,
        }
    }

    pub fn into_entry(self) -> LedgerEntry {
        match self {
            Posting::Created(entry) | Posting::AlreadyPosted(entry) => entry,
        }
    }

    #[inline]
    pub fn is_created(&self) -> bool {
        matches!(self, Posting::Created(_))
    }
}

// =============================================================================
// Entry Builders
// =============================================================================

fn entry(
    ctx: &PostingContext,
    entry_type: LedgerEntryType,
    posting_key: String,
    net_cash: Money,
    branch_id: &str,
) -> LedgerEntry {
    LedgerEntry {
        id: ctx.entry_id.clone(),
        posting_key,
        entry_type,
        net_cash,
        discount_given: Money::zero(),
        discount_allowed: Money::zero(),
        unauthorized_discount: Money::zero(),
        order_id: None,
        return_id: None,
        payment_sequence: None,
        branch_id: branch_id.to_string(),
        created_by: ctx.created_by.clone(),
        notes: None,
        created_at: ctx.at,
    }
}

/// SALE_DELIVERED for a delivered order, with the frozen discount audit.
pub fn sale_delivered_entry(order: &Order, ctx: &PostingContext) -> CoreResult<LedgerEntry> {
    if order.status != OrderStatus::Delivered {
        return Err(CoreError::StatusGuard {
            order_id: order.id.clone(),
            current: order.status,
            required: OrderStatus::Delivered,
            operation: "posting the sale".to_string(),
        });
    }

    let mut sale = entry(
        ctx,
        LedgerEntryType::SaleDelivered,
        posting_key::sale_delivered(&order.id),
        order.grand_total(),
        &order.branch_id,
    );
    sale.discount_given = order.totals.total_discount;
    sale.discount_allowed = order.totals.allowed_discount;
    sale.unauthorized_discount = order.totals.unauthorized_discount;
    sale.order_id = Some(order.id.clone());
    Ok(sale)
}

/// PAYMENT for cash collected against an outstanding balance.
pub fn payment_entry(
    order_id: &str,
    branch_id: &str,
    amount: Money,
    sequence: i64,
    ctx: &PostingContext,
) -> CoreResult<LedgerEntry> {
    validate_reference("order_id", order_id)?;
    if !amount.is_positive() {
        return Err(CoreError::invalid("amount", format!("payment {amount} must be positive")));
    }

    let mut payment = entry(
        ctx,
        LedgerEntryType::Payment,
        posting_key::payment(order_id, sequence),
        amount,
        branch_id,
    );
    payment.order_id = Some(order_id.to_string());
    payment.payment_sequence = Some(sequence);
    Ok(payment)
}

/// RETURN for goods taken back; always negative cash.
pub fn return_entry(record: &ReturnRecord, ctx: &PostingContext) -> CoreResult<LedgerEntry> {
    validate_reference("return_id", &record.id)?;
    if record.total_value.is_negative() {
        return Err(CoreError::invalid(
            "total_value",
            format!("return value {} must not be negative", record.total_value),
        ));
    }

    let mut ret = entry(
        ctx,
        LedgerEntryType::Return,
        posting_key::return_goods(&record.id),
        -record.total_value,
        &record.branch_id,
    );
    ret.order_id = record.order_id.clone();
    ret.return_id = Some(record.id.clone());
    ret.notes = Some(record.reason.clone()).filter(|r| !r.trim().is_empty());
    Ok(ret)
}

/// ADJUSTMENT carrying a signed correction.
pub fn adjustment_entry(
    order_id: &str,
    branch_id: &str,
    delta: Money,
    notes: Option<&str>,
    sequence: i64,
    ctx: &PostingContext,
) -> CoreResult<LedgerEntry> {
    validate_reference("order_id", order_id)?;
    let notes = validate_notes(notes)?;
    if delta.is_zero() {
        return Err(CoreError::invalid("delta", "adjustment must change cash"));
    }

    let mut adjustment = entry(
        ctx,
        LedgerEntryType::Adjustment,
        posting_key::adjustment(order_id, sequence),
        delta,
        branch_id,
    );
    adjustment.order_id = Some(order_id.to_string());
    adjustment.payment_sequence = Some(sequence);
    adjustment.notes = Some(notes);
    Ok(adjustment)
}

// =============================================================================
// In-Memory Ledger
// =============================================================================

/// An append-only ledger keyed by posting key.
///
/// Used for offline batches and tests; the database ledger applies the same
/// check-then-insert rule inside a transaction.
#[derive(Debug, Default)]
pub struct LedgerBook {
    entries: Vec<LedgerEntry>,
    by_key: HashMap<String, usize>,
}

impl LedgerBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn find(&self, posting_key: &str) -> Option<&LedgerEntry> {
        self.by_key.get(posting_key).map(|&idx| &self.entries[idx])
    }

    /// Inserts a built entry unless its key is already posted.
    pub fn post(&mut self, entry: LedgerEntry) -> Posting {
        if let Some(existing) = self.find(&entry.posting_key) {
            return Posting::AlreadyPosted(existing.clone());
        }
        self.by_key.insert(entry.posting_key.clone(), self.entries.len());
        self.entries.push(entry.clone());
        Posting::Created(entry)
    }

    /// Strict insert: a known key is an error.
    pub fn insert_new(&mut self, entry: LedgerEntry) -> CoreResult<()> {
        if self.by_key.contains_key(&entry.posting_key) {
            return Err(CoreError::DuplicatePosting {
                entry_type: entry.entry_type,
                reference: entry.posting_key,
            });
        }
        self.post(entry);
        Ok(())
    }

    /// First SALE_DELIVERED entry of an order, whatever key it was posted under.
    pub fn find_sale(&self, order_id: &str) -> Option<&LedgerEntry> {
        self.entries
            .iter()
            .find(|e| e.entry_type == LedgerEntryType::SaleDelivered && e.order_id.as_deref() == Some(order_id))
    }

    /// Posts the order's sale unless one is already recorded for it.
    ///
    /// Looks up by order id: a sale synced from a device carries a
    /// device-local key and still counts.
    pub fn post_sale_delivered(&mut self, order: &Order, ctx: &PostingContext) -> CoreResult<Posting> {
        if let Some(existing) = self.find_sale(&order.id) {
            return Ok(Posting::AlreadyPosted(existing.clone()));
        }
        Ok(self.post(sale_delivered_entry(order, ctx)?))
    }

    pub fn post_payment(
        &mut self,
        order_id: &str,
        branch_id: &str,
        amount: Money,
        sequence: i64,
        ctx: &PostingContext,
    ) -> CoreResult<Posting> {
        Ok(self.post(payment_entry(order_id, branch_id, amount, sequence, ctx)?))
    }

    pub fn post_return(&mut self, record: &ReturnRecord, ctx: &PostingContext) -> CoreResult<Posting> {
        Ok(self.post(return_entry(record, ctx)?))
    }

    pub fn post_adjustment(
        &mut self,
        order_id: &str,
        branch_id: &str,
        delta: Money,
        notes: Option<&str>,
        sequence: i64,
        ctx: &PostingContext,
    ) -> CoreResult<Posting> {
        Ok(self.post(adjustment_entry(order_id, branch_id, delta, notes, sequence, ctx)?))
    }

    /// Applies [`plan_duplicate_cleanup`] and returns the removed entries.
    pub fn cleanup_duplicates(&mut self) -> Vec<LedgerEntry> {
        let plan = plan_duplicate_cleanup(&self.entries);
        if plan.delete.is_empty() {
            return Vec::new();
        }

        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|e| plan.delete.contains(&e.id));
        self.entries = kept;
        self.by_key = self
            .entries
            .iter()
            .enumerate()
            .map(|(idx, e)| (e.posting_key.clone(), idx))
            .collect();
        removed
    }
}

// =============================================================================
// Duplicate Cleanup
// =============================================================================

/// Entries the reconciliation job keeps and deletes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleanupPlan {
    /// One surviving SALE_DELIVERED id per order that had duplicates.
    pub keep: Vec<String>,
    pub delete: Vec<String>,
}

impl CleanupPlan {
    pub fn is_empty(&self) -> bool {
        self.delete.is_empty()
    }
}

/// Groups SALE_DELIVERED entries by order and picks the survivor.
///
/// Survivor: earliest entry with complete fields, else the earliest entry.
/// Ties on `created_at` break on id. Other entry types are never touched.
pub fn plan_duplicate_cleanup(entries: &[LedgerEntry]) -> CleanupPlan {
    let mut by_order: BTreeMap<&str, Vec<&LedgerEntry>> = BTreeMap::new();
    for e in entries {
        if e.entry_type != LedgerEntryType::SaleDelivered {
            continue;
        }
        if let Some(order_id) = e.order_id.as_deref() {
            by_order.entry(order_id).or_default().push(e);
        }
    }

    let mut plan = CleanupPlan::default();
    for (_, mut group) in by_order {
        if group.len() < 2 {
            continue;
        }
        group.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        let survivor = group
            .iter()
            .find(|e| e.is_complete())
            .or_else(|| group.first())
            .map(|e| e.id.clone());

        if let Some(survivor) = survivor {
            plan.delete.extend(
                group
                    .iter()
                    .filter(|e| e.id != survivor)
                    .map(|e| e.id.clone()),
            );
            plan.keep.push(survivor);
        }
    }
    plan
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{booker, draft_order};
    use chrono::Duration;

    fn delivered_order() -> Order {
        let mut order = draft_order(&[(10, 100, 20)], &booker(15, 0));
        order.status = OrderStatus::Delivered;
        order
    }

    fn ctx() -> PostingContext {
        PostingContext::new("kpo-1", Utc::now())
    }

    fn sale(id: &str, order_id: &str, at: DateTime<Utc>) -> LedgerEntry {
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
            branch_id: "lhr".to_string(),
            created_by: "salesman-1".to_string(),
            notes: None,
            created_at: at,
        }
    }

    fn return_record(id: &str, value: i64) -> ReturnRecord {
        ReturnRecord {
            id: id.to_string(),
            order_id: Some("order-1".to_string()),
            shop_id: "shop-1".to_string(),
            branch_id: "lhr".to_string(),
            total_value: Money::from_units(value),
            reason: "expired stock".to_string(),
            created_by: "salesman-1".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_sale_carries_frozen_discount_audit() {
        let order = delivered_order();
        let sale = sale_delivered_entry(&order, &ctx()).unwrap();

        assert_eq!(sale.net_cash, Money::from_units(800));
        assert_eq!(sale.discount_given, Money::from_units(200));
        assert_eq!(sale.discount_allowed, Money::from_units(50));
        assert_eq!(sale.unauthorized_discount, Money::from_units(150));
        assert_eq!(sale.posting_key, "SALE_DELIVERED:order-1");
        assert!(sale.is_complete());
    }

    #[test]
    fn test_sale_requires_delivered_order() {
        let mut order = delivered_order();
        order.status = OrderStatus::Assigned;
        let err = sale_delivered_entry(&order, &ctx()).unwrap_err();
        assert!(matches!(
            err,
            CoreError::StatusGuard {
                current: OrderStatus::Assigned,
                required: OrderStatus::Delivered,
                ..
            }
        ));
    }

    #[test]
    fn test_posting_sale_twice_keeps_one_entry() {
        let order = delivered_order();
        let mut book = LedgerBook::new();

        let first = book.post_sale_delivered(&order, &ctx()).unwrap();
        let second = book.post_sale_delivered(&order, &ctx()).unwrap();

        assert!(first.is_created());
        assert!(!second.is_created());
        assert_eq!(second.entry().id, first.entry().id);
        assert_eq!(book.entries().len(), 1);
    }

    #[test]
    fn test_synced_sale_under_device_key_blocks_second_sale() {
        let order = delivered_order();
        let mut synced = sale_delivered_entry(&order, &ctx()).unwrap();
        synced.posting_key = "device-7:sale".to_string();

        let mut book = LedgerBook::new();
        book.insert_new(synced.clone()).unwrap();

        let posting = book.post_sale_delivered(&order, &ctx()).unwrap();
        assert!(!posting.is_created());
        assert_eq!(posting.entry().id, synced.id);
        assert_eq!(book.entries().len(), 1);
    }

    #[test]
    fn test_payment_must_be_positive_and_is_keyed_by_sequence() {
        let mut book = LedgerBook::new();
        let err = book
            .post_payment("order-1", "lhr", Money::zero(), 1, &ctx())
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput { ref field, .. } if field == "amount"));

        book.post_payment("order-1", "lhr", Money::from_units(500), 1, &ctx()).unwrap();
        let replay = book
            .post_payment("order-1", "lhr", Money::from_units(500), 1, &ctx())
            .unwrap();
        assert!(!replay.is_created());
        book.post_payment("order-1", "lhr", Money::from_units(500), 2, &ctx()).unwrap();
        assert_eq!(book.entries().len(), 2);
    }

    #[test]
    fn test_return_posts_negative_cash_once() {
        let mut book = LedgerBook::new();
        let posted = book.post_return(&return_record("ret-1", 300), &ctx()).unwrap();
        assert_eq!(posted.entry().net_cash, Money::from_units(-300));
        assert_eq!(posted.entry().return_id.as_deref(), Some("ret-1"));

        assert!(!book.post_return(&return_record("ret-1", 300), &ctx()).unwrap().is_created());
        assert!(book.post_return(&return_record("ret-2", -5), &ctx()).is_err());
        assert_eq!(book.entries().len(), 1);
    }

    #[test]
    fn test_adjustment_requires_notes_and_nonzero_delta() {
        let mut book = LedgerBook::new();
        let err = book
            .post_adjustment("order-1", "lhr", Money::from_units(-100), Some(""), 3, &ctx())
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput { ref field, .. } if field == "notes"));

        let err = book
            .post_adjustment("order-1", "lhr", Money::zero(), Some("recount"), 3, &ctx())
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput { ref field, .. } if field == "delta"));

        let posted = book
            .post_adjustment("order-1", "lhr", Money::from_units(-100), Some("recount"), 3, &ctx())
            .unwrap();
        assert_eq!(posted.entry().net_cash, Money::from_units(-100));
        assert_eq!(posted.entry().notes.as_deref(), Some("recount"));
    }

    #[test]
    fn test_strict_insert_reports_duplicate() {
        let mut book = LedgerBook::new();
        let order = delivered_order();
        book.post_sale_delivered(&order, &ctx()).unwrap();

        let err = book
            .insert_new(sale_delivered_entry(&order, &ctx()).unwrap())
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::DuplicatePosting {
                entry_type: LedgerEntryType::SaleDelivered,
                ..
            }
        ));
    }

    #[test]
    fn test_cleanup_keeps_earliest_complete_sale() {
        let t0 = Utc::now();
        let mut incomplete = sale("a", "order-1", t0);
        incomplete.created_by = String::new();
        let entries = vec![
            incomplete,
            sale("b", "order-1", t0 + Duration::minutes(1)),
            sale("c", "order-1", t0 + Duration::minutes(2)),
            sale("d", "order-2", t0),
        ];

        let plan = plan_duplicate_cleanup(&entries);
        assert_eq!(plan.keep, vec!["b".to_string()]);
        let mut deleted = plan.delete.clone();
        deleted.sort();
        assert_eq!(deleted, vec!["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_cleanup_falls_back_to_earliest_and_ignores_returns() {
        let t0 = Utc::now();
        let mut first = sale("x", "order-1", t0);
        first.branch_id = String::new();
        let mut second = sale("y", "order-1", t0 + Duration::seconds(5));
        second.branch_id = String::new();

        let mut book = LedgerBook::new();
        book.insert_new(first).unwrap();
        // imported duplicate under a device-local key
        second.posting_key = "device-7:sale".to_string();
        book.insert_new(second).unwrap();
        book.post_return(&return_record("ret-1", 100), &ctx()).unwrap();

        let removed = book.cleanup_duplicates();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, "y");
        assert_eq!(book.entries().len(), 2);
        assert!(book.find(&posting_key::return_goods("ret-1")).is_some());
        assert!(book.find(&posting_key::sale_delivered("order-1")).is_some());
    }
}
