//! # Order State Machine
//!
//! Closed set of order statuses with an explicit transition table.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  draft ──► submitted ──► finalized ──► billed ──► load_form_ready      │
//! │    │           │             │                         │    │          │
//! │    │           ├──► rejected │                         │    ▼          │
//! │    │           ├──► edit_requested                     │  assigned     │
//! │    ▼           ▼             ▼                         ▼    │          │
//! │  cancelled ◄───┴─────────────┘                    delivered ◄┘         │
//! │                                                                         │
//! │  Guards:                                                               │
//! │  • draft → submitted     ≥1 item, valid shop, acknowledged discount   │
//! │  • finalized … assigned  forward only (skips allowed, never back)     │
//! │  • → delivered           deliverable + payment recorded on delivery   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every operation validates before it mutates: on error the order is
//! exactly as it was.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

use crate::delivery::Delivery;
use crate::error::{CoreError, CoreResult};
use crate::totals::PricedOrder;
use crate::types::{Order, Shop};

// =============================================================================
// Order Status
// =============================================================================

/// The status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Booker is still editing.
    Draft,
    /// Sent to the branch office.
    Submitted,
    /// Approved by the KPO.
    Finalized,
    Billed,
    /// Load form printed; deliverable.
    LoadFormReady,
    /// Assigned to a salesman; deliverable.
    Assigned,
    Delivered,
    Rejected,
    /// KPO sent the order back to the booker.
    EditRequested,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 10] = [
        OrderStatus::Draft,
        OrderStatus::Submitted,
        OrderStatus::Finalized,
        OrderStatus::Billed,
        OrderStatus::LoadFormReady,
        OrderStatus::Assigned,
        OrderStatus::Delivered,
        OrderStatus::Rejected,
        OrderStatus::EditRequested,
        OrderStatus::Cancelled,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Draft => "draft",
            OrderStatus::Submitted => "submitted",
            OrderStatus::Finalized => "finalized",
            OrderStatus::Billed => "billed",
            OrderStatus::LoadFormReady => "load_form_ready",
            OrderStatus::Assigned => "assigned",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Rejected => "rejected",
            OrderStatus::EditRequested => "edit_requested",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Deliverable iff `load_form_ready` or `assigned`.
    #[inline]
    pub const fn is_deliverable(&self) -> bool {
        matches!(self, OrderStatus::LoadFormReady | OrderStatus::Assigned)
    }

    /// No transition leaves a terminal status.
    #[inline]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered
                | OrderStatus::Rejected
                | OrderStatus::EditRequested
                | OrderStatus::Cancelled
        )
    }

    /// Statuses reachable in one step.
    pub const fn allowed_targets(&self) -> &'static [OrderStatus] {
        use OrderStatus::*;
        match self {
            Draft => &[Submitted, Cancelled],
            Submitted => &[Finalized, Rejected, EditRequested, Cancelled],
            Finalized => &[Billed, LoadFormReady, Assigned, Cancelled],
            Billed => &[LoadFormReady, Assigned],
            LoadFormReady => &[Assigned, Delivered],
            Assigned => &[Delivered],
            Delivered | Rejected | EditRequested | Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, target: OrderStatus) -> bool {
        self.allowed_targets().contains(&target)
    }
}

impl Default for OrderStatus {
    fn default() -> Self {
        OrderStatus::Draft
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s.trim())
            .ok_or_else(|| CoreError::invalid("status", format!("unknown order status '{s}'")))
    }
}

// =============================================================================
// State Machine
// =============================================================================

/// Applies guarded status transitions to an [`Order`].
pub struct OrderStateMachine;

impl OrderStateMachine {
    /// Checks a transition against the table without touching the order.
    pub fn check(order: &Order, target: OrderStatus) -> CoreResult<()> {
        if order.status.can_transition_to(target) {
            Ok(())
        } else {
            Err(CoreError::IllegalStateTransition {
                order_id: order.id.clone(),
                current: order.status,
                attempted: target,
            })
        }
    }

    /// `draft → submitted`.
    ///
    /// ## Two-Phase Confirmation
    /// ```text
    /// submit(ack = false) ──► UnauthorizedDiscountUnacknowledged { amount }
    ///        │                          │
    ///        │                 UI: "Discount 150.00 exceeds your limit.
    ///        │                      It will be deducted. Continue?"
    ///        ▼                          │
    /// submit(ack = true)  ◄─────────────┘
    /// ```
    pub fn submit(
        order: &mut Order,
        shop: Option<&Shop>,
        acknowledge_unauthorized: bool,
        now: DateTime<Utc>,
    ) -> CoreResult<()> {
        Self::check(order, OrderStatus::Submitted)?;

        if order.items.is_empty() {
            return Err(CoreError::invalid("items", "order has no items"));
        }

        match shop {
            Some(shop) if shop.id == order.shop_id => {
                if !shop.is_active {
                    return Err(CoreError::invalid("shop_id", format!("shop {} is inactive", shop.id)));
                }
            }
            _ => return Err(CoreError::not_found("Shop", order.shop_id.clone())),
        }

        if order.totals.has_unauthorized_discount() && !acknowledge_unauthorized {
            return Err(CoreError::UnauthorizedDiscountUnacknowledged {
                order_id: order.id.clone(),
                amount: order.totals.unauthorized_discount,
            });
        }

        order.status = OrderStatus::Submitted;
        order.unauthorized_acknowledged = order.totals.has_unauthorized_discount();
        order.submitted_at = Some(now);
        order.updated_at = now;
        Ok(())
    }

    /// Unguarded moves: KPO decisions, administrative progression and
    /// cancellation. Submission and delivery have their own entry points.
    pub fn transition(order: &mut Order, target: OrderStatus, now: DateTime<Utc>) -> CoreResult<()> {
        match target {
            OrderStatus::Submitted => Err(CoreError::invalid(
                "target_status",
                "submission goes through submit with the shop and acknowledgement",
            )),
            OrderStatus::Delivered => Err(CoreError::invalid(
                "target_status",
                "delivery goes through mark_delivered with the recorded delivery",
            )),
            _ => {
                Self::check(order, target)?;
                order.status = target;
                order.updated_at = now;
                Ok(())
            }
        }
    }

    /// `load_form_ready | assigned → delivered`.
    ///
    /// Requires the order's delivery to have recorded at least one payment
    /// (zero is a valid amount) that does not exceed the grand total.
    pub fn mark_delivered(order: &mut Order, delivery: &Delivery, now: DateTime<Utc>) -> CoreResult<()> {
        Self::check(order, OrderStatus::Delivered)?;

        if delivery.order_id != order.id {
            return Err(CoreError::not_found("Delivery for order", order.id.clone()));
        }
        if delivery.payment_history.is_empty() {
            return Err(CoreError::invalid(
                "delivery",
                format!("no payment recorded on delivery {}", delivery.id),
            ));
        }
        if delivery.paid_amount > order.grand_total() {
            return Err(CoreError::AmountOutOfRange {
                field: "paid amount".to_string(),
                amount: delivery.paid_amount,
                min: crate::money::Money::zero(),
                max: order.grand_total(),
            });
        }

        order.status = OrderStatus::Delivered;
        order.apply_settlement(delivery, now);
        order.delivered_at = Some(now);
        Ok(())
    }

    /// Replaces the priced lines of a draft order.
    pub fn reprice(order: &mut Order, priced: PricedOrder, now: DateTime<Utc>) -> CoreResult<()> {
        if order.status != OrderStatus::Draft {
            return Err(CoreError::StatusGuard {
                order_id: order.id.clone(),
                current: order.status,
                required: OrderStatus::Draft,
                operation: "editing items".to_string(),
            });
        }

        order.remaining_balance = priced.totals.grand_total;
        order.items = priced.items;
        order.totals = priced.totals;
        order.updated_at = now;
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::{Delivery, PaymentRequest};
    use crate::money::Money;
    use crate::test_support::{booker, draft_order, shop};
    use crate::types::PaymentMode;

    fn order_in(status: OrderStatus) -> Order {
        let mut order = draft_order(&[(10, 100, 5)], &booker(15, 0));
        order.status = status;
        order
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in OrderStatus::ALL {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
        assert!("shipped".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_deliverable_states() {
        let deliverable: Vec<_> = OrderStatus::ALL
            .into_iter()
            .filter(OrderStatus::is_deliverable)
            .collect();
        assert_eq!(deliverable, vec![OrderStatus::LoadFormReady, OrderStatus::Assigned]);
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for status in OrderStatus::ALL.into_iter().filter(OrderStatus::is_terminal) {
            assert!(status.allowed_targets().is_empty(), "{status} should be terminal");
        }
    }

    #[test]
    fn test_submit_requires_items_and_shop() {
        let now = Utc::now();
        let mut empty = order_in(OrderStatus::Draft);
        empty.items.clear();
        let err = OrderStateMachine::submit(&mut empty, Some(&shop(true)), false, now).unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput { ref field, .. } if field == "items"));
        assert_eq!(empty.status, OrderStatus::Draft);

        let mut order = order_in(OrderStatus::Draft);
        let err = OrderStateMachine::submit(&mut order, None, false, now).unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));

        let err = OrderStateMachine::submit(&mut order, Some(&shop(false)), false, now).unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput { ref field, .. } if field == "shop_id"));
        assert_eq!(order.status, OrderStatus::Draft);

        OrderStateMachine::submit(&mut order, Some(&shop(true)), false, now).unwrap();
        assert_eq!(order.status, OrderStatus::Submitted);
        assert_eq!(order.submitted_at, Some(now));
        assert!(!order.unauthorized_acknowledged);
    }

    #[test]
    fn test_submit_with_unauthorized_discount_needs_acknowledgement() {
        let now = Utc::now();
        // 20% against a 5% category limit
        let mut order = draft_order(&[(10, 100, 20)], &booker(15, 0));

        let err = OrderStateMachine::submit(&mut order, Some(&shop(true)), false, now).unwrap_err();
        match err {
            CoreError::UnauthorizedDiscountUnacknowledged { amount, .. } => {
                assert_eq!(amount, Money::from_units(150))
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(order.status, OrderStatus::Draft);
        assert!(order.submitted_at.is_none());

        OrderStateMachine::submit(&mut order, Some(&shop(true)), true, now).unwrap();
        assert_eq!(order.status, OrderStatus::Submitted);
        assert!(order.unauthorized_acknowledged);
    }

    #[test]
    fn test_submit_twice_is_illegal() {
        let mut order = order_in(OrderStatus::Submitted);
        let err = OrderStateMachine::submit(&mut order, Some(&shop(true)), true, Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            CoreError::IllegalStateTransition {
                current: OrderStatus::Submitted,
                attempted: OrderStatus::Submitted,
                ..
            }
        ));
    }

    #[test]
    fn test_administrative_progression_is_forward_only() {
        let now = Utc::now();
        let mut order = order_in(OrderStatus::Submitted);
        let totals_before = order.totals.clone();

        OrderStateMachine::transition(&mut order, OrderStatus::Finalized, now).unwrap();
        OrderStateMachine::transition(&mut order, OrderStatus::Billed, now).unwrap();

        let err = OrderStateMachine::transition(&mut order, OrderStatus::Finalized, now).unwrap_err();
        assert!(matches!(
            err,
            CoreError::IllegalStateTransition {
                current: OrderStatus::Billed,
                attempted: OrderStatus::Finalized,
                ..
            }
        ));
        assert_eq!(order.status, OrderStatus::Billed);

        OrderStateMachine::transition(&mut order, OrderStatus::Assigned, now).unwrap();
        assert!(order.status.is_deliverable());
        assert_eq!(order.totals, totals_before);
    }

    #[test]
    fn test_cancel_only_from_early_states() {
        let now = Utc::now();
        for status in [OrderStatus::Draft, OrderStatus::Submitted, OrderStatus::Finalized] {
            let mut order = order_in(status);
            OrderStateMachine::transition(&mut order, OrderStatus::Cancelled, now).unwrap();
        }
        for status in [OrderStatus::Billed, OrderStatus::Assigned, OrderStatus::Delivered] {
            let mut order = order_in(status);
            assert!(OrderStateMachine::transition(&mut order, OrderStatus::Cancelled, now).is_err());
            assert_eq!(order.status, status);
        }
    }

    #[test]
    fn test_guarded_targets_are_refused_by_transition() {
        let now = Utc::now();
        let mut order = order_in(OrderStatus::Draft);
        assert!(OrderStateMachine::transition(&mut order, OrderStatus::Submitted, now).is_err());

        let mut order = order_in(OrderStatus::Assigned);
        assert!(OrderStateMachine::transition(&mut order, OrderStatus::Delivered, now).is_err());
        assert_eq!(order.status, OrderStatus::Assigned);
    }

    #[test]
    fn test_mark_delivered_requires_recorded_payment() {
        let now = Utc::now();
        let mut order = order_in(OrderStatus::Assigned);
        let mut delivery = Delivery::for_order(&order, "dlv-1".to_string(), now).unwrap();

        let err = OrderStateMachine::mark_delivered(&mut order, &delivery, now).unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput { ref field, .. } if field == "delivery"));
        assert_eq!(order.status, OrderStatus::Assigned);

        delivery
            .record_payment(PaymentRequest::new(1, Money::from_units(400)), now)
            .unwrap();
        OrderStateMachine::mark_delivered(&mut order, &delivery, now).unwrap();

        assert_eq!(order.status, OrderStatus::Delivered);
        assert_eq!(order.paid_amount, Money::from_units(400));
        assert_eq!(order.remaining_balance, Money::from_units(550));
        assert_eq!(order.payment_mode, Some(PaymentMode::Credit));
    }

    #[test]
    fn test_mark_delivered_from_non_deliverable_state() {
        let now = Utc::now();
        let mut assigned = order_in(OrderStatus::Assigned);
        let delivery = Delivery::for_order(&assigned, "dlv-1".to_string(), now).unwrap();
        assigned.status = OrderStatus::Billed;

        let err = OrderStateMachine::mark_delivered(&mut assigned, &delivery, now).unwrap_err();
        assert!(matches!(
            err,
            CoreError::IllegalStateTransition {
                current: OrderStatus::Billed,
                attempted: OrderStatus::Delivered,
                ..
            }
        ));
    }

    #[test]
    fn test_reprice_only_in_draft() {
        let now = Utc::now();
        let user = booker(15, 0);
        let replacement = draft_order(&[(2, 50, 0)], &user);
        let priced = PricedOrder {
            items: replacement.items.clone(),
            totals: replacement.totals.clone(),
        };

        let mut submitted = order_in(OrderStatus::Submitted);
        let err = OrderStateMachine::reprice(&mut submitted, priced.clone(), now).unwrap_err();
        assert!(matches!(err, CoreError::StatusGuard { .. }));

        let mut draft = order_in(OrderStatus::Draft);
        OrderStateMachine::reprice(&mut draft, priced, now).unwrap();
        assert_eq!(draft.grand_total(), Money::from_units(100));
        assert_eq!(draft.remaining_balance, Money::from_units(100));
    }
}
