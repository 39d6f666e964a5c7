//! Shared fixtures for unit tests.

use chrono::{TimeZone, Utc};

use crate::money::Money;
use crate::policy::DiscountPolicy;
use crate::totals::{LineInput, OrderTotalsCalculator};
use crate::types::{Order, Percent, Product, SalesUser, Shop, UserRole};

pub fn booker(max_pct: i64, max_amount: i64) -> SalesUser {
    SalesUser {
        id: "booker-1".to_string(),
        name: "Asif".to_string(),
        role: UserRole::Booker,
        branch_id: "lhr".to_string(),
        max_discount_percent: Percent::from_units(max_pct),
        max_discount_amount: Money::from_units(max_amount),
    }
}

pub fn shop(is_active: bool) -> Shop {
    Shop {
        id: "shop-1".to_string(),
        name: "Bismillah Store".to_string(),
        branch_id: "lhr".to_string(),
        is_active,
    }
}

pub fn product(id: &str, price: i64) -> Product {
    Product {
        id: id.to_string(),
        name: format!("Product {id}"),
        category: "tea".to_string(),
        unit_price: Money::from_units(price),
        max_discount_percent: Percent::from_units(10),
    }
}

/// Draft order priced with the default 5% policy.
///
/// Lines are `(quantity, unit price, discount %)`.
pub fn draft_order(lines: &[(i64, i64, i64)], user: &SalesUser) -> Order {
    let policy = DiscountPolicy::default();
    let inputs: Vec<LineInput> = lines
        .iter()
        .enumerate()
        .map(|(n, (qty, price, pct))| {
            LineInput::new(product(&format!("p-{n}"), *price), *qty, Percent::from_units(*pct))
        })
        .collect();
    let priced = OrderTotalsCalculator::new(&policy)
        .calculate(&inputs, user)
        .unwrap();

    let created = Utc.with_ymd_and_hms(2024, 3, 14, 9, 30, 0).unwrap();
    Order::new_draft(
        "order-1".to_string(),
        "ORD-000001".to_string(),
        &shop(true),
        user,
        priced,
        created,
    )
}

/// An order in `assigned` with the given grand total and no discount.
pub fn assigned_order(grand_total: i64) -> Order {
    let mut order = draft_order(&[(1, grand_total, 0)], &booker(15, 0));
    order.status = crate::status::OrderStatus::Assigned;
    order
}
