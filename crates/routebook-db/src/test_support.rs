//! Shared fixtures for database tests.

use chrono::{TimeZone, Utc};

use routebook_core::totals::LineInput;
use routebook_core::{
    DiscountPolicy, Money, Order, OrderStatus, OrderTotalsCalculator, Percent, Product, SalesUser, Shop,
    UserRole,
};

use crate::pool::Database;

pub const BRANCH: &str = "lhr";

fn user(id: &str, role: UserRole, max_pct: i64) -> SalesUser {
    SalesUser {
        id: id.to_string(),
        name: id.to_string(),
        role,
        branch_id: BRANCH.to_string(),
        max_discount_percent: Percent::from_units(max_pct),
        max_discount_amount: Money::zero(),
    }
}

pub fn booker() -> SalesUser {
    user("booker-1", UserRole::Booker, 15)
}

pub fn shop(id: &str, is_active: bool) -> Shop {
    Shop {
        id: id.to_string(),
        name: format!("Shop {id}"),
        branch_id: BRANCH.to_string(),
        is_active,
    }
}

pub fn product(id: &str, category: &str, price: i64, max_pct: i64) -> Product {
    Product {
        id: id.to_string(),
        name: format!("Product {id}"),
        category: category.to_string(),
        unit_price: Money::from_units(price),
        max_discount_percent: Percent::from_units(max_pct),
    }
}

/// Users, shops and products used across the db tests.
///
/// | id | notes |
/// |---|---|
/// | `booker-1` | booker, 15% limit, no amount cap |
/// | `salesman-1`, `admin-1` | |
/// | `shop-1` / `shop-2` | active / inactive, branch `lhr` |
/// | `p-tea` | 100 each, tea (10%) |
/// | `p-soap` | 50 each, soap (category limit 2%) |
pub async fn seed_reference(db: &Database) {
    let reference = db.reference();
    reference.upsert_user(&booker()).await.unwrap();
    reference
        .upsert_user(&user("salesman-1", UserRole::Salesman, 0))
        .await
        .unwrap();
    reference
        .upsert_user(&user("admin-1", UserRole::Admin, 0))
        .await
        .unwrap();
    reference.upsert_shop(&shop("shop-1", true)).await.unwrap();
    reference.upsert_shop(&shop("shop-2", false)).await.unwrap();
    reference
        .upsert_product(&product("p-tea", "tea", 100, 10))
        .await
        .unwrap();
    reference
        .upsert_product(&product("p-soap", "soap", 50, 10))
        .await
        .unwrap();
    reference
        .set_category_limit("soap", Percent::from_units(2))
        .await
        .unwrap();
}

/// Draft order for `booker-1` at `shop-1`, priced with the default policy.
///
/// Lines are `(quantity, unit price, discount %)`.
pub fn sample_order(id: &str, lines: &[(i64, i64, i64)]) -> Order {
    let inputs: Vec<LineInput> = lines
        .iter()
        .enumerate()
        .map(|(n, (qty, price, pct))| {
            LineInput::new(product(&format!("p-{n}"), "tea", *price, 10), *qty, Percent::from_units(*pct))
        })
        .collect();
    let priced = OrderTotalsCalculator::new(&DiscountPolicy::default())
        .calculate(&inputs, &booker())
        .unwrap();

    let created = Utc.with_ymd_and_hms(2024, 3, 14, 9, 30, 0).unwrap();
    Order::new_draft(
        id.to_string(),
        "ORD-000001".to_string(),
        &shop("shop-1", true),
        &booker(),
        priced,
        created,
    )
}

/// Stores an `assigned` order with one undiscounted line worth `grand_total`.
pub async fn assigned_in_db(db: &Database, id: &str, grand_total: i64) -> Order {
    let mut order = sample_order(id, &[(1, grand_total, 0)]);
    order.status = OrderStatus::Assigned;

    let mut tx = db.begin().await.unwrap();
    let seq = db.orders().next_order_seq(&mut tx).await.unwrap();
    order.order_number = routebook_core::format_order_number(seq);
    db.orders().insert(&mut tx, &order, seq).await.unwrap();
    tx.commit().await.unwrap();
    order
}
