//! # Order Totals
//!
//! Derives line and order totals and the unauthorized discount.
//!
//! ## Two Independent Unauthorized Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Per line:   discount % > effective max %                              │
//! │              unauthorized = discount - line_total × max%               │
//! │                                                                         │
//! │  Per order:  allowed discount > booker's absolute cap (if nonzero)     │
//! │              excess = allowed - cap                                    │
//! │                                                                         │
//! │  unauthorized_discount = Σ line unauthorized + order excess            │
//! │                                                                         │
//! │  Both checks always run. The order check measures only discount the    │
//! │  line check did not already flag, so no amount is counted twice and    │
//! │  unauthorized_discount ≤ total_discount.                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All arithmetic is exact decimal; nothing is rounded before aggregation.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::policy::DiscountPolicy;
use crate::types::{OrderItem, Percent, Product, SalesUser};
use crate::validation::{validate_discount_percent, validate_item_count, validate_quantity};

// =============================================================================
// Inputs and Outputs
// =============================================================================

/// One requested order line: `(product, quantity, discount %)`.
#[derive(Debug, Clone)]
pub struct LineInput {
    pub product: Product,
    pub quantity: i64,
    pub discount_percent: Percent,
}

impl LineInput {
    pub fn new(product: Product, quantity: i64, discount_percent: Percent) -> Self {
        LineInput {
            product,
            quantity,
            discount_percent,
        }
    }
}

/// Order-level totals, frozen on the order when its items are priced.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OrderTotals {
    /// Σ line totals.
    pub subtotal: Money,
    /// Σ line discount amounts.
    pub total_discount: Money,
    /// Σ min(discount, line_total × effective max%).
    pub allowed_discount: Money,
    /// Σ per-line unauthorized amounts.
    pub line_unauthorized_discount: Money,
    /// Allowed discount beyond the booker's absolute cap.
    pub order_level_excess: Money,
    /// line_unauthorized_discount + order_level_excess
    pub unauthorized_discount: Money,
    /// subtotal - total_discount
    pub grand_total: Money,
}

impl OrderTotals {
    #[inline]
    pub fn has_unauthorized_discount(&self) -> bool {
        self.unauthorized_discount.is_positive()
    }
}

/// Priced lines plus their totals.
#[derive(Debug, Clone, PartialEq)]
pub struct PricedOrder {
    pub items: Vec<OrderItem>,
    pub totals: OrderTotals,
}

// =============================================================================
// Calculator
// =============================================================================

/// Prices order lines against a [`DiscountPolicy`].
#[derive(Debug, Clone, Copy)]
pub struct OrderTotalsCalculator<'a> {
    policy: &'a DiscountPolicy,
}

impl<'a> OrderTotalsCalculator<'a> {
    pub fn new(policy: &'a DiscountPolicy) -> Self {
        OrderTotalsCalculator { policy }
    }

    /// Prices every line for `user` and aggregates the order totals.
    ///
    /// ## Errors
    /// `InvalidInput` for a negative quantity, a discount outside 0..=100%
    /// or a negative unit price. Nothing is partially computed.
    pub fn calculate(&self, lines: &[LineInput], user: &SalesUser) -> CoreResult<PricedOrder> {
        validate_item_count(lines.len())?;

        let mut items = Vec::with_capacity(lines.len());
        for line in lines {
            validate_quantity(line.quantity)?;
            validate_discount_percent(line.discount_percent)?;
            if line.product.unit_price.is_negative() {
                return Err(CoreError::invalid(
                    "unit_price",
                    format!("product {} has a negative price", line.product.id),
                ));
            }

            let effective_max = self.policy.effective_max_discount(
                &line.product.category,
                line.product.max_discount_percent,
                user,
            );

            items.push(price_line(
                LineSnapshot {
                    product_id: &line.product.id,
                    product_name: &line.product.name,
                    category: &line.product.category,
                    quantity: line.quantity,
                    unit_price: line.product.unit_price,
                    discount_percent: line.discount_percent,
                },
                effective_max,
            ));
        }

        let totals = aggregate(&items, user.discount_cap());
        Ok(PricedOrder { items, totals })
    }
}

/// Frozen inputs of one line.
#[derive(Debug, Clone, Copy)]
pub struct LineSnapshot<'s> {
    pub product_id: &'s str,
    pub product_name: &'s str,
    pub category: &'s str,
    pub quantity: i64,
    pub unit_price: Money,
    pub discount_percent: Percent,
}

/// Prices a single line against its effective limit.
pub fn price_line(line: LineSnapshot<'_>, effective_max: Percent) -> OrderItem {
    let line_total = line.unit_price * line.quantity;
    let discount_amount = line_total.percent(line.discount_percent);
    let is_unauthorized = line.discount_percent > effective_max;
    let unauthorized_amount = if is_unauthorized {
        discount_amount - line_total.percent(effective_max)
    } else {
        Money::zero()
    };

    OrderItem {
        product_id: line.product_id.to_string(),
        product_name: line.product_name.to_string(),
        category: line.category.to_string(),
        quantity: line.quantity,
        unit_price: line.unit_price,
        discount_percent: line.discount_percent,
        line_total,
        discount_amount,
        final_amount: line_total - discount_amount,
        effective_max_discount: effective_max,
        is_unauthorized_discount: is_unauthorized,
        unauthorized_amount,
    }
}

/// Sums priced lines and applies the order-level cap check.
pub fn aggregate(items: &[OrderItem], discount_cap: Option<Money>) -> OrderTotals {
    let subtotal: Money = items.iter().map(|i| i.line_total).sum();
    let total_discount: Money = items.iter().map(|i| i.discount_amount).sum();
    let allowed_discount: Money = items.iter().map(OrderItem::allowed_discount).sum();
    let line_unauthorized_discount: Money = items.iter().map(|i| i.unauthorized_amount).sum();

    let order_level_excess = discount_cap
        .map(|cap| (allowed_discount - cap).non_negative())
        .unwrap_or_default();

    OrderTotals {
        subtotal,
        total_discount,
        allowed_discount,
        line_unauthorized_discount,
        order_level_excess,
        unauthorized_discount: line_unauthorized_discount + order_level_excess,
        grand_total: subtotal - total_discount,
    }
}

/// Re-derives frozen lines and totals from their snapshot fields.
///
/// Uses each line's frozen effective limit, so the result matches what was
/// stored at submission regardless of later policy changes.
pub fn recalculate(items: &[OrderItem], discount_cap: Option<Money>) -> CoreResult<PricedOrder> {
    let mut repriced = Vec::with_capacity(items.len());
    for item in items {
        validate_quantity(item.quantity)?;
        validate_discount_percent(item.discount_percent)?;
        repriced.push(price_line(
            LineSnapshot {
                product_id: &item.product_id,
                product_name: &item.product_name,
                category: &item.category,
                quantity: item.quantity,
                unit_price: item.unit_price,
                discount_percent: item.discount_percent,
            },
            item.effective_max_discount,
        ));
    }

    let totals = aggregate(&repriced, discount_cap);
    Ok(PricedOrder {
        items: repriced,
        totals,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UserRole;

    fn dec(raw: &str) -> Money {
        Money::from_storage(raw).unwrap()
    }

    fn product(id: &str, category: &str, price: Money, max_pct: i64) -> Product {
        Product {
            id: id.to_string(),
            name: format!("Product {id}"),
            category: category.to_string(),
            unit_price: price,
            max_discount_percent: Percent::from_units(max_pct),
        }
    }

    fn booker(max_pct: i64, max_amount: i64) -> SalesUser {
        SalesUser {
            id: "booker-1".to_string(),
            name: "Asif".to_string(),
            role: UserRole::Booker,
            branch_id: "lhr".to_string(),
            max_discount_percent: Percent::from_units(max_pct),
            max_discount_amount: Money::from_units(max_amount),
        }
    }

    #[test]
    fn test_scenario_a_line_over_category_limit() {
        let policy = DiscountPolicy::new(Percent::from_units(20)).with_category("tea", Percent::from_units(5));
        let line = LineInput::new(
            product("p-1", "tea", Money::from_units(100), 25),
            10,
            Percent::from_units(20),
        );

        let priced = OrderTotalsCalculator::new(&policy)
            .calculate(&[line], &booker(15, 0))
            .unwrap();
        let item = &priced.items[0];

        assert_eq!(item.line_total, Money::from_units(1000));
        assert_eq!(item.discount_amount, Money::from_units(200));
        assert_eq!(item.effective_max_discount, Percent::from_units(5));
        assert!(item.is_unauthorized_discount);
        assert_eq!(item.unauthorized_amount, Money::from_units(150));
        assert_eq!(item.final_amount, Money::from_units(800));

        assert_eq!(priced.totals.allowed_discount, Money::from_units(50));
        assert_eq!(priced.totals.unauthorized_discount, Money::from_units(150));
        assert!(priced.totals.has_unauthorized_discount());
    }

    #[test]
    fn test_scenario_d_order_cap_without_line_breach() {
        let policy = DiscountPolicy::new(Percent::from_units(20));
        let lines = [
            LineInput::new(product("p-1", "soap", Money::from_units(100), 20), 50, Percent::from_units(15)),
            LineInput::new(product("p-2", "soap", Money::from_units(100), 20), 50, Percent::from_units(15)),
        ];

        let priced = OrderTotalsCalculator::new(&policy)
            .calculate(&lines, &booker(15, 1000))
            .unwrap();

        assert!(priced.items.iter().all(|i| !i.is_unauthorized_discount));
        assert_eq!(priced.totals.total_discount, Money::from_units(1500));
        assert_eq!(priced.totals.line_unauthorized_discount, Money::zero());
        assert_eq!(priced.totals.order_level_excess, Money::from_units(500));
        assert_eq!(priced.totals.unauthorized_discount, Money::from_units(500));
    }

    #[test]
    fn test_both_sources_are_summed_without_double_counting() {
        let policy = DiscountPolicy::new(Percent::from_units(10));
        let lines = [
            // 1000 at 20%, limit 10% → 100 allowed, 100 unauthorized
            LineInput::new(product("p-1", "tea", Money::from_units(100), 10), 10, Percent::from_units(20)),
            // 2000 at 10% → 200 allowed
            LineInput::new(product("p-2", "tea", Money::from_units(200), 10), 10, Percent::from_units(10)),
        ];

        let priced = OrderTotalsCalculator::new(&policy)
            .calculate(&lines, &booker(10, 250))
            .unwrap();
        let totals = &priced.totals;

        assert_eq!(totals.total_discount, Money::from_units(400));
        assert_eq!(totals.allowed_discount, Money::from_units(300));
        assert_eq!(totals.line_unauthorized_discount, Money::from_units(100));
        assert_eq!(totals.order_level_excess, Money::from_units(50));
        assert_eq!(totals.unauthorized_discount, Money::from_units(150));
        assert!(totals.unauthorized_discount <= totals.total_discount);
    }

    #[test]
    fn test_zero_cap_means_no_order_level_check() {
        let policy = DiscountPolicy::new(Percent::from_units(50));
        let line = LineInput::new(product("p-1", "tea", Money::from_units(1000), 50), 100, Percent::from_units(40));

        let priced = OrderTotalsCalculator::new(&policy)
            .calculate(&[line], &booker(50, 0))
            .unwrap();

        assert_eq!(priced.totals.order_level_excess, Money::zero());
        assert!(!priced.totals.has_unauthorized_discount());
    }

    #[test]
    fn test_totals_invariants_hold() {
        let policy = DiscountPolicy::new(Percent::from_units(7));
        let cases: [(i64, &str, i64, &str); 5] = [
            (0, "19.99", 3, "0"),
            (7, "33", 7, "7"),
            (3, "19", 9, "12.5"),
            (1, "0.01", 1, "100"),
            (999, "1.10", 4, "6.25"),
        ];
        let lines: Vec<LineInput> = cases
            .iter()
            .enumerate()
            .map(|(n, (qty, price, max, pct))| {
                LineInput::new(
                    product(&format!("p-{n}"), "mixed", dec(price), *max),
                    *qty,
                    Percent::from_storage(pct).unwrap(),
                )
            })
            .collect();

        let priced = OrderTotalsCalculator::new(&policy)
            .calculate(&lines, &booker(8, 100))
            .unwrap();
        let totals = &priced.totals;

        assert_eq!(totals.grand_total, totals.subtotal - totals.total_discount);
        assert!(!totals.grand_total.is_negative());
        assert!(!totals.subtotal.is_negative());
        assert!(!totals.unauthorized_discount.is_negative());
        assert_eq!(
            totals.unauthorized_discount,
            priced.items.iter().map(|i| i.unauthorized_amount).sum::<Money>() + totals.order_level_excess
        );
        assert_eq!(
            totals.allowed_discount + totals.line_unauthorized_discount,
            totals.total_discount
        );
    }

    #[test]
    fn test_fractional_discounts_are_not_rounded_per_line() {
        let policy = DiscountPolicy::new(Percent::from_units(10));
        let lines = [
            LineInput::new(product("p-1", "tea", Money::from_units(33), 10), 7, Percent::from_units(7)),
            LineInput::new(product("p-2", "tea", Money::from_units(19), 10), 3, Percent::from_units(7)),
        ];

        let priced = OrderTotalsCalculator::new(&policy)
            .calculate(&lines, &booker(10, 0))
            .unwrap();

        assert_eq!(priced.items[0].discount_amount, dec("16.17"));
        assert_eq!(priced.items[1].discount_amount, dec("3.99"));
        assert_eq!(priced.totals.total_discount, dec("20.16"));
        assert_eq!(priced.totals.grand_total, dec("267.84"));
    }

    #[test]
    fn test_negative_inputs_are_rejected() {
        let policy = DiscountPolicy::default();
        let calc = OrderTotalsCalculator::new(&policy);
        let p = product("p-1", "tea", Money::from_units(100), 5);

        let err = calc
            .calculate(&[LineInput::new(p.clone(), -1, Percent::zero())], &booker(5, 0))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput { ref field, .. } if field == "quantity"));

        let err = calc
            .calculate(&[LineInput::new(p.clone(), 1, Percent::from_units(-2))], &booker(5, 0))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput { ref field, .. } if field == "discount_percent"));

        let err = calc
            .calculate(&[LineInput::new(p, 1, Percent::from_units(120))], &booker(5, 0))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput { .. }));
    }

    #[test]
    fn test_recalculate_reproduces_frozen_totals() {
        let policy = DiscountPolicy::new(Percent::from_units(5)).with_category("tea", Percent::from_units(3));
        let lines = [
            LineInput::new(product("p-1", "tea", dec("112.35"), 10), 13, Percent::from_storage("4.5").unwrap()),
            LineInput::new(product("p-2", "soap", dec("47.10"), 10), 9, Percent::from_units(5)),
        ];
        let user = booker(10, 60);
        let frozen = OrderTotalsCalculator::new(&policy).calculate(&lines, &user).unwrap();
        assert!(frozen.totals.has_unauthorized_discount());

        let again = recalculate(&frozen.items, user.discount_cap()).unwrap();
        assert_eq!(again, frozen);
    }
}
