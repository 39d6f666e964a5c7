//! # Discount Policy
//!
//! Static discount limits: per category, per product and per user.
//!
//! ```text
//! effective max = min(category max, product max, user max)
//!
//!   category "tea"      →  5%
//!   product  "Tea 950g" → 10%
//!   booker   "Asif"     → 15%
//!                          ──
//!   effective              5%
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{Percent, SalesUser};
use crate::DEFAULT_CATEGORY_MAX_DISCOUNT_PERCENT;

/// Category discount limits with a fallback for unknown categories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscountPolicy {
    category_limits: HashMap<String, Percent>,
    default_max: Percent,
}

impl DiscountPolicy {
    /// Creates a policy with no category limits and the given fallback.
    pub fn new(default_max: Percent) -> Self {
        DiscountPolicy {
            category_limits: HashMap::new(),
            default_max,
        }
    }

    /// Builds a policy from `(category, limit)` pairs.
    pub fn from_limits<I, S>(default_max: Percent, limits: I) -> Self
    where
        I: IntoIterator<Item = (S, Percent)>,
        S: Into<String>,
    {
        let category_limits = limits
            .into_iter()
            .map(|(category, limit)| (normalize_category(&category.into()), limit))
            .collect();

        DiscountPolicy {
            category_limits,
            default_max,
        }
    }

    /// Sets the limit for one category.
    pub fn with_category(mut self, category: &str, limit: Percent) -> Self {
        self.category_limits
            .insert(normalize_category(category), limit);
        self
    }

    /// Returns the fallback limit for unknown categories.
    pub fn default_max(&self) -> Percent {
        self.default_max
    }

    /// Max discount for a category; unknown categories get the default.
    ///
    /// Lookup ignores case and surrounding whitespace.
    pub fn max_discount_for_category(&self, category: &str) -> Percent {
        self.category_limits
            .get(&normalize_category(category))
            .copied()
            .unwrap_or(self.default_max)
    }

    /// `min(category max, product max, user max)`.
    pub fn effective_max_discount(
        &self,
        category: &str,
        product_max: Percent,
        user: &SalesUser,
    ) -> Percent {
        self.max_discount_for_category(category)
            .min(product_max)
            .min(user.max_discount_percent)
    }
}

impl Default for DiscountPolicy {
    fn default() -> Self {
        DiscountPolicy::new(Percent::from_units(DEFAULT_CATEGORY_MAX_DISCOUNT_PERCENT))
    }
}

fn normalize_category(category: &str) -> String {
    category.trim().to_lowercase()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Money;
    use crate::types::UserRole;

    fn booker(max_pct: i64) -> SalesUser {
        SalesUser {
            id: "booker-1".to_string(),
            name: "Asif".to_string(),
            role: UserRole::Booker,
            branch_id: "lhr".to_string(),
            max_discount_percent: Percent::from_units(max_pct),
            max_discount_amount: Money::zero(),
        }
    }

    #[test]
    fn test_unknown_category_falls_back_to_default() {
        let policy = DiscountPolicy::new(Percent::from_units(3)).with_category("tea", Percent::from_units(5));

        assert_eq!(policy.max_discount_for_category("tea"), Percent::from_units(5));
        assert_eq!(policy.max_discount_for_category(" TEA "), Percent::from_units(5));
        assert_eq!(policy.max_discount_for_category("soap"), Percent::from_units(3));
    }

    #[test]
    fn test_effective_max_is_smallest_limit() {
        let policy = DiscountPolicy::from_limits(
            Percent::from_units(5),
            [("tea", Percent::from_units(5)), ("biscuits", Percent::from_units(12))],
        );

        // category is the tightest
        assert_eq!(
            policy.effective_max_discount("tea", Percent::from_units(10), &booker(15)),
            Percent::from_units(5)
        );
        // product is the tightest
        assert_eq!(
            policy.effective_max_discount("biscuits", Percent::from_units(8), &booker(15)),
            Percent::from_units(8)
        );
        // user is the tightest
        assert_eq!(
            policy.effective_max_discount("biscuits", Percent::from_units(20), &booker(2)),
            Percent::from_units(2)
        );
    }

    #[test]
    fn test_default_policy_uses_crate_default() {
        let policy = DiscountPolicy::default();
        assert_eq!(
            policy.max_discount_for_category("anything"),
            Percent::from_units(DEFAULT_CATEGORY_MAX_DISCOUNT_PERCENT)
        );
    }
}
