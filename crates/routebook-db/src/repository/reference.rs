//! # Reference Data Repository
//!
//! Users, shops, products and category discount limits. The workflow only
//! reads these; the upserts exist for provisioning and tests.

use sqlx::{FromRow, SqliteConnection, SqlitePool};
use tracing::debug;

use routebook_core::{DiscountPolicy, Percent, Product, SalesUser, Shop, UserRole};

use super::{money, percent};
use crate::error::{DbError, DbResult};

// =============================================================================
// Row Types
// =============================================================================

#[derive(Debug, FromRow)]
struct UserRow {
    id: String,
    name: String,
    role: UserRole,
    branch_id: String,
    max_discount_percent: String,
    max_discount_amount: String,
}

impl TryFrom<UserRow> for SalesUser {
    type Error = DbError;

    fn try_from(row: UserRow) -> DbResult<Self> {
        Ok(SalesUser {
            max_discount_percent: percent("users.max_discount_percent", &row.max_discount_percent)?,
            max_discount_amount: money("users.max_discount_amount", &row.max_discount_amount)?,
            id: row.id,
            name: row.name,
            role: row.role,
            branch_id: row.branch_id,
        })
    }
}

#[derive(Debug, FromRow)]
struct ProductRow {
    id: String,
    name: String,
    category: String,
    unit_price: String,
    max_discount_percent: String,
}

impl TryFrom<ProductRow> for Product {
    type Error = DbError;

    fn try_from(row: ProductRow) -> DbResult<Self> {
        Ok(Product {
            unit_price: money("products.unit_price", &row.unit_price)?,
            max_discount_percent: percent("products.max_discount_percent", &row.max_discount_percent)?,
            id: row.id,
            name: row.name,
            category: row.category,
        })
    }
}

#[derive(Debug, FromRow)]
struct ShopRow {
    id: String,
    name: String,
    branch_id: String,
    is_active: bool,
}

impl From<ShopRow> for Shop {
    fn from(row: ShopRow) -> Self {
        Shop {
            id: row.id,
            name: row.name,
            branch_id: row.branch_id,
            is_active: row.is_active,
        }
    }
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for reference data.
#[derive(Debug, Clone)]
pub struct ReferenceRepository {
    pool: SqlitePool,
}

impl ReferenceRepository {
    /// Creates a new ReferenceRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ReferenceRepository { pool }
    }

    pub async fn upsert_user(&self, user: &SalesUser) -> DbResult<()> {
        debug!(id = %user.id, role = ?user.role, "Upserting user");

        sqlx::query(
            r#"
            INSERT INTO users (id, name, role, branch_id, max_discount_percent, max_discount_amount)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                role = excluded.role,
                branch_id = excluded.branch_id,
                max_discount_percent = excluded.max_discount_percent,
                max_discount_amount = excluded.max_discount_amount
            "#,
        )
        .bind(&user.id)
        .bind(&user.name)
        .bind(user.role)
        .bind(&user.branch_id)
        .bind(user.max_discount_percent.to_storage())
        .bind(user.max_discount_amount.to_storage())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn upsert_shop(&self, shop: &Shop) -> DbResult<()> {
        debug!(id = %shop.id, "Upserting shop");

        sqlx::query(
            r#"
            INSERT INTO shops (id, name, branch_id, is_active)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                branch_id = excluded.branch_id,
                is_active = excluded.is_active
            "#,
        )
        .bind(&shop.id)
        .bind(&shop.name)
        .bind(&shop.branch_id)
        .bind(shop.is_active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn upsert_product(&self, product: &Product) -> DbResult<()> {
        debug!(id = %product.id, category = %product.category, "Upserting product");

        sqlx::query(
            r#"
            INSERT INTO products (id, name, category, unit_price, max_discount_percent)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                category = excluded.category,
                unit_price = excluded.unit_price,
                max_discount_percent = excluded.max_discount_percent
            "#,
        )
        .bind(&product.id)
        .bind(&product.name)
        .bind(&product.category)
        .bind(product.unit_price.to_storage())
        .bind(product.max_discount_percent.to_storage())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Sets the discount limit of a category (stored lower-cased).
    pub async fn set_category_limit(&self, category: &str, limit: Percent) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO category_discount_limits (category, max_discount_percent)
            VALUES (?1, ?2)
            ON CONFLICT (category) DO UPDATE SET max_discount_percent = excluded.max_discount_percent
            "#,
        )
        .bind(category.trim().to_lowercase())
        .bind(limit.to_storage())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_user(&self, conn: &mut SqliteConnection, id: &str) -> DbResult<Option<SalesUser>> {
        let row: Option<UserRow> = sqlx::query_as(
            r#"
            SELECT id, name, role, branch_id, max_discount_percent, max_discount_amount
            FROM users
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        row.map(SalesUser::try_from).transpose()
    }

    pub async fn get_shop(&self, conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Shop>> {
        let row: Option<ShopRow> = sqlx::query_as(
            r#"
            SELECT id, name, branch_id, is_active
            FROM shops
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(row.map(Shop::from))
    }

    pub async fn get_product(&self, conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Product>> {
        let row: Option<ProductRow> = sqlx::query_as(
            r#"
            SELECT id, name, category, unit_price, max_discount_percent
            FROM products
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        row.map(Product::try_from).transpose()
    }

    /// Builds the discount policy from the stored category limits.
    pub async fn load_policy(&self, conn: &mut SqliteConnection, default_max: Percent) -> DbResult<DiscountPolicy> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT category, max_discount_percent FROM category_discount_limits",
        )
        .fetch_all(&mut *conn)
        .await?;

        let limits = rows
            .into_iter()
            .map(|(category, raw)| {
                percent("category_discount_limits.max_discount_percent", &raw).map(|limit| (category, limit))
            })
            .collect::<DbResult<Vec<_>>>()?;

        debug!(categories = limits.len(), "Loaded discount policy");
        Ok(DiscountPolicy::from_limits(default_max, limits))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use routebook_core::Money;

    #[tokio::test]
    async fn test_reference_round_trip() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.reference();

        let user = SalesUser {
            id: "booker-1".to_string(),
            name: "Asif".to_string(),
            role: UserRole::Booker,
            branch_id: "lhr".to_string(),
            max_discount_percent: Percent::from_storage("7.5").unwrap(),
            max_discount_amount: Money::from_units(1000),
        };
        repo.upsert_user(&user).await.unwrap();
        repo.upsert_shop(&Shop {
            id: "shop-1".to_string(),
            name: "Bismillah Store".to_string(),
            branch_id: "lhr".to_string(),
            is_active: false,
        })
        .await
        .unwrap();

        let mut conn = db.pool().acquire().await.unwrap();
        let loaded = repo.get_user(&mut conn, "booker-1").await.unwrap().unwrap();
        assert_eq!(loaded.role, UserRole::Booker);
        assert_eq!(loaded.max_discount_percent, Percent::from_storage("7.5").unwrap());
        assert_eq!(loaded.discount_cap(), Some(Money::from_units(1000)));

        let shop = repo.get_shop(&mut conn, "shop-1").await.unwrap().unwrap();
        assert!(!shop.is_active);
        assert!(repo.get_shop(&mut conn, "shop-9").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_policy_loads_category_limits() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.reference();
        repo.set_category_limit(" Tea ", Percent::from_units(3)).await.unwrap();

        let mut conn = db.pool().acquire().await.unwrap();
        let policy = repo.load_policy(&mut conn, Percent::from_units(5)).await.unwrap();
        assert_eq!(policy.max_discount_for_category("TEA"), Percent::from_units(3));
        assert_eq!(policy.max_discount_for_category("soap"), Percent::from_units(5));
    }
}
