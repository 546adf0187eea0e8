//! # Product Repository
//!
//! Catalog CRUD: products, variants, SKU/slug generation.
//!
//! ## Identity Generation
//! Missing SKUs are allocated from the year-scoped `sku-YYYY` counter
//! (`SKU-2026-00017`); slugs derive from the name and deduplicate with a
//! numeric suffix (`blue-tee`, `blue-tee-2`). Both happen inside the insert
//! transaction, so identities are unique even under concurrent inserts.

use chrono::{Datelike, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::repository::{counters, inventory};
use sokoni_core::{Product, Variant, DEFAULT_CURRENCY};

// =============================================================================
// Row types
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct ProductRow {
    id: String,
    sku: String,
    slug: String,
    name: String,
    description: Option<String>,
    price_cents: i64,
    currency: String,
    stock: i64,
    in_stock: bool,
    allow_backorder: bool,
    has_variants: bool,
    is_active: bool,
    created_at: chrono::DateTime<Utc>,
    updated_at: chrono::DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct VariantRow {
    id: String,
    product_id: String,
    sku: Option<String>,
    title: String,
    price_cents: Option<i64>,
    stock: i64,
    in_stock: bool,
}

impl ProductRow {
    fn into_product(self, variants: Vec<Variant>) -> Product {
        Product {
            id: self.id,
            sku: self.sku,
            slug: self.slug,
            name: self.name,
            description: self.description,
            price_cents: self.price_cents,
            currency: self.currency,
            stock: self.stock,
            in_stock: self.in_stock,
            allow_backorder: self.allow_backorder,
            has_variants: self.has_variants,
            variants,
            is_active: self.is_active,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

impl From<VariantRow> for Variant {
    fn from(row: VariantRow) -> Self {
        Variant {
            id: row.id,
            product_id: row.product_id,
            sku: row.sku,
            title: row.title,
            price_cents: row.price_cents,
            stock: row.stock,
            in_stock: row.in_stock,
        }
    }
}

// =============================================================================
// Input types
// =============================================================================

/// Input for creating a product.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProduct {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price_cents: i64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub stock: i64,
    #[serde(default)]
    pub allow_backorder: bool,
    /// Explicit SKU; auto-generated when absent.
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub variants: Vec<NewVariant>,
}

/// Input for creating a variant alongside its product.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewVariant {
    pub title: String,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub price_cents: Option<i64>,
    #[serde(default)]
    pub stock: i64,
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for product database operations.
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    /// Creates a new ProductRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ProductRepository { pool }
    }

    /// Inserts a product (and its variants) with generated identities.
    pub async fn insert(&self, new: NewProduct) -> DbResult<Product> {
        sokoni_core::validation::validate_required("name", &new.name)
            .map_err(sokoni_core::CoreError::from)?;
        sokoni_core::validation::validate_amount_cents("priceCents", new.price_cents)
            .map_err(sokoni_core::CoreError::from)?;

        let mut tx = self.pool.begin().await?;

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let year = now.year();
        let currency = new
            .currency
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());

        let sku = match new.sku {
            Some(sku) => sku,
            None => {
                let seq = counters::next_seq(&mut tx, &format!("sku-{year}")).await?;
                counters::sku(year, seq)
            }
        };

        let slug = unique_slug(&mut tx, &new.name).await?;

        let has_variants = !new.variants.is_empty();
        let stock = if has_variants {
            new.variants.iter().map(|v| v.stock).sum()
        } else {
            new.stock
        };

        debug!(id = %id, sku = %sku, slug = %slug, "Inserting product");

        sqlx::query(
            r#"
            INSERT INTO products (
                id, sku, slug, name, description, price_cents, currency,
                stock, in_stock, allow_backorder, has_variants, is_active,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 1, ?12, ?12)
            "#,
        )
        .bind(&id)
        .bind(&sku)
        .bind(&slug)
        .bind(&new.name)
        .bind(&new.description)
        .bind(new.price_cents)
        .bind(&currency)
        .bind(stock)
        .bind(stock > 0)
        .bind(new.allow_backorder)
        .bind(has_variants)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        for variant in &new.variants {
            sqlx::query(
                r#"
                INSERT INTO product_variants (id, product_id, sku, title, price_cents, stock, in_stock)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&id)
            .bind(&variant.sku)
            .bind(&variant.title)
            .bind(variant.price_cents)
            .bind(variant.stock)
            .bind(variant.stock > 0)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        self.get_by_id(&id)
            .await?
            .ok_or_else(|| DbError::not_found("Product", &id))
    }

    /// Gets a product by ID, with its variants.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Product>> {
        let row: Option<ProductRow> = sqlx::query_as(
            r#"
            SELECT id, sku, slug, name, description, price_cents, currency,
                   stock, in_stock, allow_backorder, has_variants, is_active,
                   created_at, updated_at
            FROM products
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let variants = self.variants_for(&row.id).await?;
                Ok(Some(row.into_product(variants)))
            }
            None => Ok(None),
        }
    }

    /// Gets an active product by slug.
    pub async fn get_by_slug(&self, slug: &str) -> DbResult<Option<Product>> {
        let row: Option<ProductRow> = sqlx::query_as(
            r#"
            SELECT id, sku, slug, name, description, price_cents, currency,
                   stock, in_stock, allow_backorder, has_variants, is_active,
                   created_at, updated_at
            FROM products
            WHERE slug = ?1 AND is_active = 1
            "#,
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let variants = self.variants_for(&row.id).await?;
                Ok(Some(row.into_product(variants)))
            }
            None => Ok(None),
        }
    }

    /// Lists active products, newest first.
    pub async fn list(&self, limit: i64, offset: i64) -> DbResult<Vec<Product>> {
        let rows: Vec<ProductRow> = sqlx::query_as(
            r#"
            SELECT id, sku, slug, name, description, price_cents, currency,
                   stock, in_stock, allow_backorder, has_variants, is_active,
                   created_at, updated_at
            FROM products
            WHERE is_active = 1
            ORDER BY created_at DESC
            LIMIT ?1 OFFSET ?2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let mut products = Vec::with_capacity(rows.len());
        for row in rows {
            let variants = self.variants_for(&row.id).await?;
            products.push(row.into_product(variants));
        }
        Ok(products)
    }

    /// Soft-deletes (or restores) a product.
    pub async fn set_active(&self, id: &str, active: bool) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE products SET is_active = ?2, updated_at = datetime('now') WHERE id = ?1",
        )
        .bind(id)
        .bind(active)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Product", id));
        }
        Ok(())
    }

    /// Applies admin stock adjustments through the engine's recompute path
    /// and returns the updated product.
    pub async fn restock(
        &self,
        product_id: &str,
        adjustments: &[inventory::StockAdjustment],
    ) -> DbResult<Product> {
        let mut tx = self.pool.begin().await?;
        inventory::restock(&mut tx, product_id, adjustments).await?;
        tx.commit().await?;

        self.get_by_id(product_id)
            .await?
            .ok_or_else(|| DbError::not_found("Product", product_id))
    }

    async fn variants_for(&self, product_id: &str) -> DbResult<Vec<Variant>> {
        let rows: Vec<VariantRow> = sqlx::query_as(
            r#"
            SELECT id, product_id, sku, title, price_cents, stock, in_stock
            FROM product_variants
            WHERE product_id = ?1
            ORDER BY title
            "#,
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Variant::from).collect())
    }
}

// =============================================================================
// Slug generation
// =============================================================================

/// Lowercases, replaces non-alphanumerics with hyphens, trims repeats.
fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_hyphen = true;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_hyphen = false;
        } else if !last_hyphen {
            slug.push('-');
            last_hyphen = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        slug.push_str("product");
    }
    slug
}

/// Derives a slug from the name, appending `-2`, `-3`, ... until unique.
async fn unique_slug(conn: &mut SqliteConnection, name: &str) -> DbResult<String> {
    let base = slugify(name);
    let mut candidate = base.clone();
    let mut n = 1;

    loop {
        let taken: Option<i64> = sqlx::query_scalar("SELECT 1 FROM products WHERE slug = ?1")
            .bind(&candidate)
            .fetch_optional(&mut *conn)
            .await?;

        if taken.is_none() {
            return Ok(candidate);
        }
        n += 1;
        candidate = format!("{base}-{n}");
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{simple_product, test_db};

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Blue Tee"), "blue-tee");
        assert_eq!(slugify("  Fancy -- Name!  "), "fancy-name");
        assert_eq!(slugify("***"), "product");
    }

    #[tokio::test]
    async fn test_insert_generates_identities() {
        let db = test_db().await;

        let product = db.products().insert(simple_product("Blue Tee", 1500_00, 5)).await.unwrap();
        assert!(product.sku.starts_with("SKU-"));
        assert_eq!(product.slug, "blue-tee");
        assert_eq!(product.stock, 5);
        assert!(product.in_stock);

        // Same name gets a deduplicated slug and a fresh SKU
        let second = db.products().insert(simple_product("Blue Tee", 1500_00, 1)).await.unwrap();
        assert_eq!(second.slug, "blue-tee-2");
        assert_ne!(second.sku, product.sku);
    }

    #[tokio::test]
    async fn test_variant_stock_aggregates() {
        let db = test_db().await;

        let mut new = simple_product("Hoodie", 2500_00, 0);
        new.variants = vec![
            NewVariant {
                title: "M".into(),
                sku: None,
                price_cents: None,
                stock: 3,
            },
            NewVariant {
                title: "L".into(),
                sku: None,
                price_cents: Some(2700_00),
                stock: 2,
            },
        ];

        let product = db.products().insert(new).await.unwrap();
        assert!(product.has_variants);
        assert_eq!(product.stock, 5);
        assert_eq!(product.variants.len(), 2);
    }

    #[tokio::test]
    async fn test_set_active_hides_from_slug_lookup() {
        let db = test_db().await;
        let product = db.products().insert(simple_product("Cap", 500_00, 2)).await.unwrap();

        db.products().set_active(&product.id, false).await.unwrap();
        assert!(db.products().get_by_slug("cap").await.unwrap().is_none());
        // Still reachable by id for admin views
        assert!(db.products().get_by_id(&product.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_restock_adjusts_through_engine() {
        let db = test_db().await;
        let product = db.products().insert(simple_product("Mug", 800_00, 1)).await.unwrap();

        let updated = db
            .products()
            .restock(
                &product.id,
                &[inventory::StockAdjustment {
                    variant_id: None,
                    location: None,
                    delta: 9,
                }],
            )
            .await
            .unwrap();

        assert_eq!(updated.stock, 10);
        assert!(updated.in_stock);
    }
}
