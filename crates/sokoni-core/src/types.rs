//! # Domain Types
//!
//! Catalog-side domain types: products, variants, per-location stock rows,
//! addresses and shipping rates.
//!
//! ## Dual-Key Identity Pattern
//! Every entity has:
//! - `id`: UUID v4 - immutable, used for database relations
//! - Business ID: (sku, slug, order_number, ...) - human-readable
//!
//! ## Stock Invariants
//! - `in_stock` is a derived cache of `stock > 0`; it is recomputed after
//!   every stock mutation and never set independently.
//! - When a product has variants, `product.stock == sum(variant.stock)`.
//! - When location rows exist for a product/variant, that owner's `stock`
//!   equals the sum of its location quantities.
//! - Stock may only go negative when `allow_backorder` is set.
//!
//! Stock fields are mutated exclusively by the reservation engine and the
//! explicit restock operations in `sokoni-db`; order logic never writes
//! them directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::money::Money;

// =============================================================================
// Product
// =============================================================================

/// A product in the catalog.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Product {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Stock Keeping Unit - business identifier, auto-generated when absent.
    pub sku: String,

    /// URL slug, derived from the name, unique.
    pub slug: String,

    /// Display name shown in the storefront and on order snapshots.
    pub name: String,

    /// Optional long description.
    pub description: Option<String>,

    /// Price in minor currency units.
    pub price_cents: i64,

    /// ISO currency code (e.g. "KES").
    pub currency: String,

    /// Aggregate stock. Equals the sum of variant stock when variants exist.
    pub stock: i64,

    /// Derived cache: `stock > 0` (or any variant in stock).
    pub in_stock: bool,

    /// Allow ordering when stock is insufficient; stock may go negative.
    pub allow_backorder: bool,

    /// Whether `variants` carries the sellable units.
    pub has_variants: bool,

    /// Variants (size/color/...), each with its own stock.
    pub variants: Vec<Variant>,

    /// Whether product is visible/sellable (soft delete).
    pub is_active: bool,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Returns the price as a Money type.
    #[inline]
    pub fn price(&self) -> Money {
        Money::from_cents(self.price_cents)
    }

    /// Looks up a variant by id.
    pub fn variant(&self, variant_id: &str) -> Option<&Variant> {
        self.variants.iter().find(|v| v.id == variant_id)
    }

    /// Effective unit price for an optional variant (variant override wins).
    pub fn unit_price(&self, variant_id: Option<&str>) -> Option<Money> {
        match variant_id {
            Some(vid) => self
                .variant(vid)
                .map(|v| Money::from_cents(v.price_cents.unwrap_or(self.price_cents))),
            None => Some(self.price()),
        }
    }

    /// Recomputes the aggregate stock and the derived `in_stock` flag.
    ///
    /// Call after any mutation of variant stock. When the product has no
    /// variants the aggregate is left alone and only `in_stock` refreshes.
    pub fn recompute_stock(&mut self) {
        if self.has_variants && !self.variants.is_empty() {
            self.stock = self.variants.iter().map(|v| v.stock).sum();
        }
        self.in_stock =
            self.stock > 0 || (self.has_variants && self.variants.iter().any(|v| v.in_stock));
    }
}

// =============================================================================
// Variant
// =============================================================================

/// A sellable variant of a product (e.g. "Red / M").
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Variant {
    pub id: String,
    pub product_id: String,
    /// Optional per-variant SKU override.
    pub sku: Option<String>,
    pub title: String,
    /// Price override in minor units; falls back to the product price.
    pub price_cents: Option<i64>,
    /// Stock for this variant (sum over its locations when location rows exist).
    pub stock: i64,
    /// Derived cache: `stock > 0`.
    pub in_stock: bool,
}

// =============================================================================
// Stock Location
// =============================================================================

/// Per-location stock breakdown for a product or variant.
///
/// `variant_id` is the empty string for product-level rows, which keeps the
/// (product, variant, location) key unique in SQLite (NULLs never collide
/// in unique indexes).
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StockLevel {
    pub product_id: String,
    pub variant_id: String,
    pub location: String,
    pub qty: i64,
}

impl StockLevel {
    /// Sentinel for product-level rows.
    pub const NO_VARIANT: &'static str = "";
}

// =============================================================================
// Address
// =============================================================================

/// A shipping (or billing) address, snapshotted onto orders as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub line1: String,
    pub line2: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub postal_code: Option<String>,
    /// Defaults to "Kenya" upstream; required here.
    pub country: String,
}

// =============================================================================
// Shipping Rate
// =============================================================================

/// A flat shipping rate scoped to country/region/city.
///
/// Rate resolution picks the most specific active match: city beats region
/// beats country. Consumed exactly once, at order creation; the fee is then
/// frozen on the order.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ShippingRate {
    pub id: String,
    pub name: String,
    pub country: String,
    pub region: Option<String>,
    pub city: Option<String>,
    pub price_cents: i64,
    pub currency: String,
    pub active: bool,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn product() -> Product {
        Product {
            id: "p1".into(),
            sku: "SKU-2026-00001".into(),
            slug: "blue-tee".into(),
            name: "Blue Tee".into(),
            description: None,
            price_cents: 1500_00,
            currency: "KES".into(),
            stock: 0,
            in_stock: false,
            allow_backorder: false,
            has_variants: true,
            variants: vec![
                Variant {
                    id: "v1".into(),
                    product_id: "p1".into(),
                    sku: None,
                    title: "M".into(),
                    price_cents: None,
                    stock: 3,
                    in_stock: true,
                },
                Variant {
                    id: "v2".into(),
                    product_id: "p1".into(),
                    sku: None,
                    title: "L".into(),
                    price_cents: Some(1600_00),
                    stock: 2,
                    in_stock: true,
                },
            ],
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_recompute_stock_sums_variants() {
        let mut p = product();
        p.recompute_stock();
        assert_eq!(p.stock, 5);
        assert!(p.in_stock);

        p.variants[0].stock = 0;
        p.variants[0].in_stock = false;
        p.variants[1].stock = 0;
        p.variants[1].in_stock = false;
        p.recompute_stock();
        assert_eq!(p.stock, 0);
        assert!(!p.in_stock);
    }

    #[test]
    fn test_unit_price_variant_override() {
        let p = product();
        assert_eq!(p.unit_price(None).unwrap().cents(), 1500_00);
        assert_eq!(p.unit_price(Some("v1")).unwrap().cents(), 1500_00);
        assert_eq!(p.unit_price(Some("v2")).unwrap().cents(), 1600_00);
        assert!(p.unit_price(Some("missing")).is_none());
    }
}
