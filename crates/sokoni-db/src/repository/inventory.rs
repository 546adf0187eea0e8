//! # Reservation Engine
//!
//! The only code allowed to write stock fields. Everything here runs on a
//! caller-owned transaction and never commits; order creation and
//! cancellation wrap these calls so stock movement and order rows land (or
//! roll back) together.
//!
//! ## Two-Phase Reserve
//! ```text
//!  Phase 1 (read)            Phase 2 (write)
//!  ──────────────            ───────────────
//!  load product/variant      guarded decrement:
//!  check availability          UPDATE .. SET stock = stock - ?q
//!  collect ALL failures        WHERE .. AND (backorder OR stock >= ?q)
//!  snapshot name/sku/price   guard miss → abort whole reservation
//! ```
//!
//! Phase 1 produces a complete failure list so the client sees every
//! problem at once. Phase 2 re-checks via the SQL guard, which is what
//! holds under concurrency: two checkouts for the last unit both pass
//! phase 1, but only one guarded decrement can land.

use sqlx::SqliteConnection;
use tracing::debug;

use crate::error::{DbError, DbResult};
use sokoni_core::reservation::is_available;
use sokoni_core::{
    CoreError, FailureReason, LineSnapshot, OrderItem, ReservationFailure, ReservationItem,
    StockLevel,
};

// =============================================================================
// Row types
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct ProductStockRow {
    id: String,
    name: String,
    sku: String,
    price_cents: i64,
    stock: i64,
    allow_backorder: bool,
    is_active: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct VariantStockRow {
    id: String,
    sku: Option<String>,
    price_cents: Option<i64>,
    stock: i64,
}

/// What phase 1 learned about one line; drives the phase 2 decrement.
#[derive(Debug)]
struct ValidatedLine {
    snapshot: LineSnapshot,
    allow_backorder: bool,
}

// =============================================================================
// Reserve
// =============================================================================

/// Atomically reserves stock for every line or none of them.
///
/// On success returns the line snapshots (frozen name/sku/unit price) the
/// order items are built from. On failure returns
/// [`CoreError::ReservationFailed`] carrying every failing line; the caller
/// must roll back its transaction.
pub async fn reserve(
    conn: &mut SqliteConnection,
    items: &[ReservationItem],
) -> DbResult<Vec<LineSnapshot>> {
    // Phase 1: validate everything, collecting the complete failure list.
    let mut failures: Vec<ReservationFailure> = Vec::new();
    let mut validated: Vec<ValidatedLine> = Vec::with_capacity(items.len());

    for item in items {
        match validate_line(&mut *conn, item).await? {
            Ok(line) => validated.push(line),
            Err(failure) => failures.push(failure),
        }
    }

    if !failures.is_empty() {
        return Err(DbError::Core(CoreError::ReservationFailed(failures)));
    }

    // Phase 2: guarded decrements. A miss means a concurrent writer got
    // there first; abort the whole reservation.
    for line in &validated {
        apply_decrement(&mut *conn, line).await?;
    }

    debug!(lines = validated.len(), "Stock reserved");
    Ok(validated.into_iter().map(|l| l.snapshot).collect())
}

async fn validate_line(
    conn: &mut SqliteConnection,
    item: &ReservationItem,
) -> DbResult<Result<ValidatedLine, ReservationFailure>> {
    let not_found = || ReservationFailure {
        product_id: item.product_id.clone(),
        variant_id: item.variant_id.clone(),
        reason: FailureReason::NotFound,
    };

    let product: Option<ProductStockRow> = sqlx::query_as(
        r#"
        SELECT id, name, sku, price_cents, stock, allow_backorder, is_active
        FROM products
        WHERE id = ?1
        "#,
    )
    .bind(&item.product_id)
    .fetch_optional(&mut *conn)
    .await?;

    let product = match product {
        Some(p) if p.is_active => p,
        _ => return Ok(Err(not_found())),
    };

    let variant: Option<VariantStockRow> = match &item.variant_id {
        Some(vid) => {
            let row: Option<VariantStockRow> = sqlx::query_as(
                r#"
                SELECT id, sku, price_cents, stock
                FROM product_variants
                WHERE id = ?1 AND product_id = ?2
                "#,
            )
            .bind(vid)
            .bind(&product.id)
            .fetch_optional(&mut *conn)
            .await?;

            match row {
                Some(v) => Some(v),
                None => return Ok(Err(not_found())),
            }
        }
        None => None,
    };

    // Availability is judged against the narrowest scope requested:
    // location qty > variant stock > product stock.
    let available = match &item.location {
        Some(location) => {
            let variant_key = item.variant_id.as_deref().unwrap_or(StockLevel::NO_VARIANT);
            let qty: Option<i64> = sqlx::query_scalar(
                r#"
                SELECT qty FROM stock_locations
                WHERE product_id = ?1 AND variant_id = ?2 AND location = ?3
                "#,
            )
            .bind(&product.id)
            .bind(variant_key)
            .bind(location)
            .fetch_optional(&mut *conn)
            .await?;
            qty.unwrap_or(0)
        }
        None => variant.as_ref().map(|v| v.stock).unwrap_or(product.stock),
    };

    if !is_available(available, product.allow_backorder, item.quantity) {
        return Ok(Err(ReservationFailure {
            product_id: item.product_id.clone(),
            variant_id: item.variant_id.clone(),
            reason: FailureReason::InsufficientStock {
                available,
                requested: item.quantity,
            },
        }));
    }

    let (sku, unit_price_cents) = match &variant {
        Some(v) => (
            v.sku.clone().or_else(|| Some(product.sku.clone())),
            v.price_cents.unwrap_or(product.price_cents),
        ),
        None => (Some(product.sku.clone()), product.price_cents),
    };

    Ok(Ok(ValidatedLine {
        snapshot: LineSnapshot {
            product_id: product.id,
            variant_id: variant.map(|v| v.id),
            name: product.name,
            sku,
            unit_price_cents,
            quantity: item.quantity,
            location: item.location.clone(),
        },
        allow_backorder: product.allow_backorder,
    }))
}

async fn apply_decrement(conn: &mut SqliteConnection, line: &ValidatedLine) -> DbResult<()> {
    let s = &line.snapshot;

    match &s.location {
        Some(location) => {
            let variant_key = s.variant_id.as_deref().unwrap_or(StockLevel::NO_VARIANT);

            // Backorder may drive a location negative even when no row
            // exists yet; materialize it at zero first.
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO stock_locations (product_id, variant_id, location, qty)
                VALUES (?1, ?2, ?3, 0)
                "#,
            )
            .bind(&s.product_id)
            .bind(variant_key)
            .bind(location)
            .execute(&mut *conn)
            .await?;

            let result = sqlx::query(
                r#"
                UPDATE stock_locations
                SET qty = qty - ?4
                WHERE product_id = ?1 AND variant_id = ?2 AND location = ?3
                  AND (?5 = 1 OR qty >= ?4)
                "#,
            )
            .bind(&s.product_id)
            .bind(variant_key)
            .bind(location)
            .bind(s.quantity)
            .bind(line.allow_backorder)
            .execute(&mut *conn)
            .await?;

            if result.rows_affected() == 0 {
                return Err(guard_miss(conn, s).await?);
            }

            match &s.variant_id {
                Some(vid) => {
                    recompute_variant_from_locations(&mut *conn, &s.product_id, vid).await?;
                    recompute_product_from_variants(&mut *conn, &s.product_id).await?;
                }
                None => {
                    recompute_product_from_locations(&mut *conn, &s.product_id).await?;
                }
            }
        }

        None => match &s.variant_id {
            Some(vid) => {
                let result = sqlx::query(
                    r#"
                    UPDATE product_variants
                    SET stock = stock - ?2,
                        in_stock = CASE WHEN stock - ?2 > 0 THEN 1 ELSE 0 END
                    WHERE id = ?1 AND (?3 = 1 OR stock >= ?2)
                    "#,
                )
                .bind(vid)
                .bind(s.quantity)
                .bind(line.allow_backorder)
                .execute(&mut *conn)
                .await?;

                if result.rows_affected() == 0 {
                    return Err(guard_miss(conn, s).await?);
                }

                recompute_product_from_variants(&mut *conn, &s.product_id).await?;
            }

            None => {
                let result = sqlx::query(
                    r#"
                    UPDATE products
                    SET stock = stock - ?2,
                        in_stock = CASE WHEN stock - ?2 > 0 THEN 1 ELSE 0 END,
                        updated_at = datetime('now')
                    WHERE id = ?1 AND (allow_backorder = 1 OR stock >= ?2)
                    "#,
                )
                .bind(&s.product_id)
                .bind(s.quantity)
                .execute(&mut *conn)
                .await?;

                if result.rows_affected() == 0 {
                    return Err(guard_miss(conn, s).await?);
                }
            }
        },
    }

    Ok(())
}

/// Builds the failure for a phase 2 guard miss, re-reading availability so
/// the error reports what is actually left.
async fn guard_miss(conn: &mut SqliteConnection, s: &LineSnapshot) -> DbResult<DbError> {
    let available: i64 = match (&s.location, &s.variant_id) {
        (Some(location), vid) => sqlx::query_scalar(
            "SELECT qty FROM stock_locations WHERE product_id = ?1 AND variant_id = ?2 AND location = ?3",
        )
        .bind(&s.product_id)
        .bind(vid.as_deref().unwrap_or(StockLevel::NO_VARIANT))
        .bind(location)
        .fetch_optional(&mut *conn)
        .await?
        .unwrap_or(0),
        (None, Some(vid)) => sqlx::query_scalar("SELECT stock FROM product_variants WHERE id = ?1")
            .bind(vid)
            .fetch_optional(&mut *conn)
            .await?
            .unwrap_or(0),
        (None, None) => sqlx::query_scalar("SELECT stock FROM products WHERE id = ?1")
            .bind(&s.product_id)
            .fetch_optional(&mut *conn)
            .await?
            .unwrap_or(0),
    };

    Ok(DbError::Core(CoreError::ReservationFailed(vec![
        ReservationFailure {
            product_id: s.product_id.clone(),
            variant_id: s.variant_id.clone(),
            reason: FailureReason::InsufficientStock {
                available,
                requested: s.quantity,
            },
        },
    ])))
}

// =============================================================================
// Release
// =============================================================================

/// Returns reserved quantities to stock; the exact mirror of [`reserve`].
///
/// Used by order cancellation, inside the cancelling transaction. Rows that
/// no longer exist (hard-deleted catalog entries) are skipped.
pub async fn release(conn: &mut SqliteConnection, items: &[OrderItem]) -> DbResult<()> {
    for item in items {
        match &item.location {
            Some(location) => {
                let variant_key = item.variant_id.as_deref().unwrap_or(StockLevel::NO_VARIANT);

                sqlx::query(
                    r#"
                    INSERT INTO stock_locations (product_id, variant_id, location, qty)
                    VALUES (?1, ?2, ?3, ?4)
                    ON CONFLICT(product_id, variant_id, location)
                    DO UPDATE SET qty = qty + excluded.qty
                    "#,
                )
                .bind(&item.product_id)
                .bind(variant_key)
                .bind(location)
                .bind(item.quantity)
                .execute(&mut *conn)
                .await?;

                match &item.variant_id {
                    Some(vid) => {
                        recompute_variant_from_locations(&mut *conn, &item.product_id, vid).await?;
                        recompute_product_from_variants(&mut *conn, &item.product_id).await?;
                    }
                    None => {
                        recompute_product_from_locations(&mut *conn, &item.product_id).await?;
                    }
                }
            }

            None => match &item.variant_id {
                Some(vid) => {
                    sqlx::query(
                        r#"
                        UPDATE product_variants
                        SET stock = stock + ?2,
                            in_stock = CASE WHEN stock + ?2 > 0 THEN 1 ELSE 0 END
                        WHERE id = ?1
                        "#,
                    )
                    .bind(vid)
                    .bind(item.quantity)
                    .execute(&mut *conn)
                    .await?;

                    recompute_product_from_variants(&mut *conn, &item.product_id).await?;
                }

                None => {
                    sqlx::query(
                        r#"
                        UPDATE products
                        SET stock = stock + ?2,
                            in_stock = CASE WHEN stock + ?2 > 0 THEN 1 ELSE 0 END,
                            updated_at = datetime('now')
                        WHERE id = ?1
                        "#,
                    )
                    .bind(&item.product_id)
                    .bind(item.quantity)
                    .execute(&mut *conn)
                    .await?;
                }
            },
        }
    }

    debug!(lines = items.len(), "Stock released");
    Ok(())
}

// =============================================================================
// Restock (admin adjustments)
// =============================================================================

/// A single stock adjustment (admin restock / correction).
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockAdjustment {
    pub variant_id: Option<String>,
    pub location: Option<String>,
    /// Signed delta; negative values write stock down.
    pub delta: i64,
}

/// Applies explicit adjustments through the same recompute path the engine
/// uses. The only stock-mutation surface besides reserve/release.
pub async fn restock(
    conn: &mut SqliteConnection,
    product_id: &str,
    adjustments: &[StockAdjustment],
) -> DbResult<()> {
    let items: Vec<OrderItem> = adjustments
        .iter()
        .map(|adj| OrderItem {
            id: String::new(),
            order_id: String::new(),
            product_id: product_id.to_string(),
            variant_id: adj.variant_id.clone(),
            name: String::new(),
            sku: None,
            unit_price_cents: 0,
            quantity: adj.delta,
            location: adj.location.clone(),
        })
        .collect();

    release(conn, &items).await
}

// =============================================================================
// Recompute helpers
// =============================================================================

async fn recompute_variant_from_locations(
    conn: &mut SqliteConnection,
    product_id: &str,
    variant_id: &str,
) -> DbResult<()> {
    sqlx::query(
        r#"
        UPDATE product_variants
        SET stock = (
                SELECT COALESCE(SUM(qty), 0) FROM stock_locations
                WHERE product_id = ?1 AND variant_id = ?2
            ),
            in_stock = CASE WHEN (
                SELECT COALESCE(SUM(qty), 0) FROM stock_locations
                WHERE product_id = ?1 AND variant_id = ?2
            ) > 0 THEN 1 ELSE 0 END
        WHERE id = ?2
        "#,
    )
    .bind(product_id)
    .bind(variant_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn recompute_product_from_locations(
    conn: &mut SqliteConnection,
    product_id: &str,
) -> DbResult<()> {
    sqlx::query(
        r#"
        UPDATE products
        SET stock = (
                SELECT COALESCE(SUM(qty), 0) FROM stock_locations
                WHERE product_id = ?1 AND variant_id = ''
            ),
            in_stock = CASE WHEN (
                SELECT COALESCE(SUM(qty), 0) FROM stock_locations
                WHERE product_id = ?1 AND variant_id = ''
            ) > 0 THEN 1 ELSE 0 END,
            updated_at = datetime('now')
        WHERE id = ?1
        "#,
    )
    .bind(product_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn recompute_product_from_variants(
    conn: &mut SqliteConnection,
    product_id: &str,
) -> DbResult<()> {
    sqlx::query(
        r#"
        UPDATE products
        SET stock = (
                SELECT COALESCE(SUM(stock), 0) FROM product_variants
                WHERE product_id = ?1
            ),
            in_stock = CASE WHEN (
                SELECT COALESCE(SUM(CASE WHEN in_stock THEN 1 ELSE 0 END), 0)
                FROM product_variants WHERE product_id = ?1
            ) > 0 THEN 1 ELSE 0 END,
            updated_at = datetime('now')
        WHERE id = ?1
        "#,
    )
    .bind(product_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::order::NewOrder;
    use crate::repository::product::NewVariant;
    use crate::test_util::{simple_product, test_db};
    use sokoni_core::{Address, Money, ProviderKind};

    fn address() -> Address {
        Address {
            full_name: None,
            phone: None,
            line1: "Moi Avenue 12".into(),
            line2: None,
            city: Some("Nairobi".into()),
            region: None,
            postal_code: None,
            country: "Kenya".into(),
        }
    }

    fn line(product_id: &str, variant_id: Option<&str>, qty: i64, location: &str) -> ReservationItem {
        ReservationItem {
            product_id: product_id.to_string(),
            variant_id: variant_id.map(str::to_string),
            quantity: qty,
            location: Some(location.to_string()),
        }
    }

    async fn location_qty(
        db: &crate::pool::Database,
        product_id: &str,
        variant_key: &str,
        location: &str,
    ) -> i64 {
        sqlx::query_scalar(
            "SELECT qty FROM stock_locations \
             WHERE product_id = ?1 AND variant_id = ?2 AND location = ?3",
        )
        .bind(product_id)
        .bind(variant_key)
        .bind(location)
        .fetch_one(db.pool())
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_location_scoped_reserve_and_release() {
        let db = test_db().await;
        let product = db.products().insert(simple_product("Tee", 1000_00, 0)).await.unwrap();

        // Stock lives per warehouse; the owner total is the sum
        db.products()
            .restock(
                &product.id,
                &[
                    StockAdjustment { variant_id: None, location: Some("NBO".into()), delta: 5 },
                    StockAdjustment { variant_id: None, location: Some("MSA".into()), delta: 3 },
                ],
            )
            .await
            .unwrap();

        let stocked = db.products().get_by_id(&product.id).await.unwrap().unwrap();
        assert_eq!(stocked.stock, 8);
        assert!(stocked.in_stock);

        let order = db
            .orders()
            .create(NewOrder {
                user_id: "u1".into(),
                items: vec![line(&product.id, None, 2, "NBO")],
                shipping_address: address(),
                provider: ProviderKind::None,
                shipping_fee: Money::zero(),
                currency: None,
            })
            .await
            .unwrap();

        // The requested warehouse was drawn down; the other untouched
        assert_eq!(location_qty(&db, &product.id, StockLevel::NO_VARIANT, "NBO").await, 3);
        assert_eq!(location_qty(&db, &product.id, StockLevel::NO_VARIANT, "MSA").await, 3);
        let after = db.products().get_by_id(&product.id).await.unwrap().unwrap();
        assert_eq!(after.stock, 6);

        // Cancellation returns the quantity to the same warehouse
        db.orders().cancel(&order.id, Some("u1")).await.unwrap();
        assert_eq!(location_qty(&db, &product.id, StockLevel::NO_VARIANT, "NBO").await, 5);
        let restored = db.products().get_by_id(&product.id).await.unwrap().unwrap();
        assert_eq!(restored.stock, 8);
    }

    #[tokio::test]
    async fn test_location_insufficient_reports_available() {
        let db = test_db().await;
        let product = db.products().insert(simple_product("Tee", 1000_00, 0)).await.unwrap();
        db.products()
            .restock(
                &product.id,
                &[StockAdjustment { variant_id: None, location: Some("MSA".into()), delta: 3 }],
            )
            .await
            .unwrap();

        let err = db
            .orders()
            .create(NewOrder {
                user_id: "u1".into(),
                items: vec![line(&product.id, None, 10, "MSA")],
                shipping_address: address(),
                provider: ProviderKind::None,
                shipping_fee: Money::zero(),
                currency: None,
            })
            .await
            .unwrap_err();

        match err {
            DbError::Core(CoreError::ReservationFailed(failures)) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(
                    failures[0].reason,
                    FailureReason::InsufficientStock { available: 3, requested: 10 }
                );
            }
            other => panic!("expected reservation failure, got {other:?}"),
        }

        // Nothing moved
        assert_eq!(location_qty(&db, &product.id, StockLevel::NO_VARIANT, "MSA").await, 3);
    }

    #[tokio::test]
    async fn test_variant_location_recompute_chain() {
        let db = test_db().await;
        let mut new = simple_product("Hoodie", 2500_00, 0);
        new.variants = vec![NewVariant {
            title: "M".into(),
            sku: None,
            price_cents: None,
            stock: 0,
        }];
        let product = db.products().insert(new).await.unwrap();
        let variant_id = product.variants[0].id.clone();

        db.products()
            .restock(
                &product.id,
                &[StockAdjustment {
                    variant_id: Some(variant_id.clone()),
                    location: Some("NBO".into()),
                    delta: 4,
                }],
            )
            .await
            .unwrap();

        let order = db
            .orders()
            .create(NewOrder {
                user_id: "u1".into(),
                items: vec![line(&product.id, Some(&variant_id), 1, "NBO")],
                shipping_address: address(),
                provider: ProviderKind::None,
                shipping_fee: Money::zero(),
                currency: None,
            })
            .await
            .unwrap();
        assert_eq!(order.items[0].location.as_deref(), Some("NBO"));

        // Location drives the variant, the variant drives the owner
        assert_eq!(location_qty(&db, &product.id, &variant_id, "NBO").await, 3);
        let after = db.products().get_by_id(&product.id).await.unwrap().unwrap();
        assert_eq!(after.variant(&variant_id).unwrap().stock, 3);
        assert_eq!(after.stock, 3);
    }
}
