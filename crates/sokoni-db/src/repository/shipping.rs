//! # Shipping Rate Repository
//!
//! Flat shipping rates scoped to country/region/city, resolved most
//! specific first. A quote is consumed exactly once, at order creation;
//! the fee is then frozen on the order.

use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use sokoni_core::{Address, Money, ShippingRate, DEFAULT_CURRENCY};

#[derive(Debug, sqlx::FromRow)]
struct RateRow {
    id: String,
    name: String,
    country: String,
    region: Option<String>,
    city: Option<String>,
    price_cents: i64,
    currency: String,
    active: bool,
}

impl From<RateRow> for ShippingRate {
    fn from(row: RateRow) -> Self {
        ShippingRate {
            id: row.id,
            name: row.name,
            country: row.country,
            region: row.region,
            city: row.city,
            price_cents: row.price_cents,
            currency: row.currency,
            active: row.active,
        }
    }
}

/// Input for creating a shipping rate.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewShippingRate {
    pub name: String,
    pub country: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    pub price_cents: i64,
    #[serde(default)]
    pub currency: Option<String>,
}

/// Repository for shipping rate operations.
#[derive(Debug, Clone)]
pub struct ShippingRepository {
    pool: SqlitePool,
}

impl ShippingRepository {
    /// Creates a new ShippingRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ShippingRepository { pool }
    }

    /// Inserts a shipping rate.
    pub async fn insert(&self, new: NewShippingRate) -> DbResult<ShippingRate> {
        let id = Uuid::new_v4().to_string();
        let currency = new
            .currency
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());

        sqlx::query(
            r#"
            INSERT INTO shipping_rates (id, name, country, region, city, price_cents, currency, active)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1)
            "#,
        )
        .bind(&id)
        .bind(&new.name)
        .bind(&new.country)
        .bind(&new.region)
        .bind(&new.city)
        .bind(new.price_cents)
        .bind(&currency)
        .execute(&self.pool)
        .await?;

        self.get_by_id(&id)
            .await?
            .ok_or_else(|| DbError::not_found("ShippingRate", &id))
    }

    /// Gets a rate by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<ShippingRate>> {
        let row: Option<RateRow> = sqlx::query_as(
            "SELECT id, name, country, region, city, price_cents, currency, active \
             FROM shipping_rates WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ShippingRate::from))
    }

    /// Lists all rates.
    pub async fn list(&self) -> DbResult<Vec<ShippingRate>> {
        let rows: Vec<RateRow> = sqlx::query_as(
            "SELECT id, name, country, region, city, price_cents, currency, active \
             FROM shipping_rates ORDER BY country, region, city",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ShippingRate::from).collect())
    }

    /// Deactivates a rate.
    pub async fn deactivate(&self, id: &str) -> DbResult<()> {
        let result = sqlx::query("UPDATE shipping_rates SET active = 0 WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("ShippingRate", id));
        }
        Ok(())
    }

    /// Quotes the shipping fee for an address: the most specific active
    /// match wins (city over region over country); `default_fee` when no
    /// rate matches.
    pub async fn quote(&self, address: &Address, default_fee: Money) -> DbResult<Money> {
        let fee: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT price_cents FROM shipping_rates
            WHERE active = 1
              AND country = ?1
              AND (region IS NULL OR region = ?2)
              AND (city IS NULL OR city = ?3)
            ORDER BY (city IS NOT NULL) DESC, (region IS NOT NULL) DESC
            LIMIT 1
            "#,
        )
        .bind(&address.country)
        .bind(&address.region)
        .bind(&address.city)
        .fetch_optional(&self.pool)
        .await?;

        let fee = fee.map(Money::from_cents).unwrap_or(default_fee);
        debug!(country = %address.country, fee_cents = fee.cents(), "Shipping quoted");
        Ok(fee)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::test_db;

    fn rate(name: &str, region: Option<&str>, city: Option<&str>, cents: i64) -> NewShippingRate {
        NewShippingRate {
            name: name.to_string(),
            country: "Kenya".to_string(),
            region: region.map(str::to_string),
            city: city.map(str::to_string),
            price_cents: cents,
            currency: None,
        }
    }

    fn address(region: Option<&str>, city: Option<&str>) -> Address {
        Address {
            full_name: None,
            phone: None,
            line1: "Moi Avenue 12".into(),
            line2: None,
            city: city.map(str::to_string),
            region: region.map(str::to_string),
            postal_code: None,
            country: "Kenya".into(),
        }
    }

    #[tokio::test]
    async fn test_quote_prefers_most_specific() {
        let db = test_db().await;
        db.shipping().insert(rate("Countrywide", None, None, 500_00)).await.unwrap();
        db.shipping().insert(rate("Nairobi", None, Some("Nairobi"), 200_00)).await.unwrap();
        db.shipping().insert(rate("Coast", Some("Coast"), None, 700_00)).await.unwrap();

        let fallback = Money::from_cents(999_00);

        let nairobi = db.shipping().quote(&address(None, Some("Nairobi")), fallback).await.unwrap();
        assert_eq!(nairobi.cents(), 200_00);

        let coast = db.shipping().quote(&address(Some("Coast"), Some("Diani")), fallback).await.unwrap();
        assert_eq!(coast.cents(), 700_00);

        let elsewhere = db.shipping().quote(&address(None, Some("Nakuru")), fallback).await.unwrap();
        assert_eq!(elsewhere.cents(), 500_00);
    }

    #[tokio::test]
    async fn test_quote_falls_back_when_no_match() {
        let db = test_db().await;
        let fallback = Money::from_cents(450_00);

        let fee = db.shipping().quote(&address(None, None), fallback).await.unwrap();
        assert_eq!(fee, fallback);
    }

    #[tokio::test]
    async fn test_deactivated_rates_are_skipped() {
        let db = test_db().await;
        let created = db.shipping().insert(rate("Nairobi", None, Some("Nairobi"), 200_00)).await.unwrap();
        db.shipping().deactivate(&created.id).await.unwrap();

        let fallback = Money::from_cents(450_00);
        let fee = db.shipping().quote(&address(None, Some("Nairobi")), fallback).await.unwrap();
        assert_eq!(fee, fallback);
    }
}
