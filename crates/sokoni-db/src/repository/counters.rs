//! # Sequence Counters
//!
//! Named, gapless-enough sequences for human-readable business numbers
//! (`ORD-2026-000042`, `SKU-2026-00017`).
//!
//! The increment is a single atomic upsert, so two concurrent order
//! creations can never observe the same sequence value. Counters are
//! year-scoped (`order-2026`), which resets numbering each year without
//! any maintenance job.

use sqlx::SqliteConnection;

use crate::error::DbResult;

/// Atomically increments the named counter and returns the new value.
///
/// Runs on the caller's transaction: a rolled-back order creation may burn
/// a number, which is acceptable (numbers are unique, not gapless).
pub async fn next_seq(conn: &mut SqliteConnection, name: &str) -> DbResult<i64> {
    let seq: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO counters (name, seq) VALUES (?1, 1)
        ON CONFLICT(name) DO UPDATE SET seq = seq + 1
        RETURNING seq
        "#,
    )
    .bind(name)
    .fetch_one(&mut *conn)
    .await?;

    Ok(seq)
}

/// Formats an order number: `ORD-YYYY-NNNNNN`.
pub fn order_number(year: i32, seq: i64) -> String {
    format!("{}-{}-{:06}", sokoni_core::ORDER_NUMBER_PREFIX, year, seq)
}

/// Formats a generated SKU: `SKU-YYYY-NNNNN`.
pub fn sku(year: i32, seq: i64) -> String {
    format!("{}-{}-{:05}", sokoni_core::SKU_PREFIX, year, seq)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::test_db;

    #[test]
    fn test_number_formats() {
        assert_eq!(order_number(2026, 42), "ORD-2026-000042");
        assert_eq!(sku(2026, 17), "SKU-2026-00017");
    }

    #[tokio::test]
    async fn test_next_seq_is_monotonic() {
        let db = test_db().await;
        let mut conn = db.pool().acquire().await.unwrap();

        assert_eq!(next_seq(&mut conn, "order-2026").await.unwrap(), 1);
        assert_eq!(next_seq(&mut conn, "order-2026").await.unwrap(), 2);
        // Independent counters don't interfere
        assert_eq!(next_seq(&mut conn, "sku-2026").await.unwrap(), 1);
        assert_eq!(next_seq(&mut conn, "order-2026").await.unwrap(), 3);
    }
}
