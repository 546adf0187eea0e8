//! Shared helpers for repository tests.

use tempfile::TempDir;

use crate::pool::{Database, DbConfig};
use crate::repository::product::NewProduct;

/// Fresh in-memory database with migrations applied.
pub async fn test_db() -> Database {
    Database::new(DbConfig::in_memory()).await.unwrap()
}

/// On-disk database for tests that need several concurrent connections
/// (in-memory SQLite is limited to one). Keep the TempDir alive for the
/// duration of the test.
pub async fn file_db() -> (TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    let config = DbConfig::new(dir.path().join("test.db")).max_connections(8);
    let db = Database::new(config).await.unwrap();
    (dir, db)
}

/// Minimal variant-less product input.
pub fn simple_product(name: &str, price_cents: i64, stock: i64) -> NewProduct {
    NewProduct {
        name: name.to_string(),
        description: None,
        price_cents,
        currency: None,
        stock,
        allow_backorder: false,
        sku: None,
        variants: Vec::new(),
    }
}
