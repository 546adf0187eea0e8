//! # Order Repository
//!
//! Order store: creation, cancellation and status transitions.
//!
//! ## Order Lifecycle
//! ```text
//!  1. CREATE
//!     └── create() → one transaction:
//!         reserve stock → allocate order number → insert order + items
//!         (any failure rolls back everything, stock included)
//!
//!  2. PAY
//!     └── payment ledger settles → order `paid` (see repository::payment)
//!
//!  3. FULFILL
//!     └── set_status() → processing → shipped → delivered
//!
//!  4. (OPTIONAL) CANCEL
//!     └── cancel() → one transaction:
//!         release stock → status `cancelled` → payment mirror `failed`
//! ```

use chrono::{DateTime, Datelike, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::repository::{counters, inventory};
use sokoni_core::validation::{validate_address, validate_currency, validate_order_items};
use sokoni_core::{
    Address, CoreError, Money, Order, OrderItem, OrderPayment, OrderStatus, OrderTotals,
    PaymentState, ProviderKind, ReservationItem, DEFAULT_CURRENCY,
};

// =============================================================================
// Row types
// =============================================================================

const ORDER_COLUMNS: &str = r#"
    id, order_number, user_id, status,
    sub_total_cents, shipping_fee_cents, tax_total_cents, discount_total_cents,
    total_cents, currency,
    payment_provider, payment_status, payment_amount_cents, payment_currency,
    payment_transaction_id, ship_to, created_at, updated_at
"#;

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: String,
    order_number: String,
    user_id: String,
    status: OrderStatus,
    sub_total_cents: i64,
    shipping_fee_cents: i64,
    tax_total_cents: i64,
    discount_total_cents: i64,
    total_cents: i64,
    currency: String,
    payment_provider: ProviderKind,
    payment_status: PaymentState,
    payment_amount_cents: i64,
    payment_currency: String,
    payment_transaction_id: Option<String>,
    ship_to: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl OrderRow {
    fn into_order(self, items: Vec<OrderItem>) -> DbResult<Order> {
        let shipping_address: Address = serde_json::from_str(&self.ship_to)?;
        Ok(Order {
            id: self.id,
            order_number: self.order_number,
            user_id: self.user_id,
            status: self.status,
            items,
            totals: OrderTotals {
                sub_total_cents: self.sub_total_cents,
                shipping_fee_cents: self.shipping_fee_cents,
                tax_total_cents: self.tax_total_cents,
                discount_total_cents: self.discount_total_cents,
                total_cents: self.total_cents,
            },
            currency: self.currency,
            payment: OrderPayment {
                provider: self.payment_provider,
                status: self.payment_status,
                amount_cents: self.payment_amount_cents,
                currency: self.payment_currency,
                transaction_id: self.payment_transaction_id,
            },
            shipping_address,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OrderItemRow {
    id: String,
    order_id: String,
    product_id: String,
    variant_id: Option<String>,
    name: String,
    sku: Option<String>,
    unit_price_cents: i64,
    quantity: i64,
    location: Option<String>,
}

impl From<OrderItemRow> for OrderItem {
    fn from(row: OrderItemRow) -> Self {
        OrderItem {
            id: row.id,
            order_id: row.order_id,
            product_id: row.product_id,
            variant_id: row.variant_id,
            name: row.name,
            sku: row.sku,
            unit_price_cents: row.unit_price_cents,
            quantity: row.quantity,
            location: row.location,
        }
    }
}

// =============================================================================
// Input types
// =============================================================================

/// Input for creating an order.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: String,
    pub items: Vec<ReservationItem>,
    pub shipping_address: Address,
    /// Provider recorded on the payment mirror; the actual charge comes
    /// later through the ledger.
    pub provider: ProviderKind,
    /// Shipping fee quoted for the address, frozen onto the order.
    pub shipping_fee: Money,
    pub currency: Option<String>,
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for order database operations.
#[derive(Debug, Clone)]
pub struct OrderRepository {
    pool: SqlitePool,
}

impl OrderRepository {
    /// Creates a new OrderRepository.
    pub fn new(pool: SqlitePool) -> Self {
        OrderRepository { pool }
    }

    /// Creates an order: reserves stock, allocates an order number and
    /// inserts the order with frozen item snapshots, all in one transaction.
    ///
    /// Totals are computed here exactly once from the snapshots; nothing
    /// downstream re-derives them from live product data.
    pub async fn create(&self, new: NewOrder) -> DbResult<Order> {
        validate_order_items(&new.items).map_err(CoreError::from)?;
        validate_address(&new.shipping_address).map_err(CoreError::from)?;
        let currency = match new.currency {
            Some(c) => {
                validate_currency(&c).map_err(CoreError::from)?;
                c
            }
            None => DEFAULT_CURRENCY.to_string(),
        };

        let mut tx = self.pool.begin().await?;

        let snapshots = inventory::reserve(&mut tx, &new.items).await?;

        let now = Utc::now();
        let year = now.year();
        let seq = counters::next_seq(&mut tx, &format!("order-{year}")).await?;
        let order_number = counters::order_number(year, seq);

        let order_id = Uuid::new_v4().to_string();
        let items: Vec<OrderItem> = snapshots
            .into_iter()
            .map(|s| OrderItem {
                id: Uuid::new_v4().to_string(),
                order_id: order_id.clone(),
                product_id: s.product_id,
                variant_id: s.variant_id,
                name: s.name,
                sku: s.sku,
                unit_price_cents: s.unit_price_cents,
                quantity: s.quantity,
                location: s.location,
            })
            .collect();

        let totals = OrderTotals::compute(&items, new.shipping_fee, Money::zero(), Money::zero());
        let ship_to = serde_json::to_string(&new.shipping_address)?;

        debug!(id = %order_id, order_number = %order_number, "Inserting order");

        sqlx::query(
            r#"
            INSERT INTO orders (
                id, order_number, user_id, status,
                sub_total_cents, shipping_fee_cents, tax_total_cents, discount_total_cents,
                total_cents, currency,
                payment_provider, payment_status, payment_amount_cents, payment_currency,
                payment_transaction_id, ship_to, created_at, updated_at
            ) VALUES (
                ?1, ?2, ?3, 'pending',
                ?4, ?5, ?6, ?7,
                ?8, ?9,
                ?10, 'pending', ?8, ?9,
                NULL, ?11, ?12, ?12
            )
            "#,
        )
        .bind(&order_id)
        .bind(&order_number)
        .bind(&new.user_id)
        .bind(totals.sub_total_cents)
        .bind(totals.shipping_fee_cents)
        .bind(totals.tax_total_cents)
        .bind(totals.discount_total_cents)
        .bind(totals.total_cents)
        .bind(&currency)
        .bind(new.provider)
        .bind(&ship_to)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        for item in &items {
            sqlx::query(
                r#"
                INSERT INTO order_items (
                    id, order_id, product_id, variant_id, name, sku,
                    unit_price_cents, quantity, location
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )
            .bind(&item.id)
            .bind(&item.order_id)
            .bind(&item.product_id)
            .bind(&item.variant_id)
            .bind(&item.name)
            .bind(&item.sku)
            .bind(item.unit_price_cents)
            .bind(item.quantity)
            .bind(&item.location)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        info!(
            id = %order_id,
            order_number = %order_number,
            total_cents = totals.total_cents,
            "Order created"
        );

        Ok(Order {
            id: order_id,
            order_number,
            user_id: new.user_id,
            status: OrderStatus::Pending,
            items,
            totals,
            currency: currency.clone(),
            payment: OrderPayment {
                provider: new.provider,
                status: PaymentState::Pending,
                amount_cents: totals.total_cents,
                currency,
                transaction_id: None,
            },
            shipping_address: new.shipping_address,
            created_at: now,
            updated_at: now,
        })
    }

    /// Gets an order by ID, with its items.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Order>> {
        let mut conn = self.pool.acquire().await?;
        match fetch_order_row(&mut conn, id).await? {
            Some(row) => {
                let items = fetch_items(&mut conn, id).await?;
                Ok(Some(row.into_order(items)?))
            }
            None => Ok(None),
        }
    }

    /// Gets an order by ID scoped to its owner. A foreign order id reads as
    /// absent rather than forbidden.
    pub async fn get_for_user(&self, id: &str, user_id: &str) -> DbResult<Option<Order>> {
        match self.get_by_id(id).await? {
            Some(order) if order.user_id == user_id => Ok(Some(order)),
            _ => Ok(None),
        }
    }

    /// Lists a user's orders, newest first.
    pub async fn list_for_user(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> DbResult<Vec<Order>> {
        let rows: Vec<OrderRow> = sqlx::query_as(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = ?1 \
             ORDER BY created_at DESC LIMIT ?2 OFFSET ?3"
        ))
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        self.assemble(rows).await
    }

    /// Lists orders for the admin view, optionally filtered by status.
    pub async fn admin_list(
        &self,
        status: Option<OrderStatus>,
        limit: i64,
        offset: i64,
    ) -> DbResult<Vec<Order>> {
        let rows: Vec<OrderRow> = match status {
            Some(status) => {
                sqlx::query_as(&format!(
                    "SELECT {ORDER_COLUMNS} FROM orders WHERE status = ?1 \
                     ORDER BY created_at DESC LIMIT ?2 OFFSET ?3"
                ))
                .bind(status)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(&format!(
                    "SELECT {ORDER_COLUMNS} FROM orders \
                     ORDER BY created_at DESC LIMIT ?1 OFFSET ?2"
                ))
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
        };

        self.assemble(rows).await
    }

    /// Cancels an order, releasing its stock, in one transaction.
    ///
    /// Allowed from `pending`, `paid` and `processing`. When `requester` is
    /// given the order must belong to them. The payment mirror always goes
    /// to `failed`: a cancelled order is never "paid", even when a
    /// settlement landed before cancellation (the money flow is resolved
    /// out of band, the ledger row keeps the settlement record).
    pub async fn cancel(&self, order_id: &str, requester: Option<&str>) -> DbResult<Order> {
        let mut tx = self.pool.begin().await?;

        let row = fetch_order_row(&mut tx, order_id)
            .await?
            .ok_or_else(|| DbError::not_found("Order", order_id))?;

        if let Some(user_id) = requester {
            if row.user_id != user_id {
                return Err(DbError::not_found("Order", order_id));
            }
        }

        if !row.status.is_cancellable() {
            return Err(DbError::Core(CoreError::InvalidOrderStatus {
                order_id: row.id,
                from: row.status,
                to: OrderStatus::Cancelled,
            }));
        }

        let items: Vec<OrderItem> = fetch_items(&mut tx, order_id).await?;
        inventory::release(&mut tx, &items).await?;

        sqlx::query(
            r#"
            UPDATE orders
            SET status = 'cancelled', payment_status = 'failed', updated_at = ?2
            WHERE id = ?1
            "#,
        )
        .bind(order_id)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(id = %order_id, "Order cancelled, stock released");

        self.get_by_id(order_id)
            .await?
            .ok_or_else(|| DbError::not_found("Order", order_id))
    }

    /// Admin status transition, validated by the state machine.
    ///
    /// `cancelled` routes through [`Self::cancel`] so the stock restore is
    /// never skipped; other targets are metadata-only updates.
    pub async fn set_status(&self, order_id: &str, to: OrderStatus) -> DbResult<Order> {
        if to == OrderStatus::Cancelled {
            return self.cancel(order_id, None).await;
        }

        let mut tx = self.pool.begin().await?;

        let row = fetch_order_row(&mut tx, order_id)
            .await?
            .ok_or_else(|| DbError::not_found("Order", order_id))?;

        if !row.status.can_transition(to) {
            return Err(DbError::Core(CoreError::InvalidOrderStatus {
                order_id: row.id,
                from: row.status,
                to,
            }));
        }

        sqlx::query("UPDATE orders SET status = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(order_id)
            .bind(to)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        debug!(id = %order_id, to = to.as_str(), "Order status updated");

        self.get_by_id(order_id)
            .await?
            .ok_or_else(|| DbError::not_found("Order", order_id))
    }

    async fn assemble(&self, rows: Vec<OrderRow>) -> DbResult<Vec<Order>> {
        let mut conn = self.pool.acquire().await?;
        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            let items = fetch_items(&mut conn, &row.id).await?;
            orders.push(row.into_order(items)?);
        }
        Ok(orders)
    }
}

async fn fetch_order_row(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<OrderRow>> {
    let row: Option<OrderRow> =
        sqlx::query_as(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(row)
}

async fn fetch_items(conn: &mut SqliteConnection, order_id: &str) -> DbResult<Vec<OrderItem>> {
    let rows: Vec<OrderItemRow> = sqlx::query_as(
        r#"
        SELECT id, order_id, product_id, variant_id, name, sku,
               unit_price_cents, quantity, location
        FROM order_items
        WHERE order_id = ?1
        "#,
    )
    .bind(order_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows.into_iter().map(OrderItem::from).collect())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{file_db, simple_product, test_db};
    use sokoni_core::FailureReason;

    fn address() -> Address {
        Address {
            full_name: Some("Wanjiru K".into()),
            phone: Some("+254700000001".into()),
            line1: "Moi Avenue 12".into(),
            line2: None,
            city: Some("Nairobi".into()),
            region: None,
            postal_code: None,
            country: "Kenya".into(),
        }
    }

    fn line(product_id: &str, quantity: i64) -> ReservationItem {
        ReservationItem {
            product_id: product_id.to_string(),
            variant_id: None,
            quantity,
            location: None,
        }
    }

    fn new_order(user: &str, items: Vec<ReservationItem>) -> NewOrder {
        NewOrder {
            user_id: user.to_string(),
            items,
            shipping_address: address(),
            provider: ProviderKind::Mpesa,
            shipping_fee: Money::from_cents(300_00),
            currency: None,
        }
    }

    #[tokio::test]
    async fn test_create_decrements_and_snapshots() {
        let db = test_db().await;
        let product = db.products().insert(simple_product("Tee", 1500_00, 5)).await.unwrap();

        let order = db.orders().create(new_order("u1", vec![line(&product.id, 2)])).await.unwrap();

        assert_eq!(order.status, OrderStatus::Pending);
        assert!(order.order_number.starts_with("ORD-"));
        assert_eq!(order.totals.sub_total_cents, 3000_00);
        assert_eq!(order.totals.total_cents, 3300_00);
        assert_eq!(order.payment.amount_cents, 3300_00);
        assert_eq!(order.items[0].name, "Tee");
        assert_eq!(order.items[0].unit_price_cents, 1500_00);

        let product = db.products().get_by_id(&product.id).await.unwrap().unwrap();
        assert_eq!(product.stock, 3);
    }

    #[tokio::test]
    async fn test_create_is_all_or_nothing() {
        let db = test_db().await;
        let a = db.products().insert(simple_product("A", 1000, 10)).await.unwrap();
        let b = db.products().insert(simple_product("B", 1000, 1)).await.unwrap();

        let err = db
            .orders()
            .create(new_order("u1", vec![line(&a.id, 2), line(&b.id, 5)]))
            .await
            .unwrap_err();

        match err {
            DbError::Core(CoreError::ReservationFailed(failures)) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].product_id, b.id);
                assert!(matches!(
                    failures[0].reason,
                    FailureReason::InsufficientStock {
                        available: 1,
                        requested: 5
                    }
                ));
            }
            other => panic!("expected reservation failure, got {other:?}"),
        }

        // The passing line was rolled back too
        let a = db.products().get_by_id(&a.id).await.unwrap().unwrap();
        assert_eq!(a.stock, 10);
    }

    #[tokio::test]
    async fn test_create_reports_every_failing_line() {
        let db = test_db().await;
        let a = db.products().insert(simple_product("A", 1000, 1)).await.unwrap();

        let err = db
            .orders()
            .create(new_order("u1", vec![line(&a.id, 3), line("ghost", 1)]))
            .await
            .unwrap_err();

        match err {
            DbError::Core(CoreError::ReservationFailed(failures)) => {
                assert_eq!(failures.len(), 2);
            }
            other => panic!("expected reservation failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_backorder_goes_negative() {
        let db = test_db().await;
        let mut input = simple_product("Preorder", 2000_00, 1);
        input.allow_backorder = true;
        let product = db.products().insert(input).await.unwrap();

        db.orders().create(new_order("u1", vec![line(&product.id, 4)])).await.unwrap();

        let product = db.products().get_by_id(&product.id).await.unwrap().unwrap();
        assert_eq!(product.stock, -3);
        assert!(!product.in_stock);
    }

    #[tokio::test]
    async fn test_cancel_restores_stock() {
        let db = test_db().await;
        let product = db.products().insert(simple_product("Tee", 1500_00, 5)).await.unwrap();
        let order = db.orders().create(new_order("u1", vec![line(&product.id, 3)])).await.unwrap();

        let cancelled = db.orders().cancel(&order.id, Some("u1")).await.unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(cancelled.payment.status, PaymentState::Failed);

        let product = db.products().get_by_id(&product.id).await.unwrap().unwrap();
        assert_eq!(product.stock, 5);

        // Cancelling twice is a conflict, and must not restock twice
        let err = db.orders().cancel(&order.id, Some("u1")).await.unwrap_err();
        assert!(matches!(
            err,
            DbError::Core(CoreError::InvalidOrderStatus { .. })
        ));
        let product = db.products().get_by_id(&product.id).await.unwrap().unwrap();
        assert_eq!(product.stock, 5);
    }

    #[tokio::test]
    async fn test_cancel_scoped_to_owner() {
        let db = test_db().await;
        let product = db.products().insert(simple_product("Tee", 1500_00, 5)).await.unwrap();
        let order = db.orders().create(new_order("u1", vec![line(&product.id, 1)])).await.unwrap();

        let err = db.orders().cancel(&order.id, Some("intruder")).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_admin_transitions_follow_state_machine() {
        let db = test_db().await;
        let product = db.products().insert(simple_product("Tee", 1500_00, 5)).await.unwrap();
        let order = db.orders().create(new_order("u1", vec![line(&product.id, 1)])).await.unwrap();

        // Skipping states is refused
        let err = db.orders().set_status(&order.id, OrderStatus::Shipped).await.unwrap_err();
        assert!(matches!(
            err,
            DbError::Core(CoreError::InvalidOrderStatus { .. })
        ));

        db.orders().set_status(&order.id, OrderStatus::Paid).await.unwrap();
        db.orders().set_status(&order.id, OrderStatus::Processing).await.unwrap();
        db.orders().set_status(&order.id, OrderStatus::Shipped).await.unwrap();
        let done = db.orders().set_status(&order.id, OrderStatus::Delivered).await.unwrap();
        assert_eq!(done.status, OrderStatus::Delivered);
    }

    #[tokio::test]
    async fn test_list_for_user_is_scoped() {
        let db = test_db().await;
        let product = db.products().insert(simple_product("Tee", 1500_00, 10)).await.unwrap();
        db.orders().create(new_order("u1", vec![line(&product.id, 1)])).await.unwrap();
        db.orders().create(new_order("u2", vec![line(&product.id, 1)])).await.unwrap();

        let mine = db.orders().list_for_user("u1", 20, 0).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].user_id, "u1");

        let all = db.orders().admin_list(None, 20, 0).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_no_oversell_under_concurrency() {
        let (_dir, db) = file_db().await;
        let product = db.products().insert(simple_product("Last unit", 9999, 1)).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..4 {
            let db = db.clone();
            let product_id = product.id.clone();
            handles.push(tokio::spawn(async move {
                db.orders()
                    .create(new_order(&format!("u{i}"), vec![line(&product_id, 1)]))
                    .await
            }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                successes += 1;
            }
        }

        assert_eq!(successes, 1, "exactly one checkout may win the last unit");
        let product = db.products().get_by_id(&product.id).await.unwrap().unwrap();
        assert_eq!(product.stock, 0);
    }
}
