//! # Payment Transaction Ledger
//!
//! Every payment attempt is a ledger row; rows are never deleted. The
//! order's payment sub-record is a mirror updated only in the same
//! transaction as the ledger row, so "is it paid?" reads never race the
//! ledger.
//!
//! ## Reconciliation
//! Providers deliver callbacks at-least-once and in any order. Reconcile
//! is therefore idempotent: unknown correlation ids and already-settled
//! transactions are acknowledged without mutation, and the amount check
//! runs before any success is recorded.

use chrono::Utc;
use serde_json::Value;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use sokoni_core::{
    CoreError, OrderStatus, PaymentTransaction, ProviderCallback, ProviderKind, TxStatus,
};

// =============================================================================
// Row type
// =============================================================================

const TX_COLUMNS: &str = r#"
    id, order_id, provider, amount_cents, currency, status,
    idempotency_key, correlation_id, provider_tx_id, raw, error,
    created_at, updated_at
"#;

#[derive(Debug, sqlx::FromRow)]
struct TxRow {
    id: String,
    order_id: String,
    provider: ProviderKind,
    amount_cents: i64,
    currency: String,
    status: TxStatus,
    idempotency_key: Option<String>,
    correlation_id: Option<String>,
    provider_tx_id: Option<String>,
    raw: Option<String>,
    error: Option<String>,
    created_at: chrono::DateTime<Utc>,
    updated_at: chrono::DateTime<Utc>,
}

impl TxRow {
    fn into_transaction(self) -> DbResult<PaymentTransaction> {
        let raw = match self.raw {
            Some(text) => Some(serde_json::from_str(&text)?),
            None => None,
        };
        Ok(PaymentTransaction {
            id: self.id,
            order_id: self.order_id,
            provider: self.provider,
            amount_cents: self.amount_cents,
            currency: self.currency,
            status: self.status,
            idempotency_key: self.idempotency_key,
            correlation_id: self.correlation_id,
            provider_tx_id: self.provider_tx_id,
            raw,
            error: self.error,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

// =============================================================================
// Reconcile outcome
// =============================================================================

/// What a reconciliation callback did to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Correlation id matched nothing; acknowledged, no mutation.
    Unknown,
    /// Transaction already terminal; acknowledged, no mutation.
    AlreadySettled,
    /// Reported amount differed from the stored amount; transaction
    /// `failed`, order untouched.
    AmountMismatch,
    /// Provider reported failure; transaction `failed`, order untouched
    /// (stays payable).
    Failed,
    /// Verified success; transaction `succeeded`, order `paid`.
    Succeeded,
    /// Verified success, but the order settled terminally first (cancel
    /// won the race); transaction `failed` with a conflict note.
    Conflict,
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for the payment transaction ledger.
#[derive(Debug, Clone)]
pub struct PaymentRepository {
    pool: SqlitePool,
}

impl PaymentRepository {
    /// Creates a new PaymentRepository.
    pub fn new(pool: SqlitePool) -> Self {
        PaymentRepository { pool }
    }

    /// Creates (or, with an idempotency key, returns the existing) ledger
    /// row for a payment attempt.
    ///
    /// The amount is always the stored order total; client-supplied amounts
    /// are never accepted. Returns `(transaction, created)` where `created`
    /// distinguishes a fresh row from an idempotent replay.
    pub async fn initiate(
        &self,
        order_id: &str,
        provider: ProviderKind,
        idempotency_key: Option<&str>,
    ) -> DbResult<(PaymentTransaction, bool)> {
        let mut tx = self.pool.begin().await?;

        // Replay check comes first: a client that lost the response to a
        // settled payment and retries the same key must get the original
        // row back, not OrderNotPayable.
        if let Some(key) = idempotency_key {
            if let Some(row) = find_by_key(&mut tx, order_id, provider, key).await? {
                debug!(tx_id = %row.id, "Idempotent payment replay");
                return Ok((row.into_transaction()?, false));
            }
        }

        let order: Option<(String, OrderStatus, i64, String)> = sqlx::query_as(
            "SELECT id, status, total_cents, currency FROM orders WHERE id = ?1",
        )
        .bind(order_id)
        .fetch_optional(&mut *tx)
        .await?;

        let (order_id_owned, status, total_cents, currency) =
            order.ok_or_else(|| DbError::not_found("Order", order_id))?;

        if !status.is_payable() {
            return Err(DbError::Core(CoreError::OrderNotPayable {
                order_id: order_id_owned,
                status,
            }));
        }

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let inserted = sqlx::query(
            r#"
            INSERT INTO payment_transactions (
                id, order_id, provider, amount_cents, currency, status,
                idempotency_key, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, 'initiated', ?6, ?7, ?7)
            "#,
        )
        .bind(&id)
        .bind(order_id)
        .bind(provider)
        .bind(total_cents)
        .bind(&currency)
        .bind(idempotency_key)
        .bind(now)
        .execute(&mut *tx)
        .await;

        if let Err(err) = inserted {
            let db_err = DbError::from(err);
            // Two first-time attempts raced on the same key; the loser
            // returns the winner's row instead of surfacing the unique
            // index violation.
            if let (DbError::UniqueViolation { .. }, Some(key)) = (&db_err, idempotency_key) {
                drop(tx);
                let mut conn = self.pool.acquire().await?;
                if let Some(row) = find_by_key(&mut conn, order_id, provider, key).await? {
                    debug!(tx_id = %row.id, "Lost initiation race, returning existing row");
                    return Ok((row.into_transaction()?, false));
                }
            }
            return Err(db_err);
        }

        tx.commit().await?;

        info!(tx_id = %id, order_id = %order_id, amount_cents = total_cents, "Payment initiated");

        let transaction = self.get_by_id(&id).await?.ok_or_else(|| {
            DbError::not_found("PaymentTransaction", &id)
        })?;
        Ok((transaction, true))
    }

    /// Records provider acceptance (or an unknown outcome after a timeout):
    /// the charge may still complete provider-side, so the row goes to
    /// `pending`, never silently to `failed`.
    ///
    /// `charged_amount_cents` is the amount the provider will actually
    /// collect when its currency unit is coarser than ours (M-Pesa charges
    /// whole KES); the ledger stores it so reconciliation compares the
    /// callback against the real charge, not the unrounded order total.
    pub async fn mark_pending(
        &self,
        tx_id: &str,
        correlation_id: Option<&str>,
        raw: Option<&Value>,
        charged_amount_cents: Option<i64>,
    ) -> DbResult<PaymentTransaction> {
        let raw_text = raw.map(|v| v.to_string());
        sqlx::query(
            r#"
            UPDATE payment_transactions
            SET status = 'pending',
                correlation_id = COALESCE(?2, correlation_id),
                raw = COALESCE(?3, raw),
                amount_cents = COALESCE(?4, amount_cents),
                updated_at = ?5
            WHERE id = ?1 AND status = 'initiated'
            "#,
        )
        .bind(tx_id)
        .bind(correlation_id)
        .bind(raw_text)
        .bind(charged_amount_cents)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        self.require(tx_id).await
    }

    /// Records an explicit provider rejection at initiation time.
    pub async fn mark_initiation_failed(
        &self,
        tx_id: &str,
        reason: &str,
        raw: Option<&Value>,
    ) -> DbResult<PaymentTransaction> {
        let raw_text = raw.map(|v| v.to_string());
        sqlx::query(
            r#"
            UPDATE payment_transactions
            SET status = 'failed', error = ?2, raw = COALESCE(?3, raw), updated_at = ?4
            WHERE id = ?1 AND status IN ('initiated', 'pending')
            "#,
        )
        .bind(tx_id)
        .bind(reason)
        .bind(raw_text)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        self.require(tx_id).await
    }

    /// Settles a dev-provider transaction immediately: same transactional
    /// succeeded+paid path a real provider callback takes.
    pub async fn settle_dev(&self, tx_id: &str) -> DbResult<PaymentTransaction> {
        let mut tx = self.pool.begin().await?;

        let row = fetch_tx_row(&mut tx, tx_id)
            .await?
            .ok_or_else(|| DbError::not_found("PaymentTransaction", tx_id))?;

        if row.status.is_terminal() {
            tx.commit().await?;
            return row.into_transaction();
        }

        let receipt = format!("dev-{}", row.id);
        settle_success(&mut tx, &row, &receipt, None).await?;

        tx.commit().await?;
        info!(tx_id = %tx_id, "Dev payment settled");

        self.require(tx_id).await
    }

    /// Applies a normalized provider callback to the ledger.
    ///
    /// Safe under at-least-once delivery and arbitrary ordering; see the
    /// [`ReconcileOutcome`] variants for the full decision table.
    pub async fn reconcile(&self, cb: &ProviderCallback) -> DbResult<ReconcileOutcome> {
        let mut tx = self.pool.begin().await?;

        let row: Option<TxRow> = sqlx::query_as(&format!(
            "SELECT {TX_COLUMNS} FROM payment_transactions WHERE correlation_id = ?1"
        ))
        .bind(&cb.correlation_id)
        .fetch_optional(&mut *tx)
        .await?;

        let row = match row {
            Some(row) => row,
            None => {
                warn!(correlation_id = %cb.correlation_id, "Callback for unknown transaction");
                return Ok(ReconcileOutcome::Unknown);
            }
        };

        if row.status.is_terminal() {
            debug!(tx_id = %row.id, "Duplicate callback for settled transaction");
            return Ok(ReconcileOutcome::AlreadySettled);
        }

        let raw_text = cb.raw.to_string();

        if !cb.success {
            let reason = cb
                .failure_reason
                .clone()
                .unwrap_or_else(|| "provider reported failure".to_string());
            mark_failed(&mut tx, &row.id, &reason, &raw_text).await?;
            tx.commit().await?;
            info!(tx_id = %row.id, "Payment failed at provider");
            return Ok(ReconcileOutcome::Failed);
        }

        // Verify the reported amount before recording success.
        let reported = cb.amount_cents.unwrap_or(row.amount_cents);
        if reported != row.amount_cents {
            let reason = format!(
                "amount mismatch: expected {} got {}",
                row.amount_cents, reported
            );
            mark_failed(&mut tx, &row.id, &reason, &raw_text).await?;
            tx.commit().await?;
            warn!(tx_id = %row.id, expected = row.amount_cents, reported, "Amount mismatch");
            return Ok(ReconcileOutcome::AmountMismatch);
        }

        // Terminal-state-first-wins: if the order settled terminally while
        // the charge was in flight, the money flow is a conflict to resolve
        // out of band, not a paid order.
        let order_status: Option<OrderStatus> =
            sqlx::query_scalar("SELECT status FROM orders WHERE id = ?1")
                .bind(&row.order_id)
                .fetch_optional(&mut *tx)
                .await?;

        let payable = matches!(order_status, Some(status) if status.can_transition(OrderStatus::Paid));
        if !payable {
            let reason = format!(
                "order {} no longer payable (status {:?})",
                row.order_id, order_status
            );
            mark_failed(&mut tx, &row.id, &reason, &raw_text).await?;
            tx.commit().await?;
            warn!(tx_id = %row.id, order_id = %row.order_id, "Settlement conflict");
            return Ok(ReconcileOutcome::Conflict);
        }

        let receipt = cb.receipt.clone().unwrap_or_default();
        settle_success(&mut tx, &row, &receipt, Some(&raw_text)).await?;
        tx.commit().await?;

        info!(tx_id = %row.id, order_id = %row.order_id, "Payment reconciled, order paid");
        Ok(ReconcileOutcome::Succeeded)
    }

    /// Gets a ledger row by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<PaymentTransaction>> {
        let row: Option<TxRow> = sqlx::query_as(&format!(
            "SELECT {TX_COLUMNS} FROM payment_transactions WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TxRow::into_transaction).transpose()
    }

    /// Lists the ledger rows for an order, oldest first.
    pub async fn list_for_order(&self, order_id: &str) -> DbResult<Vec<PaymentTransaction>> {
        let rows: Vec<TxRow> = sqlx::query_as(&format!(
            "SELECT {TX_COLUMNS} FROM payment_transactions \
             WHERE order_id = ?1 ORDER BY created_at"
        ))
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TxRow::into_transaction).collect()
    }

    async fn require(&self, tx_id: &str) -> DbResult<PaymentTransaction> {
        self.get_by_id(tx_id)
            .await?
            .ok_or_else(|| DbError::not_found("PaymentTransaction", tx_id))
    }
}

// =============================================================================
// Transaction-scoped helpers
// =============================================================================

async fn find_by_key(
    conn: &mut SqliteConnection,
    order_id: &str,
    provider: ProviderKind,
    key: &str,
) -> DbResult<Option<TxRow>> {
    let row: Option<TxRow> = sqlx::query_as(&format!(
        "SELECT {TX_COLUMNS} FROM payment_transactions \
         WHERE order_id = ?1 AND provider = ?2 AND idempotency_key = ?3"
    ))
    .bind(order_id)
    .bind(provider)
    .bind(key)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row)
}

async fn fetch_tx_row(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<TxRow>> {
    let row: Option<TxRow> = sqlx::query_as(&format!(
        "SELECT {TX_COLUMNS} FROM payment_transactions WHERE id = ?1"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row)
}

async fn mark_failed(
    conn: &mut SqliteConnection,
    tx_id: &str,
    reason: &str,
    raw: &str,
) -> DbResult<()> {
    sqlx::query(
        r#"
        UPDATE payment_transactions
        SET status = 'failed', error = ?2, raw = ?3, updated_at = ?4
        WHERE id = ?1
        "#,
    )
    .bind(tx_id)
    .bind(reason)
    .bind(raw)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Marks the transaction succeeded and the order paid, in the caller's
/// transaction. Both rows move together or neither does.
async fn settle_success(
    conn: &mut SqliteConnection,
    row: &TxRow,
    receipt: &str,
    raw: Option<&str>,
) -> DbResult<()> {
    let now = Utc::now();

    sqlx::query(
        r#"
        UPDATE payment_transactions
        SET status = 'succeeded', provider_tx_id = ?2, raw = COALESCE(?3, raw), updated_at = ?4
        WHERE id = ?1
        "#,
    )
    .bind(&row.id)
    .bind(receipt)
    .bind(raw)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        r#"
        UPDATE orders
        SET status = 'paid',
            payment_status = 'paid',
            payment_transaction_id = ?2,
            updated_at = ?3
        WHERE id = ?1 AND status = 'pending'
        "#,
    )
    .bind(&row.order_id)
    .bind(&row.id)
    .bind(now)
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
    use crate::test_util::{simple_product, test_db};
    use sokoni_core::{Address, Money, OrderStatus, PaymentState, ReservationItem};

    fn nairobi_address() -> Address {
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

    async fn seeded_order_priced(
        db: &crate::pool::Database,
        price_cents: i64,
        stock: i64,
        qty: i64,
    ) -> (String, String) {
        let product = db
            .products()
            .insert(simple_product("Tee", price_cents, stock))
            .await
            .unwrap();
        let order = db
            .orders()
            .create(NewOrder {
                user_id: "u1".into(),
                items: vec![ReservationItem {
                    product_id: product.id.clone(),
                    variant_id: None,
                    quantity: qty,
                    location: None,
                }],
                shipping_address: nairobi_address(),
                provider: ProviderKind::Mpesa,
                shipping_fee: Money::zero(),
                currency: None,
            })
            .await
            .unwrap();
        (order.id, product.id)
    }

    async fn seeded_order(db: &crate::pool::Database, stock: i64, qty: i64) -> (String, String) {
        seeded_order_priced(db, 1500_00, stock, qty).await
    }

    fn callback(correlation_id: &str, success: bool, amount: Option<i64>) -> ProviderCallback {
        ProviderCallback {
            correlation_id: correlation_id.to_string(),
            success,
            amount_cents: amount,
            receipt: success.then(|| "RCPT123".to_string()),
            failure_reason: (!success).then(|| "Request cancelled by user".to_string()),
            raw: serde_json::json!({"test": true}),
        }
    }

    #[tokio::test]
    async fn test_initiate_uses_server_amount() {
        let db = test_db().await;
        let (order_id, _) = seeded_order(&db, 5, 2).await;

        let (tx, created) = db
            .payments()
            .initiate(&order_id, ProviderKind::Mpesa, None)
            .await
            .unwrap();

        assert!(created);
        assert_eq!(tx.status, TxStatus::Initiated);
        assert_eq!(tx.amount_cents, 3000_00);
    }

    #[tokio::test]
    async fn test_initiate_is_idempotent_per_key() {
        let db = test_db().await;
        let (order_id, _) = seeded_order(&db, 5, 1).await;

        let (first, created) = db
            .payments()
            .initiate(&order_id, ProviderKind::Mpesa, Some("key-1"))
            .await
            .unwrap();
        assert!(created);

        let (replay, created) = db
            .payments()
            .initiate(&order_id, ProviderKind::Mpesa, Some("key-1"))
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(replay.id, first.id);

        // A different key mints a new attempt
        let (second, created) = db
            .payments()
            .initiate(&order_id, ProviderKind::Mpesa, Some("key-2"))
            .await
            .unwrap();
        assert!(created);
        assert_ne!(second.id, first.id);
    }

    #[tokio::test]
    async fn test_idempotent_replay_after_settlement() {
        let db = test_db().await;
        let (order_id, _) = seeded_order(&db, 5, 1).await;

        let (tx, created) = db
            .payments()
            .initiate(&order_id, ProviderKind::None, Some("retry-key"))
            .await
            .unwrap();
        assert!(created);
        db.payments().settle_dev(&tx.id).await.unwrap();

        // Client lost the response and retries the same key: it must get
        // the settled row back, not OrderNotPayable
        let (replay, created) = db
            .payments()
            .initiate(&order_id, ProviderKind::None, Some("retry-key"))
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(replay.id, tx.id);
        assert_eq!(replay.status, TxStatus::Succeeded);

        // A keyless attempt against the now-paid order is still refused
        let err = db
            .payments()
            .initiate(&order_id, ProviderKind::None, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::Core(CoreError::OrderNotPayable { .. })
        ));
    }

    #[tokio::test]
    async fn test_initiate_refuses_unpayable_order() {
        let db = test_db().await;
        let (order_id, _) = seeded_order(&db, 5, 1).await;
        db.orders().cancel(&order_id, None).await.unwrap();

        let err = db
            .payments()
            .initiate(&order_id, ProviderKind::Mpesa, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::Core(CoreError::OrderNotPayable { .. })
        ));
    }

    #[tokio::test]
    async fn test_dev_provider_settles_immediately() {
        let db = test_db().await;
        let (order_id, _) = seeded_order(&db, 5, 1).await;

        let (tx, _) = db.payments().initiate(&order_id, ProviderKind::None, None).await.unwrap();
        let settled = db.payments().settle_dev(&tx.id).await.unwrap();

        assert_eq!(settled.status, TxStatus::Succeeded);
        assert_eq!(settled.provider_tx_id, Some(format!("dev-{}", tx.id)));

        let order = db.orders().get_by_id(&order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Paid);
        assert_eq!(order.payment.status, PaymentState::Paid);
        assert_eq!(order.payment.transaction_id, Some(tx.id));
    }

    #[tokio::test]
    async fn test_reconcile_success_marks_order_paid() {
        let db = test_db().await;
        let (order_id, _) = seeded_order(&db, 5, 2).await;

        let (tx, _) = db.payments().initiate(&order_id, ProviderKind::Mpesa, None).await.unwrap();
        db.payments().mark_pending(&tx.id, Some("ws_CO_1"), None, None).await.unwrap();

        let outcome = db
            .payments()
            .reconcile(&callback("ws_CO_1", true, Some(3000_00)))
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Succeeded);

        let order = db.orders().get_by_id(&order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Paid);

        let settled = db.payments().get_by_id(&tx.id).await.unwrap().unwrap();
        assert_eq!(settled.status, TxStatus::Succeeded);
        assert_eq!(settled.provider_tx_id.as_deref(), Some("RCPT123"));
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let db = test_db().await;
        let (order_id, _) = seeded_order(&db, 5, 1).await;

        let (tx, _) = db.payments().initiate(&order_id, ProviderKind::Mpesa, None).await.unwrap();
        db.payments().mark_pending(&tx.id, Some("ws_CO_2"), None, None).await.unwrap();

        let first = db.payments().reconcile(&callback("ws_CO_2", true, None)).await.unwrap();
        assert_eq!(first, ReconcileOutcome::Succeeded);

        // Duplicate delivery: acknowledged, nothing changes
        let dup = db.payments().reconcile(&callback("ws_CO_2", true, None)).await.unwrap();
        assert_eq!(dup, ReconcileOutcome::AlreadySettled);

        let late_failure = db.payments().reconcile(&callback("ws_CO_2", false, None)).await.unwrap();
        assert_eq!(late_failure, ReconcileOutcome::AlreadySettled);

        let order = db.orders().get_by_id(&order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn test_reconcile_unknown_correlation() {
        let db = test_db().await;
        let outcome = db.payments().reconcile(&callback("ghost", true, None)).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Unknown);
    }

    #[tokio::test]
    async fn test_reconcile_amount_mismatch_fails_tx_only() {
        let db = test_db().await;
        let (order_id, _) = seeded_order(&db, 5, 2).await;

        let (tx, _) = db.payments().initiate(&order_id, ProviderKind::Mpesa, None).await.unwrap();
        db.payments().mark_pending(&tx.id, Some("ws_CO_3"), None, None).await.unwrap();

        let outcome = db
            .payments()
            .reconcile(&callback("ws_CO_3", true, Some(100)))
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::AmountMismatch);

        let failed = db.payments().get_by_id(&tx.id).await.unwrap().unwrap();
        assert_eq!(failed.status, TxStatus::Failed);
        assert!(failed.error.unwrap().contains("amount mismatch"));

        // Order untouched, still payable
        let order = db.orders().get_by_id(&order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn test_reconcile_accepts_provider_rounded_amount() {
        let db = test_db().await;
        // 1049-cent total; M-Pesa charges whole KES, so the real charge is
        // 10 KES and the callback reports 10 KES back
        let (order_id, _) = seeded_order_priced(&db, 1049, 3, 1).await;

        let (tx, _) = db.payments().initiate(&order_id, ProviderKind::Mpesa, None).await.unwrap();
        assert_eq!(tx.amount_cents, 1049);

        db.payments()
            .mark_pending(&tx.id, Some("ws_CO_6"), None, Some(1000))
            .await
            .unwrap();

        let outcome = db
            .payments()
            .reconcile(&callback("ws_CO_6", true, Some(1000)))
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Succeeded);

        let settled = db.payments().get_by_id(&tx.id).await.unwrap().unwrap();
        assert_eq!(settled.status, TxStatus::Succeeded);
        assert_eq!(settled.amount_cents, 1000);

        let order = db.orders().get_by_id(&order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn test_reconcile_failure_keeps_order_payable() {
        let db = test_db().await;
        let (order_id, _) = seeded_order(&db, 5, 1).await;

        let (tx, _) = db.payments().initiate(&order_id, ProviderKind::Mpesa, None).await.unwrap();
        db.payments().mark_pending(&tx.id, Some("ws_CO_4"), None, None).await.unwrap();

        let outcome = db.payments().reconcile(&callback("ws_CO_4", false, None)).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Failed);

        let order = db.orders().get_by_id(&order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Pending);

        // A fresh attempt is allowed
        let (retry, created) = db
            .payments()
            .initiate(&order_id, ProviderKind::Mpesa, Some("retry"))
            .await
            .unwrap();
        assert!(created);
        assert_ne!(retry.id, tx.id);
    }

    #[tokio::test]
    async fn test_cancel_after_payment_fails_mirror_and_restores_stock() {
        let db = test_db().await;
        let (order_id, product_id) = seeded_order(&db, 5, 2).await;

        let (tx, _) = db.payments().initiate(&order_id, ProviderKind::None, None).await.unwrap();
        db.payments().settle_dev(&tx.id).await.unwrap();

        let order = db.orders().cancel(&order_id, Some("u1")).await.unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
        // A cancelled order is never "paid", even after settlement
        assert_eq!(order.payment.status, PaymentState::Failed);

        // The ledger keeps the settlement record for out-of-band resolution
        let settled = db.payments().get_by_id(&tx.id).await.unwrap().unwrap();
        assert_eq!(settled.status, TxStatus::Succeeded);

        let product = db.products().get_by_id(&product_id).await.unwrap().unwrap();
        assert_eq!(product.stock, 5);
    }

    #[tokio::test]
    async fn test_cancel_wins_over_late_settlement() {
        let db = test_db().await;
        let (order_id, product_id) = seeded_order(&db, 5, 2).await;

        let (tx, _) = db.payments().initiate(&order_id, ProviderKind::Mpesa, None).await.unwrap();
        db.payments().mark_pending(&tx.id, Some("ws_CO_5"), None, None).await.unwrap();

        // Cancel commits before the provider callback arrives
        db.orders().cancel(&order_id, Some("u1")).await.unwrap();

        let outcome = db
            .payments()
            .reconcile(&callback("ws_CO_5", true, Some(3000_00)))
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Conflict);

        let order = db.orders().get_by_id(&order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);

        let conflicted = db.payments().get_by_id(&tx.id).await.unwrap().unwrap();
        assert_eq!(conflicted.status, TxStatus::Failed);
        assert!(conflicted.error.unwrap().contains("no longer payable"));

        // Restored stock stays restored
        let product = db.products().get_by_id(&product_id).await.unwrap().unwrap();
        assert_eq!(product.stock, 5);
    }
}
