//! Postgres-backed ledger store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

use super::LedgerStore;
use crate::error::AppError;
use crate::models::transaction::TransactionResolution;
use crate::models::{
    InstallmentPlan, Order, OrderStatus, PlanStatus, SavedCredential, Transaction,
    TransactionKind, Wallet, WalletLedgerEntry,
};

#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    #[instrument(skip(database_url))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::Database(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Database(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn create_order(&self, order: Order) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, total_minor, status, gateway_order_id, due_amount_minor, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(order.id)
        .bind(order.user_id)
        .bind(order.total_minor)
        .bind(order.status)
        .bind(&order.gateway_order_id)
        .bind(order.due_amount_minor)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_order(&self, id: i64) -> Result<Option<Order>, AppError> {
        let order = sqlx::query_as::<_, Order>(
            r#"
            SELECT id, user_id, total_minor, status, gateway_order_id, due_amount_minor, created_at, updated_at
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(order)
    }

    async fn update_order_status(
        &self,
        id: i64,
        status: OrderStatus,
        gateway_order_id: Option<&str>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE orders
            SET status = $2,
                gateway_order_id = COALESCE($3, gateway_order_id),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(gateway_order_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_order_due_amount(&self, id: i64, due_minor: i64) -> Result<(), AppError> {
        sqlx::query("UPDATE orders SET due_amount_minor = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(due_minor)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn create_transaction(&self, transaction: Transaction) -> Result<(), AppError> {
        insert_transaction_query(&transaction, false)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_attempt(&self, transaction: Transaction) -> Result<bool, AppError> {
        let result = insert_transaction_query(&transaction, true)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn find_transaction_by_order(
        &self,
        order_id: i64,
        kind: TransactionKind,
    ) -> Result<Option<Transaction>, AppError> {
        let transaction = sqlx::query_as::<_, Transaction>(
            r#"
            SELECT id, order_id, user_id, kind, status, gateway_transaction_id, gateway_order_id,
                   merchant_order_id, amount_minor, success, payload, created_at, updated_at
            FROM transactions
            WHERE order_id = $1 AND kind = $2
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(order_id)
        .bind(kind)
        .fetch_optional(&self.pool)
        .await?;
        Ok(transaction)
    }

    async fn find_transaction_by_reference(
        &self,
        kind: TransactionKind,
        reference: &str,
    ) -> Result<Option<Transaction>, AppError> {
        let transaction = sqlx::query_as::<_, Transaction>(
            r#"
            SELECT id, order_id, user_id, kind, status, gateway_transaction_id, gateway_order_id,
                   merchant_order_id, amount_minor, success, payload, created_at, updated_at
            FROM transactions
            WHERE kind = $1 AND gateway_transaction_id = $2
            "#,
        )
        .bind(kind)
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;
        Ok(transaction)
    }

    async fn resolve_transaction(
        &self,
        id: Uuid,
        resolution: TransactionResolution,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE transactions
            SET status = $2,
                success = $3,
                gateway_transaction_id = COALESCE($4, gateway_transaction_id),
                gateway_order_id = COALESCE($5, gateway_order_id),
                payload = COALESCE($6, payload),
                updated_at = NOW()
            WHERE id = $1 AND status <> 'SUCCESS'
            "#,
        )
        .bind(id)
        .bind(resolution.status)
        .bind(resolution.success)
        .bind(&resolution.gateway_transaction_id)
        .bind(&resolution.gateway_order_id)
        .bind(&resolution.payload)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_transactions_by_user(
        &self,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Transaction>, i64), AppError> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM transactions WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;

        let transactions = sqlx::query_as::<_, Transaction>(
            r#"
            SELECT id, order_id, user_id, kind, status, gateway_transaction_id, gateway_order_id,
                   merchant_order_id, amount_minor, success, payload, created_at, updated_at
            FROM transactions
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok((transactions, total))
    }

    async fn create_plan(&self, plan: InstallmentPlan) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO installment_plans
                (order_id, installment_count, installments_paid, installment_amount_minor,
                 status, next_due_date, charge_in_flight_until, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(plan.order_id)
        .bind(plan.installment_count)
        .bind(plan.installments_paid)
        .bind(plan.installment_amount_minor)
        .bind(plan.status)
        .bind(plan.next_due_date)
        .bind(plan.charge_in_flight_until)
        .bind(plan.created_at)
        .bind(plan.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_plan(&self, order_id: i64) -> Result<Option<InstallmentPlan>, AppError> {
        let plan = sqlx::query_as::<_, InstallmentPlan>(
            r#"
            SELECT order_id, installment_count, installments_paid, installment_amount_minor,
                   status, next_due_date, charge_in_flight_until, created_at, updated_at
            FROM installment_plans
            WHERE order_id = $1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(plan)
    }

    async fn update_plan_progress(
        &self,
        order_id: i64,
        installments_paid: i32,
        status: PlanStatus,
        next_due_date: Option<DateTime<Utc>>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE installment_plans
            SET installments_paid = $2,
                status = $3,
                next_due_date = $4,
                charge_in_flight_until = NULL,
                updated_at = NOW()
            WHERE order_id = $1
            "#,
        )
        .bind(order_id)
        .bind(installments_paid)
        .bind(status)
        .bind(next_due_date)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_due_plans(&self, now: DateTime<Utc>) -> Result<Vec<InstallmentPlan>, AppError> {
        let plans = sqlx::query_as::<_, InstallmentPlan>(
            r#"
            SELECT order_id, installment_count, installments_paid, installment_amount_minor,
                   status, next_due_date, charge_in_flight_until, created_at, updated_at
            FROM installment_plans
            WHERE status = 'ONGOING'
              AND installments_paid < installment_count
              AND next_due_date IS NOT NULL
              AND next_due_date <= $1
              AND (charge_in_flight_until IS NULL OR charge_in_flight_until <= $1)
            ORDER BY next_due_date
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(plans)
    }

    async fn mark_charge_in_flight(
        &self,
        order_id: i64,
        until: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE installment_plans SET charge_in_flight_until = $2, updated_at = NOW() WHERE order_id = $1",
        )
        .bind(order_id)
        .bind(until)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_charge_in_flight(&self, order_id: i64) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE installment_plans SET charge_in_flight_until = NULL, updated_at = NOW() WHERE order_id = $1",
        )
        .bind(order_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_credential(&self, credential: SavedCredential) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO saved_credentials (gateway_order_id, token, payload, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (gateway_order_id) DO NOTHING
            "#,
        )
        .bind(&credential.gateway_order_id)
        .bind(&credential.token)
        .bind(&credential.payload)
        .bind(credential.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_credential(
        &self,
        gateway_order_id: &str,
    ) -> Result<Option<SavedCredential>, AppError> {
        let credential = sqlx::query_as::<_, SavedCredential>(
            r#"
            SELECT gateway_order_id, token, payload, created_at
            FROM saved_credentials
            WHERE gateway_order_id = $1
            "#,
        )
        .bind(gateway_order_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(credential)
    }

    async fn get_wallet(&self, user_id: i64) -> Result<Option<Wallet>, AppError> {
        let wallet = sqlx::query_as::<_, Wallet>(
            "SELECT user_id, balance_minor, updated_at FROM wallets WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(wallet)
    }

    async fn credit_wallet(
        &self,
        user_id: i64,
        amount_minor: i64,
        reference_id: &str,
    ) -> Result<Option<WalletLedgerEntry>, AppError> {
        let mut tx = self.pool.begin().await?;

        // Lock (or create) the wallet row so concurrent credits serialize.
        let balance_before: i64 = match sqlx::query_scalar::<_, i64>(
            "SELECT balance_minor FROM wallets WHERE user_id = $1 FOR UPDATE",
        )
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?
        {
            Some(balance) => balance,
            None => {
                sqlx::query(
                    "INSERT INTO wallets (user_id, balance_minor, updated_at) VALUES ($1, 0, NOW())",
                )
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
                0
            }
        };

        let entry = WalletLedgerEntry {
            id: Uuid::new_v4(),
            user_id,
            reference_id: reference_id.to_string(),
            amount_minor,
            balance_before_minor: balance_before,
            balance_after_minor: balance_before + amount_minor,
            created_at: Utc::now(),
        };

        let inserted = sqlx::query(
            r#"
            INSERT INTO wallet_ledger_entries
                (id, user_id, reference_id, amount_minor, balance_before_minor, balance_after_minor, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (reference_id) DO NOTHING
            "#,
        )
        .bind(entry.id)
        .bind(entry.user_id)
        .bind(&entry.reference_id)
        .bind(entry.amount_minor)
        .bind(entry.balance_before_minor)
        .bind(entry.balance_after_minor)
        .bind(entry.created_at)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            // Reference already credited; nothing moves.
            tx.rollback().await?;
            return Ok(None);
        }

        sqlx::query("UPDATE wallets SET balance_minor = $2, updated_at = NOW() WHERE user_id = $1")
            .bind(user_id)
            .bind(entry.balance_after_minor)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(entry))
    }

    async fn list_wallet_entries(
        &self,
        user_id: i64,
    ) -> Result<Vec<WalletLedgerEntry>, AppError> {
        let entries = sqlx::query_as::<_, WalletLedgerEntry>(
            r#"
            SELECT id, user_id, reference_id, amount_minor, balance_before_minor, balance_after_minor, created_at
            FROM wallet_ledger_entries
            WHERE user_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }
}

fn insert_transaction_query(
    transaction: &Transaction,
    guard_reference: bool,
) -> sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments> {
    let sql = if guard_reference {
        r#"
        INSERT INTO transactions
            (id, order_id, user_id, kind, status, gateway_transaction_id, gateway_order_id,
             merchant_order_id, amount_minor, success, payload, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        ON CONFLICT (kind, gateway_transaction_id) WHERE gateway_transaction_id IS NOT NULL
        DO NOTHING
        "#
    } else {
        r#"
        INSERT INTO transactions
            (id, order_id, user_id, kind, status, gateway_transaction_id, gateway_order_id,
             merchant_order_id, amount_minor, success, payload, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        "#
    };

    sqlx::query(sql)
        .bind(transaction.id)
        .bind(transaction.order_id)
        .bind(transaction.user_id)
        .bind(transaction.kind)
        .bind(transaction.status)
        .bind(&transaction.gateway_transaction_id)
        .bind(&transaction.gateway_order_id)
        .bind(&transaction.merchant_order_id)
        .bind(transaction.amount_minor)
        .bind(transaction.success)
        .bind(&transaction.payload)
        .bind(transaction.created_at)
        .bind(transaction.updated_at)
}
