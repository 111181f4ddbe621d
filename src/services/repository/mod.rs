//! Ledger store: the persistence contract for orders, the transaction
//! ledger, installment plans, saved credentials and wallets.
//!
//! Two implementations: Postgres for real deployments and an in-memory
//! store used when no database is configured and by the test suite.

mod memory;
mod postgres;

pub use memory::MemoryLedgerStore;
pub use postgres::PgLedgerStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    InstallmentPlan, Order, OrderStatus, PlanStatus, SavedCredential, Transaction,
    TransactionKind, Wallet, WalletLedgerEntry,
};
use crate::models::transaction::TransactionResolution;

#[async_trait]
pub trait LedgerStore: Send + Sync {
    // Orders (created by order-placement code; this service reads and
    // updates status/due-amount/gateway id).
    async fn create_order(&self, order: Order) -> Result<(), AppError>;
    async fn get_order(&self, id: i64) -> Result<Option<Order>, AppError>;
    async fn update_order_status(
        &self,
        id: i64,
        status: OrderStatus,
        gateway_order_id: Option<&str>,
    ) -> Result<(), AppError>;
    async fn update_order_due_amount(&self, id: i64, due_minor: i64) -> Result<(), AppError>;

    // Transaction ledger.
    async fn create_transaction(&self, transaction: Transaction) -> Result<(), AppError>;
    /// Append-kind insert guarded by the unique `(kind,
    /// gateway_transaction_id)` reference. Returns false when a row for the
    /// reference already exists (idempotent replay).
    async fn insert_attempt(&self, transaction: Transaction) -> Result<bool, AppError>;
    /// Most recent row of the given kind for an order.
    async fn find_transaction_by_order(
        &self,
        order_id: i64,
        kind: TransactionKind,
    ) -> Result<Option<Transaction>, AppError>;
    async fn find_transaction_by_reference(
        &self,
        kind: TransactionKind,
        reference: &str,
    ) -> Result<Option<Transaction>, AppError>;
    /// Conditional resolution: applies only while the row is not already
    /// SUCCESS. Returns whether this call applied.
    async fn resolve_transaction(
        &self,
        id: Uuid,
        resolution: TransactionResolution,
    ) -> Result<bool, AppError>;
    /// Newest-first page of a user's transactions plus the total count.
    async fn list_transactions_by_user(
        &self,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Transaction>, i64), AppError>;

    // Installment plans.
    async fn create_plan(&self, plan: InstallmentPlan) -> Result<(), AppError>;
    async fn get_plan(&self, order_id: i64) -> Result<Option<InstallmentPlan>, AppError>;
    /// Advance or close a plan; also clears the in-flight charge marker.
    async fn update_plan_progress(
        &self,
        order_id: i64,
        installments_paid: i32,
        status: PlanStatus,
        next_due_date: Option<DateTime<Utc>>,
    ) -> Result<(), AppError>;
    /// Plans with status ONGOING, unpaid installments remaining, a due date
    /// at or before `now`, and no live in-flight charge marker.
    async fn list_due_plans(&self, now: DateTime<Utc>) -> Result<Vec<InstallmentPlan>, AppError>;
    async fn mark_charge_in_flight(
        &self,
        order_id: i64,
        until: DateTime<Utc>,
    ) -> Result<(), AppError>;
    async fn clear_charge_in_flight(&self, order_id: i64) -> Result<(), AppError>;

    // Saved credentials.
    /// First write wins; a duplicate gateway order id is ignored.
    async fn save_credential(&self, credential: SavedCredential) -> Result<(), AppError>;
    async fn get_credential(
        &self,
        gateway_order_id: &str,
    ) -> Result<Option<SavedCredential>, AppError>;

    // Wallets.
    async fn get_wallet(&self, user_id: i64) -> Result<Option<Wallet>, AppError>;
    /// Reference-guarded credit: moves the balance and appends a ledger
    /// entry atomically. Returns None when the reference was already
    /// applied, so a duplicate notification can never double-credit.
    async fn credit_wallet(
        &self,
        user_id: i64,
        amount_minor: i64,
        reference_id: &str,
    ) -> Result<Option<WalletLedgerEntry>, AppError>;
    async fn list_wallet_entries(
        &self,
        user_id: i64,
    ) -> Result<Vec<WalletLedgerEntry>, AppError>;
}
