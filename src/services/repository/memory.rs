//! In-memory ledger store.
//!
//! Same contract as the Postgres store on mutex-guarded maps. Used when no
//! database is configured (local runs) and by the integration tests; not
//! durable.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::LedgerStore;
use crate::error::AppError;
use crate::models::transaction::TransactionResolution;
use crate::models::{
    InstallmentPlan, Order, OrderStatus, PlanStatus, SavedCredential, Transaction,
    TransactionKind, TransactionStatus, Wallet, WalletLedgerEntry,
};

#[derive(Default)]
struct Inner {
    orders: HashMap<i64, Order>,
    transactions: Vec<Transaction>,
    plans: HashMap<i64, InstallmentPlan>,
    credentials: HashMap<String, SavedCredential>,
    wallets: HashMap<i64, Wallet>,
    wallet_entries: Vec<WalletLedgerEntry>,
}

#[derive(Default)]
pub struct MemoryLedgerStore {
    inner: Mutex<Inner>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, AppError> {
        self.inner
            .lock()
            .map_err(|_| AppError::Internal(anyhow::anyhow!("ledger store lock poisoned")))
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn create_order(&self, order: Order) -> Result<(), AppError> {
        self.lock()?.orders.insert(order.id, order);
        Ok(())
    }

    async fn get_order(&self, id: i64) -> Result<Option<Order>, AppError> {
        Ok(self.lock()?.orders.get(&id).cloned())
    }

    async fn update_order_status(
        &self,
        id: i64,
        status: OrderStatus,
        gateway_order_id: Option<&str>,
    ) -> Result<(), AppError> {
        let mut inner = self.lock()?;
        if let Some(order) = inner.orders.get_mut(&id) {
            order.status = status;
            if let Some(gateway_order_id) = gateway_order_id {
                order.gateway_order_id = Some(gateway_order_id.to_string());
            }
            order.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn update_order_due_amount(&self, id: i64, due_minor: i64) -> Result<(), AppError> {
        let mut inner = self.lock()?;
        if let Some(order) = inner.orders.get_mut(&id) {
            order.due_amount_minor = Some(due_minor);
            order.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn create_transaction(&self, transaction: Transaction) -> Result<(), AppError> {
        self.lock()?.transactions.push(transaction);
        Ok(())
    }

    async fn insert_attempt(&self, transaction: Transaction) -> Result<bool, AppError> {
        let mut inner = self.lock()?;
        let duplicate = transaction.gateway_transaction_id.as_ref().is_some_and(|reference| {
            inner.transactions.iter().any(|t| {
                t.kind == transaction.kind
                    && t.gateway_transaction_id.as_deref() == Some(reference.as_str())
            })
        });
        if duplicate {
            return Ok(false);
        }
        inner.transactions.push(transaction);
        Ok(true)
    }

    async fn find_transaction_by_order(
        &self,
        order_id: i64,
        kind: TransactionKind,
    ) -> Result<Option<Transaction>, AppError> {
        let inner = self.lock()?;
        Ok(inner
            .transactions
            .iter()
            .filter(|t| t.order_id == Some(order_id) && t.kind == kind)
            .max_by_key(|t| t.created_at)
            .cloned())
    }

    async fn find_transaction_by_reference(
        &self,
        kind: TransactionKind,
        reference: &str,
    ) -> Result<Option<Transaction>, AppError> {
        let inner = self.lock()?;
        Ok(inner
            .transactions
            .iter()
            .find(|t| t.kind == kind && t.gateway_transaction_id.as_deref() == Some(reference))
            .cloned())
    }

    async fn resolve_transaction(
        &self,
        id: Uuid,
        resolution: TransactionResolution,
    ) -> Result<bool, AppError> {
        let mut inner = self.lock()?;
        let Some(transaction) = inner.transactions.iter_mut().find(|t| t.id == id) else {
            return Ok(false);
        };
        if transaction.status == TransactionStatus::Success {
            return Ok(false);
        }
        transaction.status = resolution.status;
        transaction.success = resolution.success;
        if resolution.gateway_transaction_id.is_some() {
            transaction.gateway_transaction_id = resolution.gateway_transaction_id;
        }
        if resolution.gateway_order_id.is_some() {
            transaction.gateway_order_id = resolution.gateway_order_id;
        }
        if resolution.payload.is_some() {
            transaction.payload = resolution.payload;
        }
        transaction.updated_at = Utc::now();
        Ok(true)
    }

    async fn list_transactions_by_user(
        &self,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Transaction>, i64), AppError> {
        let inner = self.lock()?;
        let mut matching: Vec<Transaction> = inner
            .transactions
            .iter()
            .filter(|t| t.user_id == Some(user_id))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len() as i64;
        let page = matching
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok((page, total))
    }

    async fn create_plan(&self, plan: InstallmentPlan) -> Result<(), AppError> {
        self.lock()?.plans.insert(plan.order_id, plan);
        Ok(())
    }

    async fn get_plan(&self, order_id: i64) -> Result<Option<InstallmentPlan>, AppError> {
        Ok(self.lock()?.plans.get(&order_id).cloned())
    }

    async fn update_plan_progress(
        &self,
        order_id: i64,
        installments_paid: i32,
        status: PlanStatus,
        next_due_date: Option<DateTime<Utc>>,
    ) -> Result<(), AppError> {
        let mut inner = self.lock()?;
        if let Some(plan) = inner.plans.get_mut(&order_id) {
            plan.installments_paid = installments_paid;
            plan.status = status;
            plan.next_due_date = next_due_date;
            plan.charge_in_flight_until = None;
            plan.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn list_due_plans(&self, now: DateTime<Utc>) -> Result<Vec<InstallmentPlan>, AppError> {
        let inner = self.lock()?;
        let mut due: Vec<InstallmentPlan> = inner
            .plans
            .values()
            .filter(|p| p.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|p| p.next_due_date);
        Ok(due)
    }

    async fn mark_charge_in_flight(
        &self,
        order_id: i64,
        until: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut inner = self.lock()?;
        if let Some(plan) = inner.plans.get_mut(&order_id) {
            plan.charge_in_flight_until = Some(until);
            plan.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn clear_charge_in_flight(&self, order_id: i64) -> Result<(), AppError> {
        let mut inner = self.lock()?;
        if let Some(plan) = inner.plans.get_mut(&order_id) {
            plan.charge_in_flight_until = None;
            plan.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn save_credential(&self, credential: SavedCredential) -> Result<(), AppError> {
        let mut inner = self.lock()?;
        inner
            .credentials
            .entry(credential.gateway_order_id.clone())
            .or_insert(credential);
        Ok(())
    }

    async fn get_credential(
        &self,
        gateway_order_id: &str,
    ) -> Result<Option<SavedCredential>, AppError> {
        Ok(self.lock()?.credentials.get(gateway_order_id).cloned())
    }

    async fn get_wallet(&self, user_id: i64) -> Result<Option<Wallet>, AppError> {
        Ok(self.lock()?.wallets.get(&user_id).cloned())
    }

    async fn credit_wallet(
        &self,
        user_id: i64,
        amount_minor: i64,
        reference_id: &str,
    ) -> Result<Option<WalletLedgerEntry>, AppError> {
        let mut inner = self.lock()?;

        if inner
            .wallet_entries
            .iter()
            .any(|e| e.reference_id == reference_id)
        {
            return Ok(None);
        }

        let now = Utc::now();
        let wallet = inner.wallets.entry(user_id).or_insert(Wallet {
            user_id,
            balance_minor: 0,
            updated_at: now,
        });

        let entry = WalletLedgerEntry {
            id: Uuid::new_v4(),
            user_id,
            reference_id: reference_id.to_string(),
            amount_minor,
            balance_before_minor: wallet.balance_minor,
            balance_after_minor: wallet.balance_minor + amount_minor,
            created_at: now,
        };

        wallet.balance_minor = entry.balance_after_minor;
        wallet.updated_at = now;
        inner.wallet_entries.push(entry.clone());
        Ok(Some(entry))
    }

    async fn list_wallet_entries(
        &self,
        user_id: i64,
    ) -> Result<Vec<WalletLedgerEntry>, AppError> {
        let inner = self.lock()?;
        Ok(inner
            .wallet_entries
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(kind: TransactionKind, reference: &str) -> Transaction {
        let mut t = Transaction::pending(kind, Some(1), Some(1), 100, None, None);
        t.gateway_transaction_id = Some(reference.to_string());
        t.status = TransactionStatus::Success;
        t.success = true;
        t
    }

    #[tokio::test]
    async fn insert_attempt_rejects_duplicate_reference() {
        let store = MemoryLedgerStore::new();
        assert!(store
            .insert_attempt(attempt(TransactionKind::Emi, "txn_1"))
            .await
            .unwrap());
        assert!(!store
            .insert_attempt(attempt(TransactionKind::Emi, "txn_1"))
            .await
            .unwrap());
        // Same reference under another kind is a different attempt.
        assert!(store
            .insert_attempt(attempt(TransactionKind::Due, "txn_1"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn credit_wallet_is_reference_guarded() {
        let store = MemoryLedgerStore::new();
        let first = store.credit_wallet(9, 500, "txn_a").await.unwrap().unwrap();
        assert_eq!(first.balance_before_minor, 0);
        assert_eq!(first.balance_after_minor, 500);

        assert!(store.credit_wallet(9, 500, "txn_a").await.unwrap().is_none());
        assert_eq!(store.get_wallet(9).await.unwrap().unwrap().balance_minor, 500);

        let second = store.credit_wallet(9, 250, "txn_b").await.unwrap().unwrap();
        assert_eq!(second.balance_before_minor, 500);
        assert_eq!(second.balance_after_minor, 750);
    }

    #[tokio::test]
    async fn resolve_transaction_is_conditional() {
        let store = MemoryLedgerStore::new();
        let pending = Transaction::pending(TransactionKind::Direct, Some(4), Some(2), 900, None, None);
        let id = pending.id;
        store.create_transaction(pending).await.unwrap();

        let resolution = TransactionResolution {
            status: TransactionStatus::Success,
            success: true,
            gateway_transaction_id: Some("txn_9".to_string()),
            gateway_order_id: None,
            payload: None,
        };
        assert!(store.resolve_transaction(id, resolution.clone()).await.unwrap());
        assert!(!store.resolve_transaction(id, resolution).await.unwrap());
    }
}
