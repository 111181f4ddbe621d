//! Webhook reconciler.
//!
//! Turns verified gateway notifications into authoritative ledger, order,
//! plan and wallet state. Webhooks arrive duplicated, delayed and
//! concurrently; every branch rides a conditional ledger write so a replay
//! is a no-op and a partial failure is safely retried by the gateway's
//! redelivery.

use chrono::{Duration, Utc};
use serde_json::Value;
use std::sync::Arc;

use crate::error::AppError;
use crate::models::transaction::TransactionResolution;
use crate::models::{
    OrderStatus, PlanStatus, SavedCredential, Transaction, TransactionKind, TransactionStatus,
};
use crate::services::notifier::{Notifier, PaymentNotice};
use crate::services::paymob::GatewayNotification;
use crate::services::repository::LedgerStore;

/// Days until the next installment after a successful charge.
const NEXT_INSTALLMENT_DAYS: i64 = 30;
/// Days until the retry after a failed installment charge.
const RETRY_DAYS: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Ledger and side effects newly applied.
    Applied,
    /// Duplicate delivery; nothing changed.
    Replayed,
    /// Not a completed transaction (e.g. still pending); nothing changed.
    Ignored,
}

impl ReconcileOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::Applied => "applied",
            ReconcileOutcome::Replayed => "replayed",
            ReconcileOutcome::Ignored => "ignored",
        }
    }
}

pub struct Reconciler {
    store: Arc<dyn LedgerStore>,
    notifier: Arc<dyn Notifier>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn LedgerStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    /// Apply a transaction notification. Errors bubble up so the webhook
    /// handler can answer non-2xx and the gateway redelivers.
    pub async fn apply(
        &self,
        notification: GatewayNotification,
    ) -> Result<ReconcileOutcome, AppError> {
        if notification.pending {
            tracing::info!(
                gateway_transaction_id = %notification.gateway_transaction_id,
                "Ignoring pending (not completed) transaction callback"
            );
            return Ok(ReconcileOutcome::Ignored);
        }

        tracing::info!(
            kind = %notification.kind,
            success = notification.success,
            gateway_transaction_id = %notification.gateway_transaction_id,
            order_id = ?notification.order_id,
            "Reconciling transaction callback"
        );

        let outcome = match notification.kind {
            TransactionKind::Direct | TransactionKind::PaymentLink => {
                self.apply_order_charge(&notification, true).await?
            }
            TransactionKind::Advance => self.apply_order_charge(&notification, false).await?,
            TransactionKind::Due => self.apply_due(&notification).await?,
            TransactionKind::Emi => self.apply_emi(&notification).await?,
            TransactionKind::WalletRecharge => self.apply_wallet_recharge(&notification).await?,
        };

        metrics::counter!(
            "payflow_webhooks_reconciled_total",
            "kind" => notification.kind.as_str(),
            "outcome" => outcome.as_str()
        )
        .increment(1);

        Ok(outcome)
    }

    /// Persist a card token pushed by the gateway after a tokenizing charge.
    pub async fn save_card_token(&self, obj: &Value) -> Result<(), AppError> {
        let gateway_order_id = obj
            .get("order_id")
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .ok_or_else(|| {
                AppError::BadRequest(anyhow::anyhow!("Token callback missing order_id"))
            })?;
        let token = obj
            .get("token")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Token callback missing token")))?;

        self.store
            .save_credential(SavedCredential {
                gateway_order_id: gateway_order_id.clone(),
                token: token.to_string(),
                payload: Some(obj.clone()),
                created_at: Utc::now(),
            })
            .await?;

        tracing::info!(gateway_order_id = %gateway_order_id, "Saved card credential");
        Ok(())
    }

    /// DIRECT / PAYMENT_LINK / ADVANCE: resolve the order's authoritative
    /// row in place. An advance is a partial payment, so the order status is
    /// deliberately left alone.
    async fn apply_order_charge(
        &self,
        n: &GatewayNotification,
        mark_paid: bool,
    ) -> Result<ReconcileOutcome, AppError> {
        let order_id = require_order_id(n)?;

        let row = self
            .store
            .find_transaction_by_order(order_id, n.kind)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!(
                    "No {} ledger row for order {}",
                    n.kind,
                    order_id
                ))
            })?;

        let applied = self
            .store
            .resolve_transaction(row.id, resolution_from(n))
            .await?;
        if !applied {
            tracing::info!(order_id, kind = %n.kind, "Replayed charge callback, ledger untouched");
            return Ok(ReconcileOutcome::Replayed);
        }

        if n.success {
            if mark_paid {
                self.store
                    .update_order_status(order_id, OrderStatus::Paid, None)
                    .await?;
            }
            self.notify_success(n);
        }

        Ok(ReconcileOutcome::Applied)
    }

    /// DUE: the charge was never ledgered up front, so every callback
    /// appends its own row; success clears the order's due amount.
    async fn apply_due(&self, n: &GatewayNotification) -> Result<ReconcileOutcome, AppError> {
        let order_id = require_order_id(n)?;

        if !self.store.insert_attempt(attempt_from(n)).await? {
            tracing::info!(order_id, "Replayed due-settlement callback, ledger untouched");
            return Ok(ReconcileOutcome::Replayed);
        }

        if n.success {
            self.store.update_order_due_amount(order_id, 0).await?;
            self.store
                .update_order_status(order_id, OrderStatus::Paid, None)
                .await?;
            self.notify_success(n);
        }

        Ok(ReconcileOutcome::Applied)
    }

    /// EMI: the first installment resolves the pending row recorded at
    /// intention time and pins the gateway order id on the order for later
    /// credential lookup; every later installment appends a row and moves
    /// the plan.
    async fn apply_emi(&self, n: &GatewayNotification) -> Result<ReconcileOutcome, AppError> {
        let order_id = require_order_id(n)?;

        let pending_first = self
            .store
            .find_transaction_by_order(order_id, TransactionKind::Emi)
            .await?
            .filter(|t| t.status == TransactionStatus::Pending);

        if let Some(row) = pending_first {
            let applied = self
                .store
                .resolve_transaction(row.id, resolution_from(n))
                .await?;
            if !applied {
                return Ok(ReconcileOutcome::Replayed);
            }

            if n.success {
                // More installments remain, so the order stays PENDING; the
                // gateway order id is what the scheduler will later use to
                // find the saved card.
                self.store
                    .update_order_status(
                        order_id,
                        OrderStatus::Pending,
                        n.gateway_order_id.as_deref(),
                    )
                    .await?;
                self.notify_success(n);
            }
            return Ok(ReconcileOutcome::Applied);
        }

        if !self.store.insert_attempt(attempt_from(n)).await? {
            tracing::info!(order_id, "Replayed installment callback, ledger untouched");
            return Ok(ReconcileOutcome::Replayed);
        }

        let plan = self.store.get_plan(order_id).await?.ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!(
                "Installment callback for order {} without a plan",
                order_id
            ))
        })?;

        let now = Utc::now();
        if n.success {
            let paid = plan.installments_paid + 1;
            if paid >= plan.installment_count {
                self.store
                    .update_plan_progress(order_id, paid, PlanStatus::Completed, None)
                    .await?;
                self.store
                    .update_order_status(order_id, OrderStatus::Paid, None)
                    .await?;
                tracing::info!(order_id, installments = paid, "Installment plan completed");
            } else {
                self.store
                    .update_plan_progress(
                        order_id,
                        paid,
                        PlanStatus::Ongoing,
                        Some(now + Duration::days(NEXT_INSTALLMENT_DAYS)),
                    )
                    .await?;
                tracing::info!(
                    order_id,
                    installments_paid = paid,
                    installment_count = plan.installment_count,
                    "Installment recorded"
                );
            }
            self.notify_success(n);
        } else {
            // Charge declined: the count stays put and the plan retries
            // tomorrow.
            self.store
                .update_plan_progress(
                    order_id,
                    plan.installments_paid,
                    PlanStatus::Ongoing,
                    Some(now + Duration::days(RETRY_DAYS)),
                )
                .await?;
            tracing::warn!(order_id, "Installment charge failed, retrying next day");
        }

        Ok(ReconcileOutcome::Applied)
    }

    /// WALLET_RECHARGE: append a row and credit the wallet, both guarded by
    /// the gateway transaction reference.
    async fn apply_wallet_recharge(
        &self,
        n: &GatewayNotification,
    ) -> Result<ReconcileOutcome, AppError> {
        let user_id = n.user_id.ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!("Wallet recharge callback missing user id"))
        })?;

        if !self.store.insert_attempt(attempt_from(n)).await? {
            tracing::info!(user_id, "Replayed wallet recharge callback, ledger untouched");
            return Ok(ReconcileOutcome::Replayed);
        }

        if n.success {
            match self
                .store
                .credit_wallet(user_id, n.amount_minor, &n.gateway_transaction_id)
                .await?
            {
                Some(entry) => {
                    tracing::info!(
                        user_id,
                        amount_minor = n.amount_minor,
                        balance_minor = entry.balance_after_minor,
                        "Wallet credited"
                    );
                }
                None => {
                    tracing::info!(user_id, "Wallet credit already applied for reference");
                }
            }
            self.notify_success(n);
        }

        Ok(ReconcileOutcome::Applied)
    }

    fn notify_success(&self, n: &GatewayNotification) {
        let notifier = self.notifier.clone();
        let notice = PaymentNotice {
            kind: n.kind,
            order_id: n.order_id,
            user_id: n.user_id,
            amount_minor: n.amount_minor,
        };
        tokio::spawn(async move {
            notifier.payment_succeeded(notice).await;
        });
    }
}

fn require_order_id(n: &GatewayNotification) -> Result<i64, AppError> {
    n.order_id.ok_or_else(|| {
        AppError::BadRequest(anyhow::anyhow!(
            "{} callback carries no order reference",
            n.kind
        ))
    })
}

fn resolution_from(n: &GatewayNotification) -> TransactionResolution {
    TransactionResolution {
        status: status_from(n.success),
        success: n.success,
        gateway_transaction_id: Some(n.gateway_transaction_id.clone()),
        gateway_order_id: n.gateway_order_id.clone(),
        payload: Some(n.raw.clone()),
    }
}

/// A fully-resolved ledger row for an append-kind callback.
fn attempt_from(n: &GatewayNotification) -> Transaction {
    let now = Utc::now();
    Transaction {
        id: uuid::Uuid::new_v4(),
        order_id: n.order_id,
        user_id: n.user_id,
        kind: n.kind,
        status: status_from(n.success),
        gateway_transaction_id: Some(n.gateway_transaction_id.clone()),
        gateway_order_id: n.gateway_order_id.clone(),
        merchant_order_id: n.merchant_order_id.clone(),
        amount_minor: n.amount_minor,
        success: n.success,
        payload: Some(n.raw.clone()),
        created_at: now,
        updated_at: now,
    }
}

fn status_from(success: bool) -> TransactionStatus {
    if success {
        TransactionStatus::Success
    } else {
        TransactionStatus::Failed
    }
}
