//! Installment scheduler.
//!
//! A periodic sweep over active installment plans: every tick selects the
//! plans that are due, looks up the saved card for each and fires an
//! unattended charge through the gateway. The sweep only triggers charges;
//! plan state moves when the resulting webhook is reconciled.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;
use crate::error::AppError;
use crate::models::{InstallmentPlan, TransactionKind};
use crate::services::paymob::{BillingData, ChargeMode, IntentionRequest, PaymentGateway};
use crate::services::repository::LedgerStore;

pub struct InstallmentScheduler {
    store: Arc<dyn LedgerStore>,
    gateway: Arc<dyn PaymentGateway>,
    config: SchedulerConfig,
    currency: String,
    shutdown_token: CancellationToken,
}

impl InstallmentScheduler {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        gateway: Arc<dyn PaymentGateway>,
        config: SchedulerConfig,
        currency: String,
    ) -> Self {
        Self {
            store,
            gateway,
            config,
            currency,
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Run the sweep loop until cancelled.
    pub async fn run(self) {
        if !self.config.enabled {
            tracing::info!("Installment scheduler disabled by configuration");
            return;
        }

        tracing::info!(
            interval_secs = self.config.interval_secs,
            "Starting installment scheduler"
        );

        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(self.config.interval_secs));

        loop {
            tokio::select! {
                _ = self.shutdown_token.cancelled() => {
                    tracing::info!("Installment scheduler shutting down");
                    break;
                }
                _ = interval.tick() => {
                    self.sweep().await;
                }
            }
        }
    }

    /// One pass over the due plans. Returns how many charges were fired;
    /// a bad plan never aborts the rest of the sweep.
    pub async fn sweep(&self) -> usize {
        let now = Utc::now();
        let due = match self.store.list_due_plans(now).await {
            Ok(due) => due,
            Err(e) => {
                tracing::error!(error = %e, "Failed to query due installment plans");
                return 0;
            }
        };

        if due.is_empty() {
            return 0;
        }
        tracing::info!(due_count = due.len(), "Sweeping due installment plans");

        let mut fired = 0;
        for plan in due {
            let order_id = plan.order_id;
            match self.charge_due_plan(plan).await {
                Ok(()) => {
                    fired += 1;
                    metrics::counter!("payflow_scheduler_charges_total", "result" => "fired")
                        .increment(1);
                }
                Err(e) => {
                    metrics::counter!("payflow_scheduler_charges_total", "result" => "skipped")
                        .increment(1);
                    tracing::warn!(order_id, error = %e, "Skipping installment plan this tick");
                }
            }
        }
        fired
    }

    async fn charge_due_plan(&self, plan: InstallmentPlan) -> Result<(), AppError> {
        let order = self
            .store
            .get_order(plan.order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Order not found")))?;
        let gateway_order_id = order.gateway_order_id.ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("Order has no gateway order id yet"))
        })?;
        let credential = self
            .store
            .get_credential(&gateway_order_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!(
                    "No saved credential for gateway order {}",
                    gateway_order_id
                ))
            })?;

        // Claim the plan before firing so an overlapping tick cannot charge
        // it again while the webhook is still in flight.
        let until = Utc::now() + Duration::seconds(self.config.charge_ttl_secs);
        self.store.mark_charge_in_flight(plan.order_id, until).await?;

        tracing::info!(
            order_id = plan.order_id,
            installment = plan.installments_paid + 1,
            installment_count = plan.installment_count,
            amount_minor = plan.installment_amount_minor,
            "Firing unattended installment charge"
        );

        let charge = async {
            let intention = self
                .gateway
                .create_intention(IntentionRequest {
                    amount_minor: plan.installment_amount_minor,
                    currency: self.currency.clone(),
                    billing: unattended_billing(),
                    order_id: Some(plan.order_id),
                    payment_type: TransactionKind::Emi,
                    user_id: Some(order.user_id),
                    merchant_order_id: None,
                    item_description: Some(format!(
                        "Installment {} of {}",
                        plan.installments_paid + 1,
                        plan.installment_count
                    )),
                    mode: ChargeMode::Unattended,
                    save_card: false,
                })
                .await?;

            self.gateway
                .charge_with_token(&credential.token, &intention.payment_token)
                .await
        };

        match charge.await {
            Ok(result) => {
                // The webhook for this attempt advances or retries the plan;
                // nothing to do here.
                tracing::info!(
                    order_id = plan.order_id,
                    gateway_transaction_id = %result.gateway_transaction_id,
                    pending = result.pending,
                    "Installment charge submitted"
                );
                Ok(())
            }
            Err(e) => {
                // No webhook will arrive for a charge that never reached the
                // gateway; release the claim so the next tick retries.
                self.store.clear_charge_in_flight(plan.order_id).await?;
                tracing::error!(
                    order_id = plan.order_id,
                    error = %e,
                    "Installment charge failed to submit, plan remains due"
                );
                Err(e)
            }
        }
    }
}

/// Billing stub for card-not-present charges; the gateway requires the
/// fields but the payer is absent.
fn unattended_billing() -> BillingData {
    BillingData {
        first_name: "NA".to_string(),
        last_name: "NA".to_string(),
        email: "na@example.com".to_string(),
        phone_number: "NA".to_string(),
        street: None,
        city: None,
        country: None,
    }
}
