//! Outbound payment notifications.
//!
//! Fired after a successful reconciliation, never awaited on the webhook
//! response path. Delivery failures are logged and dropped; the ledger is
//! the source of truth, not the notification.

use async_trait::async_trait;
use serde::Serialize;

use crate::config::NotifierConfig;
use crate::models::TransactionKind;

#[derive(Debug, Clone, Serialize)]
pub struct PaymentNotice {
    pub kind: TransactionKind,
    pub order_id: Option<i64>,
    pub user_id: Option<i64>,
    pub amount_minor: i64,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn payment_succeeded(&self, notice: PaymentNotice);
}

/// POSTs the notice to a configured endpoint; logs only when none is set.
pub struct HttpNotifier {
    client: reqwest::Client,
    url: Option<String>,
}

impl HttpNotifier {
    pub fn new(config: &NotifierConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: config.url.clone(),
        }
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn payment_succeeded(&self, notice: PaymentNotice) {
        let Some(url) = &self.url else {
            tracing::info!(
                kind = %notice.kind,
                order_id = ?notice.order_id,
                amount_minor = notice.amount_minor,
                "Payment notification (no endpoint configured)"
            );
            return;
        };

        if let Err(e) = self.client.post(url).json(&notice).send().await {
            tracing::warn!(error = %e, "Failed to deliver payment notification");
        }
    }
}
