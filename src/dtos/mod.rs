use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::{Transaction, TransactionKind, TransactionStatus};
use crate::services::paymob::BillingData;

#[derive(Debug, Deserialize, Validate)]
pub struct BillingInfo {
    #[validate(length(min = 1))]
    pub first_name: String,
    #[validate(length(min = 1))]
    pub last_name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub phone_number: String,
    pub street: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
}

impl From<BillingInfo> for BillingData {
    fn from(info: BillingInfo) -> Self {
        BillingData {
            first_name: info.first_name,
            last_name: info.last_name,
            email: info.email,
            phone_number: info.phone_number,
            street: info.street,
            city: info.city,
            country: info.country,
        }
    }
}

/// Request to create a payment intention. The EMI endpoint takes the same
/// shape and forces the payment type.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateIntentionRequest {
    /// Amount in the smallest currency unit.
    #[validate(range(min = 1))]
    pub amount_minor: i64,
    pub payment_type: Option<TransactionKind>,
    pub order_id: Option<i64>,
    pub user_id: Option<i64>,
    pub merchant_order_id: Option<String>,
    pub description: Option<String>,
    #[validate(nested)]
    pub billing: BillingInfo,
}

#[derive(Debug, Serialize)]
pub struct CreateIntentionResponse {
    /// Internal ledger row recorded for this attempt, when one is created
    /// up front.
    pub transaction_id: Option<Uuid>,
    pub intention_id: String,
    /// Client secret for the gateway's hosted checkout.
    pub client_secret: String,
    /// Short-lived token to complete the charge.
    pub payment_token: String,
    pub public_key: String,
    pub amount_minor: i64,
    pub currency: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    pub id: Uuid,
    pub order_id: Option<i64>,
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub gateway_transaction_id: Option<String>,
    pub amount_minor: i64,
    pub success: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Transaction> for TransactionResponse {
    fn from(t: Transaction) -> Self {
        Self {
            id: t.id,
            order_id: t.order_id,
            kind: t.kind,
            status: t.status,
            gateway_transaction_id: t.gateway_transaction_id,
            amount_minor: t.amount_minor,
            success: t.success,
            created_at: t.created_at.to_rfc3339(),
            updated_at: t.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TransactionListResponse {
    pub transactions: Vec<TransactionResponse>,
    pub total_count: i64,
    pub limit: i64,
    pub offset: i64,
}
