//! Transaction ledger model: one row per charge attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// What kind of charge a ledger row records.
///
/// DIRECT, ADVANCE and PAYMENT_LINK keep a single authoritative row per
/// order, resolved in place. DUE, EMI (recurring) and WALLET_RECHARGE append
/// a fresh row per attempt, keyed by the gateway transaction id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    Direct,
    Advance,
    Due,
    Emi,
    PaymentLink,
    WalletRecharge,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Direct => "DIRECT",
            TransactionKind::Advance => "ADVANCE",
            TransactionKind::Due => "DUE",
            TransactionKind::Emi => "EMI",
            TransactionKind::PaymentLink => "PAYMENT_LINK",
            TransactionKind::WalletRecharge => "WALLET_RECHARGE",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "DIRECT" => Some(TransactionKind::Direct),
            "ADVANCE" => Some(TransactionKind::Advance),
            "DUE" => Some(TransactionKind::Due),
            "EMI" => Some(TransactionKind::Emi),
            "PAYMENT_LINK" => Some(TransactionKind::PaymentLink),
            "WALLET_RECHARGE" => Some(TransactionKind::WalletRecharge),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Success => "SUCCESS",
            TransactionStatus::Failed => "FAILED",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Transaction {
    pub id: Uuid,
    /// Null for non-order flows such as wallet top-up.
    pub order_id: Option<i64>,
    pub user_id: Option<i64>,
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub gateway_transaction_id: Option<String>,
    pub gateway_order_id: Option<String>,
    pub merchant_order_id: Option<String>,
    pub amount_minor: i64,
    pub success: bool,
    /// Raw gateway notification, kept for audit and replay.
    pub payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// A pending attempt recorded at intention time, resolved later by the
    /// webhook reconciler.
    pub fn pending(
        kind: TransactionKind,
        order_id: Option<i64>,
        user_id: Option<i64>,
        amount_minor: i64,
        gateway_order_id: Option<String>,
        merchant_order_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            order_id,
            user_id,
            kind,
            status: TransactionStatus::Pending,
            gateway_transaction_id: None,
            gateway_order_id,
            merchant_order_id,
            amount_minor,
            success: false,
            payload: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Terminal outcome applied to a ledger row when a notification resolves it.
#[derive(Debug, Clone)]
pub struct TransactionResolution {
    pub status: TransactionStatus,
    pub success: bool,
    pub gateway_transaction_id: Option<String>,
    pub gateway_order_id: Option<String>,
    pub payload: Option<serde_json::Value>,
}
