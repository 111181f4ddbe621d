//! Wallet balance and its append-only ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Wallet {
    pub user_id: i64,
    pub balance_minor: i64,
    pub updated_at: DateTime<Utc>,
}

/// Immutable entry recording a single balance movement.
///
/// Invariant: `balance_after_minor = balance_before_minor + amount_minor`,
/// and at most one entry exists per `reference_id`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WalletLedgerEntry {
    pub id: Uuid,
    pub user_id: i64,
    pub reference_id: String,
    pub amount_minor: i64,
    pub balance_before_minor: i64,
    pub balance_after_minor: i64,
    pub created_at: DateTime<Utc>,
}
