//! Saved payment credential.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Tokenized card reference pushed by the gateway after a charge that
/// force-saved the card. Looked up by gateway order id when the scheduler
/// auto-charges; immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SavedCredential {
    pub gateway_order_id: String,
    pub token: String,
    /// Raw save-event payload, kept for audit.
    pub payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}
