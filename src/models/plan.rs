//! Installment plan model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanStatus {
    Ongoing,
    Completed,
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::Ongoing => "ONGOING",
            PlanStatus::Completed => "COMPLETED",
        }
    }
}

/// One plan per order enrolled in recurring billing.
///
/// Invariants: `installments_paid <= installment_count`; COMPLETED exactly
/// when the two are equal, and `next_due_date` is null exactly then.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InstallmentPlan {
    pub order_id: i64,
    pub installment_count: i32,
    pub installments_paid: i32,
    pub installment_amount_minor: i64,
    pub status: PlanStatus,
    pub next_due_date: Option<DateTime<Utc>>,
    /// Set while a scheduler-fired charge is awaiting its webhook; the plan
    /// is not due again until this elapses or the webhook clears it.
    pub charge_in_flight_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InstallmentPlan {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == PlanStatus::Ongoing
            && self.installments_paid < self.installment_count
            && self.next_due_date.is_some_and(|due| due <= now)
            && !self
                .charge_in_flight_until
                .is_some_and(|until| until > now)
    }
}
