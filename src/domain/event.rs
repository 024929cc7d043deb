use super::payment::{Payment, PaymentId, PaymentStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentEventKind {
    Created,
    StatusUpdated,
    Completed,
    Cancelled,
    Refunded,
    Retried,
    FlaggedFraudulent,
    Deleted,
}

/// Notification published after a committed change to a payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub kind: PaymentEventKind,
    pub payment_id: PaymentId,
    pub transaction_id: String,
    pub status: PaymentStatus,
    pub occurred_at: DateTime<Utc>,
}

impl PaymentEvent {
    pub fn new(kind: PaymentEventKind, payment: &Payment, occurred_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            payment_id: payment.id,
            transaction_id: payment.transaction_id.clone(),
            status: payment.status,
            occurred_at,
        }
    }
}
