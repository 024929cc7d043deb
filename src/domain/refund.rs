use super::money::Amount;
use super::payment::PaymentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One refund event against a payment. Append-only: written once, in the
/// same store commit as the payment it adjusts, and never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Refund {
    pub id: Uuid,
    pub payment_id: PaymentId,
    pub amount: Amount,
    pub refunded_at: DateTime<Utc>,
    pub refunded_by: String,
    pub reason: Option<String>,
}

impl Refund {
    pub fn new(
        payment_id: PaymentId,
        amount: Amount,
        refunded_by: impl Into<String>,
        reason: Option<String>,
        refunded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            payment_id,
            amount,
            refunded_at,
            refunded_by: refunded_by.into(),
            reason,
        }
    }
}
