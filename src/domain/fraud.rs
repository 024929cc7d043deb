use super::payment::PaymentId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A fraud determination recorded against a payment. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FraudFlag {
    pub id: Uuid,
    pub payment_id: PaymentId,
    pub reason: String,
    pub risk_score: Decimal,
    pub flagged_by: String,
    pub flagged_at: DateTime<Utc>,
}

impl FraudFlag {
    pub fn new(
        payment_id: PaymentId,
        reason: impl Into<String>,
        risk_score: Decimal,
        flagged_by: impl Into<String>,
        flagged_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            payment_id,
            reason: reason.into(),
            risk_score,
            flagged_by: flagged_by.into(),
            flagged_at,
        }
    }
}
