//! Payment state machine.
//!
//! Each transition validates against the current state and mutates the
//! record in place; nothing here touches a store or cache. A failed check
//! leaves the payment unchanged.

use super::money::{Amount, Balance};
use super::payment::{Payment, PaymentStatus};
use crate::error::{PaymentError, Result};
use chrono::{DateTime, Utc};

/// Upper bound on business retries of a failed payment.
pub const MAX_RETRY_ATTEMPTS: u32 = 3;

impl Payment {
    /// `amount - refunded_amount`, the most a single refund may return.
    pub fn refundable_balance(&self) -> Balance {
        self.amount - self.refunded_amount
    }

    pub fn is_refundable(&self) -> bool {
        self.status == PaymentStatus::Completed && self.refunded_amount < Balance::from(self.amount)
    }

    pub fn is_fully_refunded(&self) -> bool {
        self.refunded_amount == Balance::from(self.amount)
    }

    /// Administrative override: any recognised status from any status.
    pub fn set_status(&mut self, status: PaymentStatus, now: DateTime<Utc>) {
        self.status = status;
        if status == PaymentStatus::Completed && self.payment_date.is_none() {
            self.payment_date = Some(now);
        }
        self.updated_at = now;
    }

    /// Settles a pending payment, recording the gateway that processed it.
    pub fn complete(&mut self, gateway_id: Option<String>, now: DateTime<Utc>) -> Result<()> {
        if self.status != PaymentStatus::Pending {
            return Err(PaymentError::InvalidState(format!(
                "Only pending payments can be completed (payment {} is {})",
                self.id, self.status
            )));
        }
        if gateway_id.is_some() {
            self.payment_gateway_id = gateway_id;
        }
        self.set_status(PaymentStatus::Completed, now);
        Ok(())
    }

    pub fn cancel(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> Result<()> {
        if !matches!(self.status, PaymentStatus::Pending | PaymentStatus::Failed) {
            return Err(PaymentError::InvalidState(format!(
                "Only pending or failed payments can be cancelled (payment {} is {})",
                self.id, self.status
            )));
        }
        self.cancellation_reason = Some(reason.into());
        self.status = PaymentStatus::Cancelled;
        self.updated_at = now;
        Ok(())
    }

    /// Books a refund against a completed payment.
    ///
    /// A refund that exhausts the balance moves the payment to `REFUNDED`.
    pub fn apply_refund(&mut self, amount: Amount, now: DateTime<Utc>) -> Result<()> {
        if self.status != PaymentStatus::Completed {
            return Err(PaymentError::InvalidState(format!(
                "Only completed payments can be refunded (payment {} is {})",
                self.id, self.status
            )));
        }
        let remaining = self.refundable_balance();
        if Balance::from(amount) > remaining {
            return Err(PaymentError::InvalidState(format!(
                "Refund of {amount} exceeds the refundable balance of {remaining}"
            )));
        }

        self.refunded_amount += Balance::from(amount);
        if self.is_fully_refunded() {
            self.status = PaymentStatus::Refunded;
        }
        self.updated_at = now;
        Ok(())
    }

    /// Moves a failed payment back to `PENDING`, consuming one of the
    /// [`MAX_RETRY_ATTEMPTS`] attempts.
    pub fn apply_retry(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status != PaymentStatus::Failed {
            return Err(PaymentError::InvalidState(format!(
                "Only failed payments can be retried (payment {} is {})",
                self.id, self.status
            )));
        }
        if self.retry_count >= MAX_RETRY_ATTEMPTS {
            return Err(PaymentError::InvalidState(format!(
                "Maximum retry attempts ({MAX_RETRY_ATTEMPTS}) exceeded for payment {}",
                self.id
            )));
        }
        self.retry_count += 1;
        self.status = PaymentStatus::Pending;
        self.updated_at = now;
        Ok(())
    }

    /// Allowed from any state; refund accounting is left as is.
    pub fn flag_fraudulent(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        self.status = PaymentStatus::Fraudulent;
        self.is_fraudulent = true;
        self.fraud_reason = Some(reason.into());
        self.updated_at = now;
    }

    pub fn ensure_deletable(&self) -> Result<()> {
        if self.status == PaymentStatus::Completed {
            return Err(PaymentError::InvalidState(format!(
                "Completed payment {} cannot be deleted",
                self.id
            )));
        }
        Ok(())
    }
}
