use super::fraud::FraudFlag;
use super::payment::{Payment, PaymentId, PaymentStatus};
use super::refund::Refund;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// The record appended together with a payment write, in the same commit.
#[derive(Debug, Clone, PartialEq)]
pub enum Attachment {
    Refund(Refund),
    FraudFlag(FraudFlag),
}

/// Durable source of truth for payments and their append-only history.
///
/// Lookups return `Ok(None)` for a missing row; `Err` is reserved for
/// infrastructure failures. Writes are compare-and-swap on
/// [`Payment::version`]: a stale version yields
/// [`PaymentError::ConcurrentModification`](crate::error::PaymentError::ConcurrentModification).
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Assigns a fresh id, persists the payment and its metadata, and returns
    /// the stored record. Rejects a transaction id that is already taken.
    async fn insert(&self, payment: Payment) -> Result<Payment>;

    /// Persists `payment` (and `attachment`, if any) atomically, provided the
    /// stored version still equals `payment.version`. Returns the record with
    /// its bumped version.
    async fn save(&self, payment: Payment, attachment: Option<Attachment>) -> Result<Payment>;

    /// Removes the payment and its metadata, with the same version check as
    /// [`save`](Self::save). Refund and fraud flag history is append-only and
    /// stays readable under the old id.
    async fn delete(&self, payment: &Payment) -> Result<()>;

    async fn find_by_id(&self, id: PaymentId) -> Result<Option<Payment>>;
    async fn find_by_transaction_id(&self, transaction_id: &str) -> Result<Option<Payment>>;
    async fn find_by_status(&self, status: PaymentStatus) -> Result<Vec<Payment>>;
    async fn find_by_payer(&self, payer_id: &str) -> Result<Vec<Payment>>;
    async fn find_by_payee(&self, payee_id: &str) -> Result<Vec<Payment>>;
    async fn find_fraudulent(&self) -> Result<Vec<Payment>>;
    /// Payments in `COMPLETED` with `refunded_amount < amount`.
    async fn find_refundable(&self) -> Result<Vec<Payment>>;
    async fn find_all(&self) -> Result<Vec<Payment>>;

    async fn metadata_for(&self, id: PaymentId) -> Result<HashMap<String, String>>;
    async fn refunds_for(&self, id: PaymentId) -> Result<Vec<Refund>>;
    async fn fraud_flags_for(&self, id: PaymentId) -> Result<Vec<FraudFlag>>;
}

/// Key/value cache of last-known payment statuses. Never authoritative.
#[async_trait]
pub trait StatusCache: Send + Sync {
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn set_with_expiration(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn delete(&self, key: &str) -> Result<()>;

    /// `set` for `Some`, `delete` for `None`.
    async fn put(&self, key: &str, value: Option<&str>) -> Result<()> {
        match value {
            Some(value) => self.set(key, value).await,
            None => self.delete(key).await,
        }
    }
}

/// Best-effort, fire-and-forget publication of payment events. Failures
/// are the implementation's to log; nothing is reported back.
pub trait EventNotifier: Send + Sync {
    fn publish(&self, topic: &str, message: String);
}

/// Cache key under which a payment's status is mirrored.
pub fn status_key(id: PaymentId) -> String {
    format!("payment-status-{id}")
}

pub type PaymentStoreBox = Box<dyn PaymentStore>;
pub type StatusCacheBox = Box<dyn StatusCache>;
pub type EventNotifierRef = Arc<dyn EventNotifier>;
