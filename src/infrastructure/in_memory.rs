use crate::domain::fraud::FraudFlag;
use crate::domain::payment::{Payment, PaymentId, PaymentStatus};
use crate::domain::ports::{Attachment, PaymentStore, StatusCache};
use crate::domain::refund::Refund;
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    next_id: u64,
    payments: BTreeMap<PaymentId, Payment>,
    transaction_index: HashMap<String, PaymentId>,
    metadata: HashMap<PaymentId, HashMap<String, String>>,
    refunds: HashMap<PaymentId, Vec<Refund>>,
    fraud_flags: HashMap<PaymentId, Vec<FraudFlag>>,
}

impl Tables {
    fn check_version(&self, payment: &Payment) -> Result<()> {
        match self.payments.get(&payment.id) {
            None => Err(PaymentError::NotFound(format!(
                "Payment not found with ID: {}",
                payment.id
            ))),
            Some(stored) if stored.version != payment.version => {
                Err(PaymentError::ConcurrentModification(payment.id))
            }
            Some(_) => Ok(()),
        }
    }

    fn select(&self, predicate: impl Fn(&Payment) -> bool) -> Vec<Payment> {
        self.payments
            .values()
            .filter(|&p| predicate(p))
            .cloned()
            .collect()
    }
}

/// A thread-safe in-memory payment store.
///
/// All tables sit behind one `RwLock`, so each write (payment row plus its
/// attachment) is applied atomically with respect to every other call.
/// Cloning shares the underlying tables.
#[derive(Default, Clone)]
pub struct InMemoryPaymentStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryPaymentStore {
    /// Creates a new, empty in-memory payment store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn insert(&self, mut payment: Payment) -> Result<Payment> {
        let mut tables = self.tables.write().await;
        if tables.transaction_index.contains_key(&payment.transaction_id) {
            return Err(PaymentError::internal(format!(
                "Duplicate transaction id: {}",
                payment.transaction_id
            )));
        }

        tables.next_id += 1;
        payment.id = PaymentId(tables.next_id);
        payment.version = 1;

        let metadata = std::mem::take(&mut payment.metadata);
        tables
            .transaction_index
            .insert(payment.transaction_id.clone(), payment.id);
        tables.payments.insert(payment.id, payment.clone());
        if !metadata.is_empty() {
            tables.metadata.insert(payment.id, metadata.clone());
        }

        payment.metadata = metadata;
        Ok(payment)
    }

    async fn save(&self, mut payment: Payment, attachment: Option<Attachment>) -> Result<Payment> {
        let mut tables = self.tables.write().await;
        tables.check_version(&payment)?;

        payment.version += 1;
        let mut row = payment.clone();
        row.metadata.clear();
        tables.payments.insert(payment.id, row);

        match attachment {
            Some(Attachment::Refund(refund)) => {
                tables.refunds.entry(payment.id).or_default().push(refund)
            }
            Some(Attachment::FraudFlag(flag)) => {
                tables.fraud_flags.entry(payment.id).or_default().push(flag)
            }
            None => {}
        }
        Ok(payment)
    }

    async fn delete(&self, payment: &Payment) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.check_version(payment)?;

        tables.payments.remove(&payment.id);
        tables.transaction_index.remove(&payment.transaction_id);
        tables.metadata.remove(&payment.id);
        Ok(())
    }

    async fn find_by_id(&self, id: PaymentId) -> Result<Option<Payment>> {
        let tables = self.tables.read().await;
        Ok(tables.payments.get(&id).cloned())
    }

    async fn find_by_transaction_id(&self, transaction_id: &str) -> Result<Option<Payment>> {
        let tables = self.tables.read().await;
        Ok(tables
            .transaction_index
            .get(transaction_id)
            .and_then(|id| tables.payments.get(id))
            .cloned())
    }

    async fn find_by_status(&self, status: PaymentStatus) -> Result<Vec<Payment>> {
        Ok(self.tables.read().await.select(|p| p.status == status))
    }

    async fn find_by_payer(&self, payer_id: &str) -> Result<Vec<Payment>> {
        Ok(self.tables.read().await.select(|p| p.payer_id == payer_id))
    }

    async fn find_by_payee(&self, payee_id: &str) -> Result<Vec<Payment>> {
        Ok(self.tables.read().await.select(|p| p.payee_id == payee_id))
    }

    async fn find_fraudulent(&self) -> Result<Vec<Payment>> {
        Ok(self.tables.read().await.select(|p| p.is_fraudulent))
    }

    async fn find_refundable(&self) -> Result<Vec<Payment>> {
        Ok(self.tables.read().await.select(Payment::is_refundable))
    }

    async fn find_all(&self) -> Result<Vec<Payment>> {
        Ok(self.tables.read().await.select(|_| true))
    }

    async fn metadata_for(&self, id: PaymentId) -> Result<HashMap<String, String>> {
        let tables = self.tables.read().await;
        Ok(tables.metadata.get(&id).cloned().unwrap_or_default())
    }

    async fn refunds_for(&self, id: PaymentId) -> Result<Vec<Refund>> {
        let tables = self.tables.read().await;
        Ok(tables.refunds.get(&id).cloned().unwrap_or_default())
    }

    async fn fraud_flags_for(&self, id: PaymentId) -> Result<Vec<FraudFlag>> {
        let tables = self.tables.read().await;
        Ok(tables.fraud_flags.get(&id).cloned().unwrap_or_default())
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn new(value: &str, ttl: Option<Duration>) -> Self {
        Self {
            value: value.to_string(),
            expires_at: ttl.map(|d| Instant::now() + d),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Process-local status cache with optional per-entry expiry.
///
/// Expired entries read as misses and are evicted lazily.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStatusCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl InMemoryStatusCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatusCache for InMemoryStatusCache {
    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), CacheEntry::new(value, None));
        Ok(())
    }

    async fn set_with_expiration(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), CacheEntry::new(value, Some(ttl)));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired() => return Ok(Some(entry.value.clone())),
                Some(_) => {}
            }
        }
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(CacheEntry::is_expired) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.remove(key);
        Ok(())
    }
}
