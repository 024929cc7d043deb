use crate::config::EngineConfig;
use crate::domain::event::{PaymentEvent, PaymentEventKind};
use crate::domain::fraud::FraudFlag;
use crate::domain::money::Amount;
use crate::domain::payment::{NewPayment, Payment, PaymentId, PaymentStatus};
use crate::domain::ports::{
    Attachment, EventNotifierRef, PaymentStoreBox, StatusCacheBox, status_key,
};
use crate::domain::refund::Refund;
use crate::error::{PaymentError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

const COMMIT_LOCK_STRIPES: u64 = 64;

/// Serialises the commit and cache write of each payment, striped by id.
struct CommitLocks {
    stripes: Vec<Mutex<()>>,
}

impl CommitLocks {
    fn new() -> Self {
        Self {
            stripes: (0..COMMIT_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    async fn acquire(&self, id: PaymentId) -> MutexGuard<'_, ()> {
        self.stripes[(id.0 % COMMIT_LOCK_STRIPES) as usize].lock().await
    }
}

#[derive(Debug, Clone, Copy)]
enum Lookup<'a> {
    Id(PaymentId),
    TransactionId(&'a str),
}

/// Lifecycle engine for payment records.
///
/// Every mutating operation runs one read-validate-write unit against the
/// store. The store rejects a write whose version went stale, in which case
/// the unit is replayed from a fresh read (bounded by
/// `EngineConfig::max_write_attempts`). Only after the store commit does the
/// engine mirror the status into the cache and publish an event; failures of
/// either are logged and never undo the commit.
///
/// A payment's commit and its cache write happen under one per-payment lock,
/// so cache writes land in commit order and a delete is never followed by a
/// stale status entry.
///
/// Mutating operations return the payment row as stored, without metadata;
/// [`get_payment`](Self::get_payment) returns the hydrated view.
pub struct PaymentEngine {
    store: PaymentStoreBox,
    cache: StatusCacheBox,
    notifier: Option<EventNotifierRef>,
    config: EngineConfig,
    commit_locks: CommitLocks,
}

impl PaymentEngine {
    /// Creates an engine over the given store and status cache with the
    /// default configuration and no notifier.
    pub fn new(store: PaymentStoreBox, cache: StatusCacheBox) -> Self {
        Self {
            store,
            cache,
            notifier: None,
            config: EngineConfig::default(),
            commit_locks: CommitLocks::new(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_notifier(mut self, notifier: EventNotifierRef) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Validates the request, persists a new `PENDING` payment under a fresh
    /// transaction id and caches its status.
    #[instrument(skip(self, request))]
    pub async fn create_payment(&self, request: NewPayment) -> Result<Payment> {
        let now = Utc::now();
        let payment = request.into_payment(Uuid::new_v4().to_string(), now)?;
        let payment = self.store.insert(payment).await?;

        info!(
            payment_id = %payment.id,
            transaction_id = %payment.transaction_id,
            amount = %payment.amount,
            currency = %payment.currency,
            "payment created"
        );
        // Another writer may already have moved the new row on, so the
        // cache is filled from a fresh read.
        let _commit = self.commit_locks.acquire(payment.id).await;
        self.refresh_cache(payment.id).await;
        self.notify(PaymentEvent::new(PaymentEventKind::Created, &payment, now));
        Ok(payment)
    }

    /// Fetches a payment by internal id, with its metadata.
    pub async fn get_payment(&self, id: PaymentId) -> Result<Payment> {
        let payment = self.load(Lookup::Id(id)).await?;
        self.hydrate(payment).await
    }

    pub async fn get_payment_by_transaction_id(&self, transaction_id: &str) -> Result<Payment> {
        let payment = self.load(Lookup::TransactionId(transaction_id)).await?;
        self.hydrate(payment).await
    }

    /// Administrative override: sets any recognised status regardless of the
    /// current one.
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        transaction_id: &str,
        status: PaymentStatus,
    ) -> Result<Payment> {
        let (payment, _) = self
            .mutate(
                Lookup::TransactionId(transaction_id),
                PaymentEventKind::StatusUpdated,
                |payment, now| {
                    payment.set_status(status, now);
                    Ok(None)
                },
            )
            .await?;
        info!(payment_id = %payment.id, status = %payment.status, "payment status updated");
        Ok(payment)
    }

    /// Settles a `PENDING` payment, optionally recording the gateway used.
    #[instrument(skip(self))]
    pub async fn complete_payment(
        &self,
        transaction_id: &str,
        gateway_id: Option<String>,
    ) -> Result<Payment> {
        let (payment, _) = self
            .mutate(
                Lookup::TransactionId(transaction_id),
                PaymentEventKind::Completed,
                |payment, now| {
                    payment.complete(gateway_id.clone(), now)?;
                    Ok(None)
                },
            )
            .await?;
        info!(payment_id = %payment.id, "payment completed");
        Ok(payment)
    }

    #[instrument(skip(self))]
    pub async fn cancel_payment(&self, transaction_id: &str, reason: &str) -> Result<Payment> {
        let (payment, _) = self
            .mutate(
                Lookup::TransactionId(transaction_id),
                PaymentEventKind::Cancelled,
                |payment, now| {
                    payment.cancel(reason, now)?;
                    Ok(None)
                },
            )
            .await?;
        info!(payment_id = %payment.id, "payment cancelled");
        Ok(payment)
    }

    /// Refunds part or all of a completed payment.
    ///
    /// The refund record and the new refunded total are committed together.
    #[instrument(skip(self))]
    pub async fn process_refund(&self, transaction_id: &str, amount: Decimal) -> Result<Refund> {
        let amount = Amount::new(amount)?;
        let actor = &self.config.refund_actor;
        let reason = &self.config.refund_reason;

        let (payment, attachment) = self
            .mutate(
                Lookup::TransactionId(transaction_id),
                PaymentEventKind::Refunded,
                |payment, now| {
                    payment.apply_refund(amount, now)?;
                    let refund =
                        Refund::new(payment.id, amount, actor.as_str(), Some(reason.clone()), now);
                    Ok(Some(Attachment::Refund(refund)))
                },
            )
            .await?;

        let Some(Attachment::Refund(refund)) = attachment else {
            return Err(PaymentError::internal("refund record missing after commit"));
        };
        info!(
            payment_id = %payment.id,
            refund_id = %refund.id,
            amount = %refund.amount,
            refunded_total = %payment.refunded_amount,
            status = %payment.status,
            "refund processed"
        );
        Ok(refund)
    }

    /// Moves a `FAILED` payment back to `PENDING`, up to the configured
    /// number of attempts.
    #[instrument(skip(self))]
    pub async fn retry_payment(&self, id: PaymentId) -> Result<Payment> {
        let (payment, _) = self
            .mutate(Lookup::Id(id), PaymentEventKind::Retried, |payment, now| {
                payment.apply_retry(now)?;
                Ok(None)
            })
            .await?;
        info!(payment_id = %payment.id, retry_count = payment.retry_count, "payment retried");
        Ok(payment)
    }

    /// Marks a payment `FRAUDULENT` from any state and records the
    /// determination.
    #[instrument(skip(self))]
    pub async fn flag_fraudulent(
        &self,
        transaction_id: &str,
        reason: &str,
        risk_score: Decimal,
        flagged_by: &str,
    ) -> Result<FraudFlag> {
        let (payment, attachment) = self
            .mutate(
                Lookup::TransactionId(transaction_id),
                PaymentEventKind::FlaggedFraudulent,
                |payment, now| {
                    payment.flag_fraudulent(reason, now);
                    let flag = FraudFlag::new(payment.id, reason, risk_score, flagged_by, now);
                    Ok(Some(Attachment::FraudFlag(flag)))
                },
            )
            .await?;

        let Some(Attachment::FraudFlag(flag)) = attachment else {
            return Err(PaymentError::internal("fraud flag record missing after commit"));
        };
        warn!(
            payment_id = %payment.id,
            risk_score = %flag.risk_score,
            flagged_by = %flag.flagged_by,
            "payment flagged as fraudulent"
        );
        Ok(flag)
    }

    /// Deletes a payment that is not `COMPLETED`, along with its metadata,
    /// and clears its cached status.
    #[instrument(skip(self))]
    pub async fn delete_payment(&self, id: PaymentId) -> Result<()> {
        let mut attempt = 1;
        loop {
            let payment = self.load(Lookup::Id(id)).await?;
            payment.ensure_deletable()?;

            let _commit = self.commit_locks.acquire(id).await;
            match self.store.delete(&payment).await {
                Ok(()) => {
                    info!(payment_id = %id, "payment deleted");
                    self.write_cache(id, None).await;
                    self.notify(PaymentEvent::new(
                        PaymentEventKind::Deleted,
                        &payment,
                        Utc::now(),
                    ));
                    return Ok(());
                }
                Err(PaymentError::ConcurrentModification(_))
                    if attempt < self.config.max_write_attempts =>
                {
                    debug!(payment_id = %id, attempt, "stale payment version, retrying delete");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Returns the cached status string without consulting the store.
    /// `None` means unknown or expired; callers may fall back to
    /// [`get_payment`](Self::get_payment).
    pub async fn get_cached_status(&self, id: PaymentId) -> Result<Option<String>> {
        let value = self.cache.get(&status_key(id)).await?;
        match &value {
            Some(status) => debug!(payment_id = %id, %status, "status cache hit"),
            None => debug!(payment_id = %id, "status cache miss"),
        }
        Ok(value)
    }

    pub async fn payments_by_status(&self, status: PaymentStatus) -> Result<Vec<Payment>> {
        self.store.find_by_status(status).await
    }

    pub async fn payments_by_payer(&self, payer_id: &str) -> Result<Vec<Payment>> {
        self.store.find_by_payer(payer_id).await
    }

    pub async fn payments_by_payee(&self, payee_id: &str) -> Result<Vec<Payment>> {
        self.store.find_by_payee(payee_id).await
    }

    pub async fn fraudulent_payments(&self) -> Result<Vec<Payment>> {
        self.store.find_fraudulent().await
    }

    pub async fn refundable_payments(&self) -> Result<Vec<Payment>> {
        self.store.find_refundable().await
    }

    pub async fn all_payments(&self) -> Result<Vec<Payment>> {
        self.store.find_all().await
    }

    pub async fn refunds_for(&self, id: PaymentId) -> Result<Vec<Refund>> {
        self.store.refunds_for(id).await
    }

    pub async fn fraud_flags_for(&self, id: PaymentId) -> Result<Vec<FraudFlag>> {
        self.store.fraud_flags_for(id).await
    }

    async fn load(&self, lookup: Lookup<'_>) -> Result<Payment> {
        let found = match lookup {
            Lookup::Id(id) => self.store.find_by_id(id).await?,
            Lookup::TransactionId(tx) => self.store.find_by_transaction_id(tx).await?,
        };
        found.ok_or_else(|| match lookup {
            Lookup::Id(id) => PaymentError::NotFound(format!("Payment not found with ID: {id}")),
            Lookup::TransactionId(tx) => {
                PaymentError::NotFound(format!("Payment not found with transaction ID: {tx}"))
            }
        })
    }

    async fn hydrate(&self, mut payment: Payment) -> Result<Payment> {
        payment.metadata = self.store.metadata_for(payment.id).await?;
        Ok(payment)
    }

    /// Runs one read-validate-write unit, replaying it from a fresh read if a
    /// concurrent writer committed first. A rejected transition returns
    /// before anything is written.
    async fn mutate<F>(
        &self,
        lookup: Lookup<'_>,
        kind: PaymentEventKind,
        mut apply: F,
    ) -> Result<(Payment, Option<Attachment>)>
    where
        F: FnMut(&mut Payment, DateTime<Utc>) -> Result<Option<Attachment>> + Send,
    {
        let mut attempt = 1;
        loop {
            let mut payment = self.load(lookup).await?;
            let now = Utc::now();
            let attachment = apply(&mut payment, now)?;

            let _commit = self.commit_locks.acquire(payment.id).await;
            match self.store.save(payment, attachment.clone()).await {
                Ok(saved) => {
                    self.after_commit(&saved, kind, now).await;
                    return Ok((saved, attachment));
                }
                Err(PaymentError::ConcurrentModification(id))
                    if attempt < self.config.max_write_attempts =>
                {
                    debug!(payment_id = %id, attempt, "stale payment version, replaying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn after_commit(&self, payment: &Payment, kind: PaymentEventKind, now: DateTime<Utc>) {
        self.write_cache(payment.id, Some(payment.status)).await;
        self.notify(PaymentEvent::new(kind, payment, now));
    }

    /// Rewrites the cache entry from the row currently stored.
    async fn refresh_cache(&self, id: PaymentId) {
        match self.store.find_by_id(id).await {
            Ok(current) => self.write_cache(id, current.map(|p| p.status)).await,
            Err(e) => warn!(payment_id = %id, error = %e, "status cache refresh failed after commit"),
        }
    }

    /// Mirrors `status` into the cache (`None` clears the entry). The store
    /// commit has already happened, so a failure here only leaves the cache
    /// stale.
    async fn write_cache(&self, id: PaymentId, status: Option<PaymentStatus>) {
        let key = status_key(id);
        let result = match (status, self.config.status_ttl) {
            (Some(status), Some(ttl)) => {
                self.cache
                    .set_with_expiration(&key, status.as_str(), ttl)
                    .await
            }
            (status, _) => self.cache.put(&key, status.map(|s| s.as_str())).await,
        };
        if let Err(e) = result {
            warn!(payment_id = %id, error = %e, "status cache write failed after commit");
        }
    }

    fn notify(&self, event: PaymentEvent) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        match serde_json::to_string(&event) {
            Ok(message) => notifier.publish(&self.config.events_topic, message),
            Err(e) => warn!(payment_id = %event.payment_id, error = %e, "failed to encode payment event"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Balance;
    use crate::domain::payment::{Currency, PaymentMethod};
    use crate::domain::ports::{PaymentStore, StatusCache};
    use crate::domain::lifecycle::MAX_RETRY_ATTEMPTS;
    use crate::error::ErrorKind;
    use crate::infrastructure::in_memory::{InMemoryPaymentStore, InMemoryStatusCache};
    use crate::infrastructure::notifier::ChannelNotifier;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Cache whose writes always fail; reads miss.
    struct UnreachableCache;

    #[async_trait]
    impl StatusCache for UnreachableCache {
        async fn set(&self, _key: &str, _value: &str) -> Result<()> {
            Err(PaymentError::internal("connection refused"))
        }
        async fn set_with_expiration(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<()> {
            Err(PaymentError::internal("connection refused"))
        }
        async fn get(&self, _key: &str) -> Result<Option<String>> {
            Ok(None)
        }
        async fn delete(&self, _key: &str) -> Result<()> {
            Err(PaymentError::internal("connection refused"))
        }
    }

    /// Cache that stalls before storing `FAILED`, so a later commit can
    /// overtake the write.
    #[derive(Clone)]
    struct StallingCache {
        inner: InMemoryStatusCache,
    }

    impl StallingCache {
        async fn stall(&self, value: &str) {
            if value == "FAILED" {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        }
    }

    #[async_trait]
    impl StatusCache for StallingCache {
        async fn set(&self, key: &str, value: &str) -> Result<()> {
            self.stall(value).await;
            self.inner.set(key, value).await
        }
        async fn set_with_expiration(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
            self.stall(value).await;
            self.inner.set_with_expiration(key, value, ttl).await
        }
        async fn get(&self, key: &str) -> Result<Option<String>> {
            self.inner.get(key).await
        }
        async fn delete(&self, key: &str) -> Result<()> {
            self.inner.delete(key).await
        }
    }

    /// Store whose writes fail with an infrastructure error, and whose
    /// lookups fail too when `fail_lookups` is set. Counts write attempts.
    struct BrokenStore {
        inner: InMemoryPaymentStore,
        fail_lookups: bool,
        writes: Arc<AtomicUsize>,
    }

    impl BrokenStore {
        fn new(inner: InMemoryPaymentStore, fail_lookups: bool) -> (Self, Arc<AtomicUsize>) {
            let writes = Arc::new(AtomicUsize::new(0));
            let store = Self {
                inner,
                fail_lookups,
                writes: Arc::clone(&writes),
            };
            (store, writes)
        }

        fn lookup_guard(&self) -> Result<()> {
            if self.fail_lookups {
                return Err(PaymentError::internal("connection reset"));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl PaymentStore for BrokenStore {
        async fn insert(&self, payment: Payment) -> Result<Payment> {
            self.inner.insert(payment).await
        }
        async fn save(&self, _payment: Payment, _attachment: Option<Attachment>) -> Result<Payment> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Err(PaymentError::internal("disk full"))
        }
        async fn delete(&self, _payment: &Payment) -> Result<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Err(PaymentError::internal("disk full"))
        }
        async fn find_by_id(&self, id: PaymentId) -> Result<Option<Payment>> {
            self.lookup_guard()?;
            self.inner.find_by_id(id).await
        }
        async fn find_by_transaction_id(&self, transaction_id: &str) -> Result<Option<Payment>> {
            self.lookup_guard()?;
            self.inner.find_by_transaction_id(transaction_id).await
        }
        async fn find_by_status(&self, status: PaymentStatus) -> Result<Vec<Payment>> {
            self.inner.find_by_status(status).await
        }
        async fn find_by_payer(&self, payer_id: &str) -> Result<Vec<Payment>> {
            self.inner.find_by_payer(payer_id).await
        }
        async fn find_by_payee(&self, payee_id: &str) -> Result<Vec<Payment>> {
            self.inner.find_by_payee(payee_id).await
        }
        async fn find_fraudulent(&self) -> Result<Vec<Payment>> {
            self.inner.find_fraudulent().await
        }
        async fn find_refundable(&self) -> Result<Vec<Payment>> {
            self.inner.find_refundable().await
        }
        async fn find_all(&self) -> Result<Vec<Payment>> {
            self.inner.find_all().await
        }
        async fn metadata_for(&self, id: PaymentId) -> Result<HashMap<String, String>> {
            self.inner.metadata_for(id).await
        }
        async fn refunds_for(&self, id: PaymentId) -> Result<Vec<Refund>> {
            self.inner.refunds_for(id).await
        }
        async fn fraud_flags_for(&self, id: PaymentId) -> Result<Vec<FraudFlag>> {
            self.inner.fraud_flags_for(id).await
        }
    }

    fn setup() -> (PaymentEngine, InMemoryPaymentStore, InMemoryStatusCache) {
        let store = InMemoryPaymentStore::new();
        let cache = InMemoryStatusCache::new();
        let engine = PaymentEngine::new(Box::new(store.clone()), Box::new(cache.clone()));
        (engine, store, cache)
    }

    fn request() -> NewPayment {
        NewPayment::new(dec!(100.00), Currency::Usd, PaymentMethod::CreditCard, "p1", "p2")
    }

    #[tokio::test]
    async fn test_create_payment_caches_pending_status() {
        let (engine, _store, cache) = setup();
        let payment = engine.create_payment(request()).await.unwrap();

        assert_eq!(payment.status, PaymentStatus::Pending);
        assert_eq!(payment.retry_count, 0);
        assert_eq!(payment.refunded_amount, Balance::ZERO);
        assert_ne!(payment.id, PaymentId::UNASSIGNED);
        assert!(Uuid::parse_str(&payment.transaction_id).is_ok());
        assert_eq!(
            cache.get(&status_key(payment.id)).await.unwrap().as_deref(),
            Some("PENDING")
        );
    }

    #[tokio::test]
    async fn test_create_payment_validation_writes_nothing() {
        let (engine, store, _cache) = setup();
        let invalid = NewPayment {
            amount: Some(dec!(0)),
            ..request()
        };

        let err = engine.create_payment(invalid).await.unwrap_err();
        assert!(matches!(err, PaymentError::ValidationError(_)));
        assert!(store.find_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_payment_hydrates_metadata() {
        let (engine, _store, _cache) = setup();
        let created = engine
            .create_payment(request().with_metadata("channel", "web"))
            .await
            .unwrap();

        let fetched = engine.get_payment(created.id).await.unwrap();
        assert_eq!(fetched.metadata.get("channel").map(String::as_str), Some("web"));

        let missing = engine.get_payment(PaymentId(999)).await.unwrap_err();
        assert!(matches!(missing, PaymentError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_update_status_is_permissive() {
        let (engine, _store, cache) = setup();
        let payment = engine.create_payment(request()).await.unwrap();
        let tx = payment.transaction_id.as_str();

        engine.update_status(tx, PaymentStatus::Refunded).await.unwrap();
        let updated = engine.update_status(tx, PaymentStatus::Pending).await.unwrap();

        assert_eq!(updated.status, PaymentStatus::Pending);
        assert!(updated.updated_at >= payment.updated_at);
        assert_eq!(
            cache.get(&status_key(payment.id)).await.unwrap().as_deref(),
            Some("PENDING")
        );
        assert!(matches!(
            engine.update_status("nope", PaymentStatus::Failed).await,
            Err(PaymentError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_cache_failure_does_not_undo_commit() {
        let store = InMemoryPaymentStore::new();
        let engine = PaymentEngine::new(Box::new(store.clone()), Box::new(UnreachableCache));

        let payment = engine.create_payment(request()).await.unwrap();
        engine
            .update_status(&payment.transaction_id, PaymentStatus::Failed)
            .await
            .unwrap();

        let stored = store.find_by_id(payment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Failed);
        assert_eq!(engine.get_cached_status(payment.id).await.unwrap(), None);

        engine.delete_payment(payment.id).await.unwrap();
        assert!(store.find_by_id(payment.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_refund_rejects_non_positive_amount() {
        let (engine, _store, _cache) = setup();
        let payment = engine.create_payment(request()).await.unwrap();
        engine
            .update_status(&payment.transaction_id, PaymentStatus::Completed)
            .await
            .unwrap();

        let err = engine
            .process_refund(&payment.transaction_id, dec!(0))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::ValidationError(_)));
    }

    #[tokio::test]
    async fn test_full_refund_moves_to_refunded_and_updates_cache() {
        let (engine, store, cache) = setup();
        let payment = engine.create_payment(request()).await.unwrap();
        let tx = payment.transaction_id.as_str();
        engine.update_status(tx, PaymentStatus::Completed).await.unwrap();

        let refund = engine.process_refund(tx, dec!(100.00)).await.unwrap();
        assert_eq!(refund.refunded_by, "system");
        assert_eq!(refund.payment_id, payment.id);

        let stored = store.find_by_id(payment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Refunded);
        assert_eq!(
            cache.get(&status_key(payment.id)).await.unwrap().as_deref(),
            Some("REFUNDED")
        );
        assert!(engine.refundable_payments().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_completed_leaves_store_and_cache() {
        let (engine, store, cache) = setup();
        let payment = engine.create_payment(request()).await.unwrap();
        engine
            .update_status(&payment.transaction_id, PaymentStatus::Completed)
            .await
            .unwrap();

        let err = engine.delete_payment(payment.id).await.unwrap_err();
        assert!(matches!(err, PaymentError::InvalidState(_)));
        assert!(store.find_by_id(payment.id).await.unwrap().is_some());
        assert_eq!(
            cache.get(&status_key(payment.id)).await.unwrap().as_deref(),
            Some("COMPLETED")
        );
    }

    #[tokio::test]
    async fn test_delete_clears_cache_and_metadata() {
        let (engine, store, cache) = setup();
        let payment = engine
            .create_payment(request().with_metadata("k", "v"))
            .await
            .unwrap();

        engine.delete_payment(payment.id).await.unwrap();

        assert!(store.find_by_id(payment.id).await.unwrap().is_none());
        assert!(store.metadata_for(payment.id).await.unwrap().is_empty());
        assert_eq!(cache.get(&status_key(payment.id)).await.unwrap(), None);
        assert!(matches!(
            engine.delete_payment(payment.id).await,
            Err(PaymentError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_status_ttl_uses_expiring_entries() {
        let store = InMemoryPaymentStore::new();
        let cache = InMemoryStatusCache::new();
        let engine = PaymentEngine::new(Box::new(store), Box::new(cache.clone()))
            .with_config(EngineConfig::default().with_status_ttl(Some(Duration::from_millis(20))));

        let payment = engine.create_payment(request()).await.unwrap();
        assert_eq!(
            engine.get_cached_status(payment.id).await.unwrap().as_deref(),
            Some("PENDING")
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(engine.get_cached_status(payment.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_events_published_after_commit() {
        let (notifier, mut events) = ChannelNotifier::new();
        let (engine, _store, _cache) = setup();
        let engine = engine.with_notifier(Arc::new(notifier));

        let payment = engine.create_payment(request()).await.unwrap();
        engine
            .flag_fraudulent(&payment.transaction_id, "velocity", dec!(0.5), "rules")
            .await
            .unwrap();

        let (topic, first) = events.recv().await.unwrap();
        assert_eq!(topic, "payment-events");
        let first: PaymentEvent = serde_json::from_str(&first).unwrap();
        assert_eq!(first.kind, PaymentEventKind::Created);

        let (_, second) = events.recv().await.unwrap();
        let second: PaymentEvent = serde_json::from_str(&second).unwrap();
        assert_eq!(second.kind, PaymentEventKind::FlaggedFraudulent);
        assert_eq!(second.status, PaymentStatus::Fraudulent);
        assert_eq!(second.payment_id, payment.id);
    }

    #[tokio::test]
    async fn test_cache_writes_follow_commit_order() {
        let store = InMemoryPaymentStore::new();
        let cache = InMemoryStatusCache::new();
        let engine = Arc::new(PaymentEngine::new(
            Box::new(store.clone()),
            Box::new(StallingCache {
                inner: cache.clone(),
            }),
        ));
        let payment = engine.create_payment(request()).await.unwrap();
        let tx = payment.transaction_id.clone();

        let slow = {
            let engine = Arc::clone(&engine);
            let tx = tx.clone();
            tokio::spawn(async move { engine.update_status(&tx, PaymentStatus::Failed).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        engine
            .update_status(&tx, PaymentStatus::Completed)
            .await
            .unwrap();
        slow.await.unwrap().unwrap();

        let stored = store.find_by_id(payment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Completed);
        assert_eq!(
            cache.get(&status_key(payment.id)).await.unwrap().as_deref(),
            Some("COMPLETED")
        );
    }

    #[tokio::test]
    async fn test_delete_is_not_followed_by_stale_cache_write() {
        let store = InMemoryPaymentStore::new();
        let cache = InMemoryStatusCache::new();
        let engine = Arc::new(PaymentEngine::new(
            Box::new(store.clone()),
            Box::new(StallingCache {
                inner: cache.clone(),
            }),
        ));
        let payment = engine.create_payment(request()).await.unwrap();

        let slow = {
            let engine = Arc::clone(&engine);
            let tx = payment.transaction_id.clone();
            tokio::spawn(async move { engine.update_status(&tx, PaymentStatus::Failed).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        engine.delete_payment(payment.id).await.unwrap();
        slow.await.unwrap().unwrap();

        assert!(store.find_by_id(payment.id).await.unwrap().is_none());
        assert_eq!(cache.get(&status_key(payment.id)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_store_write_failure_propagates_without_retry() {
        let cache = InMemoryStatusCache::new();
        let (store, writes) = BrokenStore::new(InMemoryPaymentStore::new(), false);
        let engine = PaymentEngine::new(Box::new(store), Box::new(cache.clone()));

        let payment = engine.create_payment(request()).await.unwrap();
        let key = status_key(payment.id);

        let err = engine
            .update_status(&payment.transaction_id, PaymentStatus::Completed)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Infrastructure);
        assert_eq!(writes.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get(&key).await.unwrap().as_deref(), Some("PENDING"));

        let err = engine.delete_payment(payment.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Infrastructure);
        assert_eq!(writes.load(Ordering::SeqCst), 2);
        assert_eq!(cache.get(&key).await.unwrap().as_deref(), Some("PENDING"));
    }

    #[tokio::test]
    async fn test_store_lookup_failure_propagates() {
        let inner = InMemoryPaymentStore::new();
        let seeded = inner
            .insert(request().into_payment("tx-1".to_string(), Utc::now()).unwrap())
            .await
            .unwrap();
        let cache = InMemoryStatusCache::new();
        let (store, writes) = BrokenStore::new(inner, true);
        let engine = PaymentEngine::new(Box::new(store), Box::new(cache.clone()));

        let err = engine.get_payment(seeded.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Infrastructure);

        let err = engine.process_refund("tx-1", dec!(1.00)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Infrastructure);
        let err = engine.retry_payment(seeded.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Infrastructure);

        assert_eq!(writes.load(Ordering::SeqCst), 0);
        assert_eq!(cache.get(&status_key(seeded.id)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_retry_count_never_exceeds_bound() {
        let (engine, store, _cache) = setup();
        let engine = engine.with_config(EngineConfig {
            max_write_attempts: 10,
            ..EngineConfig::default()
        });
        let payment = engine.create_payment(request()).await.unwrap();

        for _ in 0..5 {
            engine
                .update_status(&payment.transaction_id, PaymentStatus::Failed)
                .await
                .unwrap();
            let _ = engine.retry_payment(payment.id).await;
        }

        let stored = store.find_by_id(payment.id).await.unwrap().unwrap();
        assert_eq!(stored.retry_count, MAX_RETRY_ATTEMPTS);
        assert_eq!(stored.status, PaymentStatus::Failed);
    }
}
