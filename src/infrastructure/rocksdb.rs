use crate::domain::fraud::FraudFlag;
use crate::domain::payment::{Payment, PaymentId, PaymentStatus};
use crate::domain::ports::{Attachment, PaymentStore};
use crate::domain::refund::Refund;
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for payment rows, keyed by big-endian payment id.
pub const CF_PAYMENTS: &str = "payments";
/// Column Family mapping transaction id to payment id.
pub const CF_TRANSACTION_INDEX: &str = "transaction_index";
/// Column Family for payment metadata maps, keyed by payment id.
pub const CF_METADATA: &str = "metadata";
/// Column Family for refund records, keyed by payment id followed by refund id.
pub const CF_REFUNDS: &str = "refunds";
/// Column Family for fraud flag records, keyed like refunds.
pub const CF_FRAUD_FLAGS: &str = "fraud_flags";
/// Column Family for counters.
pub const CF_SEQUENCES: &str = "sequences";

const PAYMENT_ID_SEQUENCE: &[u8] = b"payment_id";

/// A persistent payment store backed by RocksDB.
///
/// Each table lives in its own Column Family. Writes are serialised through
/// an async mutex so the version check and the `WriteBatch` that follows it
/// form one atomic unit; reads go straight to the database.
///
/// `Clone` shares the underlying `Arc<DB>` and write lock.
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path, creating
    /// any missing Column Families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = [
            CF_PAYMENTS,
            CF_TRANSACTION_INDEX,
            CF_METADATA,
            CF_REFUNDS,
            CF_FRAUD_FLAGS,
            CF_SEQUENCES,
        ]
        .into_iter()
        .map(|name| ColumnFamilyDescriptor::new(name, Options::default()));

        let db = DB::open_cf_descriptors(&opts, path, cfs)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| PaymentError::internal(format!("{name} column family not found")))
    }

    fn get_json<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        match self.db.get_cf(self.cf(cf)?, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan_payments(&self, predicate: impl Fn(&Payment) -> bool) -> Result<Vec<Payment>> {
        let mut payments = Vec::new();
        for item in self.db.iterator_cf(self.cf(CF_PAYMENTS)?, IteratorMode::Start) {
            let (_key, value) = item?;
            let payment: Payment = serde_json::from_slice(&value)?;
            if predicate(&payment) {
                payments.push(payment);
            }
        }
        Ok(payments)
    }

    fn scan_prefix<T: DeserializeOwned>(&self, cf: &str, prefix: &[u8]) -> Result<Vec<T>> {
        let mut records = Vec::new();
        let iter = self
            .db
            .iterator_cf(self.cf(cf)?, IteratorMode::From(prefix, Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            records.push(serde_json::from_slice(&value)?);
        }
        Ok(records)
    }

    fn check_version(&self, payment: &Payment) -> Result<()> {
        let stored: Option<Payment> = self.get_json(CF_PAYMENTS, &payment_key(payment.id))?;
        match stored {
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

    fn next_payment_id(&self) -> Result<PaymentId> {
        let current = match self.db.get_cf(self.cf(CF_SEQUENCES)?, PAYMENT_ID_SEQUENCE)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| PaymentError::internal("corrupt payment id sequence"))?;
                u64::from_be_bytes(raw)
            }
            None => 0,
        };
        Ok(PaymentId(current + 1))
    }
}

fn payment_key(id: PaymentId) -> [u8; 8] {
    id.0.to_be_bytes()
}

fn child_key(id: PaymentId, child: &uuid::Uuid) -> Vec<u8> {
    let mut key = payment_key(id).to_vec();
    key.extend_from_slice(child.as_bytes());
    key
}

#[async_trait]
impl PaymentStore for RocksDBStore {
    async fn insert(&self, mut payment: Payment) -> Result<Payment> {
        let _guard = self.write_lock.lock().await;

        let index = self.cf(CF_TRANSACTION_INDEX)?;
        if self
            .db
            .get_pinned_cf(index, payment.transaction_id.as_bytes())?
            .is_some()
        {
            return Err(PaymentError::internal(format!(
                "Duplicate transaction id: {}",
                payment.transaction_id
            )));
        }

        payment.id = self.next_payment_id()?;
        payment.version = 1;
        let metadata = std::mem::take(&mut payment.metadata);
        let key = payment_key(payment.id);

        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_PAYMENTS)?, key, serde_json::to_vec(&payment)?);
        batch.put_cf(index, payment.transaction_id.as_bytes(), key);
        batch.put_cf(self.cf(CF_SEQUENCES)?, PAYMENT_ID_SEQUENCE, key);
        if !metadata.is_empty() {
            batch.put_cf(self.cf(CF_METADATA)?, key, serde_json::to_vec(&metadata)?);
        }
        self.db.write(batch)?;

        payment.metadata = metadata;
        Ok(payment)
    }

    async fn save(&self, mut payment: Payment, attachment: Option<Attachment>) -> Result<Payment> {
        let _guard = self.write_lock.lock().await;
        self.check_version(&payment)?;

        payment.version += 1;
        let metadata = std::mem::take(&mut payment.metadata);

        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.cf(CF_PAYMENTS)?,
            payment_key(payment.id),
            serde_json::to_vec(&payment)?,
        );
        match &attachment {
            Some(Attachment::Refund(refund)) => batch.put_cf(
                self.cf(CF_REFUNDS)?,
                child_key(payment.id, &refund.id),
                serde_json::to_vec(refund)?,
            ),
            Some(Attachment::FraudFlag(flag)) => batch.put_cf(
                self.cf(CF_FRAUD_FLAGS)?,
                child_key(payment.id, &flag.id),
                serde_json::to_vec(flag)?,
            ),
            None => {}
        }
        self.db.write(batch)?;

        payment.metadata = metadata;
        Ok(payment)
    }

    async fn delete(&self, payment: &Payment) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.check_version(payment)?;

        let key = payment_key(payment.id);
        let mut batch = WriteBatch::default();
        batch.delete_cf(self.cf(CF_PAYMENTS)?, key);
        batch.delete_cf(
            self.cf(CF_TRANSACTION_INDEX)?,
            payment.transaction_id.as_bytes(),
        );
        batch.delete_cf(self.cf(CF_METADATA)?, key);
        self.db.write(batch)?;
        Ok(())
    }

    async fn find_by_id(&self, id: PaymentId) -> Result<Option<Payment>> {
        self.get_json(CF_PAYMENTS, &payment_key(id))
    }

    async fn find_by_transaction_id(&self, transaction_id: &str) -> Result<Option<Payment>> {
        let index = self.cf(CF_TRANSACTION_INDEX)?;
        match self.db.get_cf(index, transaction_id.as_bytes())? {
            Some(key) => self.get_json(CF_PAYMENTS, &key),
            None => Ok(None),
        }
    }

    async fn find_by_status(&self, status: PaymentStatus) -> Result<Vec<Payment>> {
        self.scan_payments(|p| p.status == status)
    }

    async fn find_by_payer(&self, payer_id: &str) -> Result<Vec<Payment>> {
        self.scan_payments(|p| p.payer_id == payer_id)
    }

    async fn find_by_payee(&self, payee_id: &str) -> Result<Vec<Payment>> {
        self.scan_payments(|p| p.payee_id == payee_id)
    }

    async fn find_fraudulent(&self) -> Result<Vec<Payment>> {
        self.scan_payments(|p| p.is_fraudulent)
    }

    async fn find_refundable(&self) -> Result<Vec<Payment>> {
        self.scan_payments(Payment::is_refundable)
    }

    async fn find_all(&self) -> Result<Vec<Payment>> {
        self.scan_payments(|_| true)
    }

    async fn metadata_for(&self, id: PaymentId) -> Result<HashMap<String, String>> {
        Ok(self
            .get_json(CF_METADATA, &payment_key(id))?
            .unwrap_or_default())
    }

    async fn refunds_for(&self, id: PaymentId) -> Result<Vec<Refund>> {
        let mut refunds: Vec<Refund> = self.scan_prefix(CF_REFUNDS, &payment_key(id))?;
        refunds.sort_by_key(|r| r.refunded_at);
        Ok(refunds)
    }

    async fn fraud_flags_for(&self, id: PaymentId) -> Result<Vec<FraudFlag>> {
        let mut flags: Vec<FraudFlag> = self.scan_prefix(CF_FRAUD_FLAGS, &payment_key(id))?;
        flags.sort_by_key(|f| f.flagged_at);
        Ok(flags)
    }
}
