use crate::domain::payment::PaymentId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PaymentError>;

/// Coarse classification of a [`PaymentError`], used by adapters to pick a
/// response (400 / 404 / 409 / 5xx for an HTTP front end).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    InvalidState,
    Infrastructure,
}

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Payment {0} was modified concurrently")]
    ConcurrentModification(PaymentId),
    #[error("Internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
    #[cfg(feature = "storage-rocksdb")]
    #[error("RocksDB error: {0}")]
    RocksDbError(#[from] rocksdb::Error),
    #[cfg(feature = "cache-redis")]
    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),
}

impl PaymentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PaymentError::ValidationError(_) => ErrorKind::Validation,
            PaymentError::NotFound(_) => ErrorKind::NotFound,
            PaymentError::InvalidState(_) | PaymentError::ConcurrentModification(_) => {
                ErrorKind::InvalidState
            }
            _ => ErrorKind::Infrastructure,
        }
    }

    pub(crate) fn internal(msg: impl Into<String>) -> Self {
        PaymentError::InternalError(Box::new(std::io::Error::other(msg.into())))
    }
}
