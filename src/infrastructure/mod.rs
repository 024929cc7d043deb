//! Adapters implementing the domain ports.

pub mod in_memory;
pub mod notifier;
#[cfg(feature = "cache-redis")]
pub mod redis;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
