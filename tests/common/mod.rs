#![allow(dead_code)]

use finguard::application::engine::PaymentEngine;
use finguard::domain::payment::{Currency, NewPayment, PaymentMethod};
use finguard::infrastructure::in_memory::{InMemoryPaymentStore, InMemoryStatusCache};
use rust_decimal_macros::dec;
use std::io::Write;
use tempfile::NamedTempFile;

pub const HEADER: &str = "op,ref,amount,currency,method,payer,payee,status,reason,score,actor";

/// Writes a command CSV (header included) to a temp file.
pub fn commands_file(rows: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "{HEADER}").unwrap();
    for row in rows {
        writeln!(file, "{row}").unwrap();
    }
    file.flush().unwrap();
    file
}

/// An engine over fresh in-memory adapters, plus handles to inspect them.
pub fn engine() -> (PaymentEngine, InMemoryPaymentStore, InMemoryStatusCache) {
    let store = InMemoryPaymentStore::new();
    let cache = InMemoryStatusCache::new();
    let engine = PaymentEngine::new(Box::new(store.clone()), Box::new(cache.clone()));
    (engine, store, cache)
}

/// 100.00 USD by credit card from p1 to p2.
pub fn card_payment() -> NewPayment {
    NewPayment::new(dec!(100.00), Currency::Usd, PaymentMethod::CreditCard, "p1", "p2")
}
