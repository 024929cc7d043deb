use crate::domain::payment::Payment;
use crate::error::Result;
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct PaymentRow<'a> {
    id: u64,
    transaction_id: &'a str,
    status: &'static str,
    amount: Decimal,
    currency: &'static str,
    method: &'static str,
    refunded: Decimal,
    retries: u32,
    fraudulent: bool,
}

impl<'a> From<&'a Payment> for PaymentRow<'a> {
    fn from(p: &'a Payment) -> Self {
        Self {
            id: p.id.0,
            transaction_id: &p.transaction_id,
            status: p.status.as_str(),
            amount: p.amount.value().normalize(),
            currency: p.currency.as_str(),
            method: p.payment_method.as_str(),
            refunded: p.refunded_amount.value().normalize(),
            retries: p.retry_count,
            fraudulent: p.is_fraudulent,
        }
    }
}

/// Writes the final payment table as CSV, one row per payment in id order.
pub struct PaymentWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> PaymentWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_payments(&mut self, mut payments: Vec<Payment>) -> Result<()> {
        payments.sort_by_key(|p| p.id);
        for payment in &payments {
            self.writer.serialize(PaymentRow::from(payment))?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
