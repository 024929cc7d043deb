use super::money::{Amount, Balance};
use crate::error::{PaymentError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Internal surrogate identifier of a payment, assigned by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentId(pub u64);

impl PaymentId {
    /// Placeholder carried by a payment that has not been inserted yet.
    pub const UNASSIGNED: Self = Self(0);
}

impl fmt::Display for PaymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for PaymentId {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<u64>()
            .map(PaymentId)
            .map_err(|_| PaymentError::ValidationError(format!("Invalid payment id: {s}")))
    }
}

/// Implements `as_str`, `Display` and case-insensitive `FromStr` for a
/// SCREAMING_SNAKE_CASE enumeration.
macro_rules! string_enum {
    ($name:ident, $label:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = PaymentError;

            fn from_str(s: &str) -> Result<Self> {
                let wanted = s.trim();
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str().eq_ignore_ascii_case(wanted))
                    .ok_or_else(|| {
                        PaymentError::ValidationError(format!(
                            concat!("Unrecognized ", $label, ": {}"),
                            wanted
                        ))
                    })
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
    Cancelled,
    Fraudulent,
}

string_enum!(PaymentStatus, "payment status" {
    Pending => "PENDING",
    Completed => "COMPLETED",
    Failed => "FAILED",
    Refunded => "REFUNDED",
    Cancelled => "CANCELLED",
    Fraudulent => "FRAUDULENT",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Currency {
    Brl,
    Usd,
    Eur,
    Gbp,
    Jpy,
}

string_enum!(Currency, "currency" {
    Brl => "BRL",
    Usd => "USD",
    Eur => "EUR",
    Gbp => "GBP",
    Jpy => "JPY",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Pix,
    CreditCard,
    DebitCard,
    BankTransfer,
}

string_enum!(PaymentMethod, "payment method" {
    Pix => "PIX",
    CreditCard => "CREDIT_CARD",
    DebitCard => "DEBIT_CARD",
    BankTransfer => "BANK_TRANSFER",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecurrenceType {
    #[default]
    Once,
    Monthly,
    Yearly,
}

string_enum!(RecurrenceType, "recurrence type" {
    Once => "ONCE",
    Monthly => "MONTHLY",
    Yearly => "YEARLY",
});

/// A payment record as persisted by a [`PaymentStore`](super::ports::PaymentStore).
///
/// Fields are public for the stores and adapters that read them; state
/// changes go through the transition methods in `domain::lifecycle`, which
/// the engine calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    /// Caller-facing identifier, unique and never reassigned.
    pub transaction_id: String,
    pub amount: Amount,
    pub currency: Currency,
    pub payment_method: PaymentMethod,
    pub status: PaymentStatus,
    pub recurrence_type: RecurrenceType,
    pub is_fraudulent: bool,
    pub fraud_reason: Option<String>,
    pub payer_id: String,
    pub payee_id: String,
    pub description: Option<String>,
    /// Stored in its own table; only populated when hydrated by the engine.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
    pub refunded_amount: Balance,
    pub payment_gateway_id: Option<String>,
    pub payment_date: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency token, bumped by the store on every write.
    pub version: u64,
}

/// A request to create a payment. Every field the validation routine checks
/// is optional so that "absent" is representable and rejected explicitly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewPayment {
    pub amount: Option<Decimal>,
    pub currency: Option<Currency>,
    pub payment_method: Option<PaymentMethod>,
    pub payer_id: Option<String>,
    pub payee_id: Option<String>,
    pub description: Option<String>,
    pub recurrence_type: Option<RecurrenceType>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl NewPayment {
    pub fn new(
        amount: Decimal,
        currency: Currency,
        payment_method: PaymentMethod,
        payer_id: impl Into<String>,
        payee_id: impl Into<String>,
    ) -> Self {
        Self {
            amount: Some(amount),
            currency: Some(currency),
            payment_method: Some(payment_method),
            payer_id: Some(payer_id.into()),
            payee_id: Some(payee_id.into()),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_recurrence(mut self, recurrence_type: RecurrenceType) -> Self {
        self.recurrence_type = Some(recurrence_type);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Validates the request and builds the initial `PENDING` record.
    ///
    /// The returned payment carries [`PaymentId::UNASSIGNED`]; the store
    /// assigns the real id on insert.
    pub fn into_payment(self, transaction_id: String, now: DateTime<Utc>) -> Result<Payment> {
        let details = validate_payment_details(
            self.amount,
            self.currency,
            self.payment_method,
            self.payer_id.as_deref(),
            self.payee_id.as_deref(),
        )?;

        Ok(Payment {
            id: PaymentId::UNASSIGNED,
            transaction_id,
            amount: details.amount,
            currency: details.currency,
            payment_method: details.payment_method,
            status: PaymentStatus::Pending,
            recurrence_type: self.recurrence_type.unwrap_or_default(),
            is_fraudulent: false,
            fraud_reason: None,
            payer_id: details.payer_id,
            payee_id: details.payee_id,
            description: self.description,
            metadata: self.metadata,
            refunded_amount: Balance::ZERO,
            payment_gateway_id: None,
            payment_date: None,
            cancellation_reason: None,
            retry_count: 0,
            created_at: now,
            updated_at: now,
            version: 0,
        })
    }
}

/// The checked subset of a creation request.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentDetails {
    pub amount: Amount,
    pub currency: Currency,
    pub payment_method: PaymentMethod,
    pub payer_id: String,
    pub payee_id: String,
}

/// Shared validation routine for creation and any other entry point that
/// accepts payment details.
pub fn validate_payment_details(
    amount: Option<Decimal>,
    currency: Option<Currency>,
    payment_method: Option<PaymentMethod>,
    payer_id: Option<&str>,
    payee_id: Option<&str>,
) -> Result<PaymentDetails> {
    let amount = amount
        .ok_or_else(|| PaymentError::ValidationError("Payment amount is required".to_string()))
        .and_then(Amount::new)?;
    let currency = currency
        .ok_or_else(|| PaymentError::ValidationError("Currency is required".to_string()))?;
    let payment_method = payment_method
        .ok_or_else(|| PaymentError::ValidationError("Payment method is required".to_string()))?;
    let payer_id = non_blank(payer_id, "Payer ID")?;
    let payee_id = non_blank(payee_id, "Payee ID")?;

    Ok(PaymentDetails {
        amount,
        currency,
        payment_method,
        payer_id,
        payee_id,
    })
}

fn non_blank(value: Option<&str>, field: &str) -> Result<String> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(PaymentError::ValidationError(format!("{field} is required"))),
    }
}
