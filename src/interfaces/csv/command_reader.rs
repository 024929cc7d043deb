use crate::domain::payment::{Currency, NewPayment, PaymentMethod, PaymentStatus};
use crate::error::{PaymentError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Op {
    Create,
    Status,
    Complete,
    Cancel,
    Refund,
    Retry,
    Fraud,
    Delete,
}

/// One CSV row, before the per-operation field checks.
///
/// Header: `op, ref, amount, currency, method, payer, payee, status, reason, score, actor`.
/// Decimal columns stay text here; going through serde would round them via `f64`.
#[derive(Debug, Deserialize)]
struct CommandRecord {
    op: Op,
    #[serde(rename = "ref")]
    reference: String,
    amount: Option<String>,
    currency: Option<String>,
    method: Option<String>,
    payer: Option<String>,
    payee: Option<String>,
    status: Option<String>,
    reason: Option<String>,
    score: Option<String>,
    actor: Option<String>,
}

/// A lifecycle operation addressed to a payment by caller alias.
///
/// `create` binds the alias; later rows resolve it to the payment's id or
/// transaction id as the operation requires.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Create {
        reference: String,
        request: NewPayment,
    },
    UpdateStatus {
        reference: String,
        status: PaymentStatus,
    },
    Complete {
        reference: String,
        gateway_id: Option<String>,
    },
    Cancel {
        reference: String,
        reason: String,
    },
    Refund {
        reference: String,
        amount: Decimal,
    },
    Retry {
        reference: String,
    },
    FlagFraudulent {
        reference: String,
        reason: String,
        risk_score: Decimal,
        flagged_by: String,
    },
    Delete {
        reference: String,
    },
}

impl Command {
    pub fn reference(&self) -> &str {
        match self {
            Command::Create { reference, .. }
            | Command::UpdateStatus { reference, .. }
            | Command::Complete { reference, .. }
            | Command::Cancel { reference, .. }
            | Command::Refund { reference, .. }
            | Command::Retry { reference }
            | Command::FlagFraudulent { reference, .. }
            | Command::Delete { reference } => reference,
        }
    }
}

fn required<T>(value: Option<T>, column: &str, op: Op) -> Result<T> {
    value.ok_or_else(|| {
        PaymentError::ValidationError(format!("column '{column}' is required for {op:?}"))
    })
}

fn decimal(value: Option<String>, column: &str) -> Result<Option<Decimal>> {
    value
        .map(|raw| {
            Decimal::from_str(&raw).map_err(|_| {
                PaymentError::ValidationError(format!("column '{column}' is not a decimal: {raw}"))
            })
        })
        .transpose()
}

impl TryFrom<CommandRecord> for Command {
    type Error = PaymentError;

    fn try_from(record: CommandRecord) -> Result<Self> {
        let reference = record.reference;
        let op = record.op;
        let amount = decimal(record.amount, "amount")?;
        let score = decimal(record.score, "score")?;
        let command = match op {
            Op::Create => {
                // Absent details are passed through so that the engine's
                // validation routine reports them.
                let request = NewPayment {
                    amount,
                    currency: record.currency.as_deref().map(str::parse::<Currency>).transpose()?,
                    payment_method: record
                        .method
                        .as_deref()
                        .map(str::parse::<PaymentMethod>)
                        .transpose()?,
                    payer_id: record.payer,
                    payee_id: record.payee,
                    description: record.reason,
                    ..Default::default()
                };
                Command::Create { reference, request }
            }
            Op::Status => Command::UpdateStatus {
                reference,
                status: required(record.status, "status", op)?.parse()?,
            },
            Op::Complete => Command::Complete {
                reference,
                gateway_id: record.actor,
            },
            Op::Cancel => Command::Cancel {
                reference,
                reason: required(record.reason, "reason", op)?,
            },
            Op::Refund => Command::Refund {
                reference,
                amount: required(amount, "amount", op)?,
            },
            Op::Retry => Command::Retry { reference },
            Op::Fraud => Command::FlagFraudulent {
                reference,
                reason: required(record.reason, "reason", op)?,
                risk_score: required(score, "score", op)?,
                flagged_by: required(record.actor, "actor", op)?,
            },
            Op::Delete => Command::Delete { reference },
        };
        Ok(command)
    }
}

/// Reads lifecycle commands from a CSV source.
///
/// Whitespace is trimmed and trailing columns may be omitted.
pub struct CommandReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CommandReader<R> {
    /// Creates a new `CommandReader` from any `Read` source (e.g., File, Stdin).
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Returns an iterator that lazily reads and checks commands, one per row.
    pub fn commands(self) -> impl Iterator<Item = Result<Command>> {
        self.reader
            .into_deserialize::<CommandRecord>()
            .map(|result| result.map_err(PaymentError::from).and_then(Command::try_from))
    }
}
