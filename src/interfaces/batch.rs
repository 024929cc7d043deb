use super::csv::command_reader::Command;
use crate::application::engine::PaymentEngine;
use crate::domain::payment::PaymentId;
use crate::error::{PaymentError, Result};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone)]
struct Binding {
    id: PaymentId,
    transaction_id: String,
}

/// Replays [`Command`]s against a [`PaymentEngine`], keeping the alias
/// table that maps a command's `ref` to the payment it created.
pub struct BatchRunner {
    engine: PaymentEngine,
    aliases: HashMap<String, Binding>,
}

impl BatchRunner {
    pub fn new(engine: PaymentEngine) -> Self {
        Self {
            engine,
            aliases: HashMap::new(),
        }
    }

    pub fn engine(&self) -> &PaymentEngine {
        &self.engine
    }

    fn resolve(&self, reference: &str) -> Result<&Binding> {
        self.aliases.get(reference).ok_or_else(|| {
            PaymentError::NotFound(format!("No payment created under ref '{reference}'"))
        })
    }

    /// Applies one command. Errors leave the alias table untouched.
    pub async fn apply(&mut self, command: Command) -> Result<()> {
        debug!(reference = command.reference(), "applying command");
        match command {
            Command::Create { reference, request } => {
                if self.aliases.contains_key(&reference) {
                    return Err(PaymentError::ValidationError(format!(
                        "ref '{reference}' is already bound"
                    )));
                }
                let payment = self.engine.create_payment(request).await?;
                self.aliases.insert(
                    reference,
                    Binding {
                        id: payment.id,
                        transaction_id: payment.transaction_id,
                    },
                );
            }
            Command::UpdateStatus { reference, status } => {
                let tx = &self.resolve(&reference)?.transaction_id;
                self.engine.update_status(tx, status).await?;
            }
            Command::Complete {
                reference,
                gateway_id,
            } => {
                let tx = &self.resolve(&reference)?.transaction_id;
                self.engine.complete_payment(tx, gateway_id).await?;
            }
            Command::Cancel { reference, reason } => {
                let tx = &self.resolve(&reference)?.transaction_id;
                self.engine.cancel_payment(tx, &reason).await?;
            }
            Command::Refund { reference, amount } => {
                let tx = &self.resolve(&reference)?.transaction_id;
                self.engine.process_refund(tx, amount).await?;
            }
            Command::Retry { reference } => {
                let id = self.resolve(&reference)?.id;
                self.engine.retry_payment(id).await?;
            }
            Command::FlagFraudulent {
                reference,
                reason,
                risk_score,
                flagged_by,
            } => {
                let tx = &self.resolve(&reference)?.transaction_id;
                self.engine
                    .flag_fraudulent(tx, &reason, risk_score, &flagged_by)
                    .await?;
            }
            Command::Delete { reference } => {
                let id = self.resolve(&reference)?.id;
                self.engine.delete_payment(id).await?;
                self.aliases.remove(&reference);
            }
        }
        Ok(())
    }
}
