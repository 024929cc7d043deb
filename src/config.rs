use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_EVENTS_TOPIC: &str = "payment-events";

/// Tunables of the [`PaymentEngine`](crate::application::engine::PaymentEngine).
///
/// The retry bound is not one of them: it is fixed at
/// [`MAX_RETRY_ATTEMPTS`](crate::domain::lifecycle::MAX_RETRY_ATTEMPTS).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Expiry applied to cached statuses; `None` keeps them until overwritten.
    pub status_ttl: Option<Duration>,
    /// Actor stamped on refund records.
    pub refund_actor: String,
    pub refund_reason: String,
    /// Read-validate-write rounds attempted when a concurrent writer wins.
    pub max_write_attempts: u32,
    pub events_topic: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            status_ttl: None,
            refund_actor: "system".to_string(),
            refund_reason: "Refund processed successfully".to_string(),
            max_write_attempts: 5,
            events_topic: DEFAULT_EVENTS_TOPIC.to_string(),
        }
    }
}

impl EngineConfig {
    pub fn with_status_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.status_ttl = ttl;
        self
    }
}
