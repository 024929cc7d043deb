use crate::domain::ports::EventNotifier;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Writes each event to the log. Used when no subscriber is wired up.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

impl EventNotifier for LogNotifier {
    fn publish(&self, topic: &str, message: String) {
        info!(topic, %message, "payment event");
    }
}

/// Forwards `(topic, message)` pairs to an unbounded channel for an
/// in-process consumer.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<(String, String)>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(String, String)>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventNotifier for ChannelNotifier {
    fn publish(&self, topic: &str, message: String) {
        if self.sender.send((topic.to_string(), message)).is_err() {
            warn!(topic, "payment event dropped, no consumer listening");
        }
    }
}
