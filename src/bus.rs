//! # Event Bus Contract
//!
//! The gateway core only needs publish-by-topic and subscribe-by-topic from
//! its broker; everything else about the broker is an external concern. This
//! module defines that contract as the [`EventBus`] trait plus a small
//! in-memory [`MemoryBus`] used by the gateway wiring and the test suite.
//!
//! Topic patterns are either an exact topic or a prefix followed by `/*`,
//! e.g. `cmd/*` matches every inbound command topic.

use async_trait::async_trait;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// One published message.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub payload: serde_json::Value,
}

/// The broker contract the gateway core depends on.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, topic: &str, payload: serde_json::Value);

    /// Subscribes to a topic pattern. Messages arrive on the returned
    /// channel; dropping the receiver ends the subscription.
    async fn subscribe(&self, pattern: &str) -> mpsc::UnboundedReceiver<BusMessage>;
}

/// Returns true when `topic` matches `pattern` (exact, or `prefix/*`).
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    match pattern.strip_suffix("/*") {
        Some(prefix) => topic
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/')),
        None => pattern == topic,
    }
}

/// In-process broker: unbounded mpsc fan-out with pattern matching.
#[derive(Default)]
pub struct MemoryBus {
    subscribers: Mutex<Vec<(String, mpsc::UnboundedSender<BusMessage>)>>,
}

impl MemoryBus {
    pub fn new() -> MemoryBus {
        MemoryBus::default()
    }
}

#[async_trait]
impl EventBus for MemoryBus {
    async fn publish(&self, topic: &str, payload: serde_json::Value) {
        let message = BusMessage {
            topic: topic.to_string(),
            payload,
        };
        let mut subscribers = self.subscribers.lock().unwrap();
        // Closed receivers drop out on their next matching publish.
        subscribers.retain(|(pattern, tx)| {
            if topic_matches(pattern, topic) {
                tx.send(message.clone()).is_ok()
            } else {
                !tx.is_closed()
            }
        });
    }

    async fn subscribe(&self, pattern: &str) -> mpsc::UnboundedReceiver<BusMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap()
            .push((pattern.to_string(), tx));
        rx
    }
}
