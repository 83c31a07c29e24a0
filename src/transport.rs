//! # Reliable Transport
//!
//! Owns message-id allocation and the ack/retry machinery that makes the
//! best-effort radio link behave like a request/response channel. A send
//! with `ack_requested` suspends only its caller: the waiter parks on a
//! oneshot channel keyed by message id, the link reader resolves it when a
//! matching ack frame arrives, and the send loop retransmits the identical
//! bytes on each per-attempt timeout until the retry budget runs out.
//!
//! Delivery failure is an outcome, not an error, and the transport never
//! touches liveness state; declaring nodes dead is the monitor's job alone.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use std::sync::Arc;
use tokio::sync::oneshot;

use crate::codec::{encode_frame, encode_raw_frame, Schema, Value};
use crate::constants::ACK_FLAG;
use crate::device::CommandRequest;
use crate::error::JeeNetError;
use crate::link::RadioLink;
use crate::logging::log_warn;

/// Retry policy between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed,
    Exponential { factor: u32 },
}

/// Ack/retry configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Total send attempts per acked message, including the first.
    pub retries: u32,
    /// Per-attempt ack timeout.
    pub ack_timeout: Duration,
    pub backoff: Backoff,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            retries: 3,
            ack_timeout: Duration::from_millis(500),
            backoff: Backoff::Fixed,
        }
    }
}

/// Terminal outcome of a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Fire-and-forget frame handed to the link.
    Sent,
    /// Matching ack received.
    Acked,
    /// Retry budget exhausted with no ack.
    DeliveryFailed,
    /// Gateway shut down while the send was pending.
    Cancelled,
}

struct PendingAck {
    node: u8,
    tx: oneshot::Sender<SendOutcome>,
}

/// The shared reliable-send layer. One per radio link.
pub struct Transport {
    link: Arc<dyn RadioLink>,
    config: TransportConfig,
    next_id: Mutex<u8>,
    pending: Mutex<HashMap<u8, PendingAck>>,
    shutting_down: AtomicBool,
}

impl Transport {
    pub fn new(link: Arc<dyn RadioLink>, config: TransportConfig) -> Arc<Transport> {
        Arc::new(Transport {
            link,
            config,
            next_id: Mutex::new(0),
            pending: Mutex::new(HashMap::new()),
            shutting_down: AtomicBool::new(false),
        })
    }

    /// Allocates the next message id from the wrapping per-transport
    /// counter, deferring ids that still have an ack pending so a wrap
    /// cannot collide with an outstanding send.
    pub fn allocate_id(&self) -> u8 {
        let mut next = self.next_id.lock().unwrap();
        let pending = self.pending.lock().unwrap();
        for _ in 0..=u8::MAX as usize {
            let id = *next;
            *next = next.wrapping_add(1);
            if !pending.contains_key(&id) {
                return id;
            }
        }
        // 256 simultaneous pending acks cannot happen with a sane retry
        // window, but hand out the counter value rather than spin.
        *next
    }

    /// Encodes and sends a schema-field frame. With `ack_requested` the call
    /// suspends until ack, retry exhaustion, or shutdown.
    pub async fn send_fields(
        &self,
        node: u8,
        ack_requested: bool,
        flags_base: u8,
        values: &[(String, Value)],
        schema: &Schema,
    ) -> Result<(u8, SendOutcome), JeeNetError> {
        let message_id = self.allocate_id();
        let flags = flags_base | if ack_requested { ACK_FLAG } else { 0 };
        let raw = encode_frame(message_id, node, flags, values, schema)?;
        let outcome = self.dispatch(node, message_id, ack_requested, raw).await?;
        Ok((message_id, outcome))
    }

    /// Sends a frame with an opaque payload (flash sub-protocol path).
    pub async fn send_raw_payload(
        &self,
        node: u8,
        ack_requested: bool,
        flags_base: u8,
        payload: &[u8],
    ) -> Result<(u8, SendOutcome), JeeNetError> {
        let message_id = self.allocate_id();
        let flags = flags_base | if ack_requested { ACK_FLAG } else { 0 };
        let raw = encode_raw_frame(message_id, node, flags, payload);
        let outcome = self.dispatch(node, message_id, ack_requested, raw).await?;
        Ok((message_id, outcome))
    }

    /// Sends a validated device command.
    pub async fn send_command(
        &self,
        node: u8,
        request: &CommandRequest,
    ) -> Result<(u8, SendOutcome), JeeNetError> {
        self.send_fields(
            node,
            request.ack_requested,
            0,
            &request.values,
            &request.schema,
        )
        .await
    }

    /// Sends an empty poll request, fire-and-forget; the node answers with
    /// its current readings.
    pub async fn poll(&self, node: u8) -> Result<(), JeeNetError> {
        self.send_raw_payload(node, false, 0, &[]).await?;
        Ok(())
    }

    async fn dispatch(
        &self,
        node: u8,
        message_id: u8,
        ack_requested: bool,
        raw: Vec<u8>,
    ) -> Result<SendOutcome, JeeNetError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Ok(SendOutcome::Cancelled);
        }
        if !ack_requested {
            self.link.send_raw(&raw).await?;
            return Ok(SendOutcome::Sent);
        }
        Ok(self.deliver(node, message_id, raw).await)
    }

    /// The ack/retry loop: up to `retries` transmissions of the identical
    /// bytes, each followed by a timeout wait on the pending-ack slot.
    async fn deliver(&self, node: u8, message_id: u8, raw: Vec<u8>) -> SendOutcome {
        let (tx, mut rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap()
            .insert(message_id, PendingAck { node, tx });

        let mut wait = self.config.ack_timeout;
        let attempts = self.config.retries.max(1);
        for attempt in 0..attempts {
            if let Err(e) = self.link.send_raw(&raw).await {
                log_warn(&format!(
                    "node {node}: send attempt {} failed: {e}",
                    attempt + 1
                ));
            }
            match tokio::time::timeout(wait, &mut rx).await {
                Ok(Ok(outcome)) => return outcome,
                // Sender dropped without a verdict; treat as cancellation.
                Ok(Err(_)) => return SendOutcome::Cancelled,
                Err(_) => {
                    if let Backoff::Exponential { factor } = self.config.backoff {
                        wait *= factor;
                    }
                }
            }
        }

        self.pending.lock().unwrap().remove(&message_id);
        SendOutcome::DeliveryFailed
    }

    /// Resolves a pending ack against an inbound ack frame. Returns true
    /// when exactly one waiter was released; duplicate or late acks return
    /// false and are otherwise ignored.
    pub fn resolve_ack(&self, node: u8, message_id: u8) -> bool {
        let pending = {
            let mut table = self.pending.lock().unwrap();
            match table.get(&message_id) {
                Some(p) if p.node == node => table.remove(&message_id),
                _ => None,
            }
        };
        match pending {
            Some(p) => {
                // A waiter that already timed out dropped its receiver;
                // the entry is gone either way.
                let _ = p.tx.send(SendOutcome::Acked);
                true
            }
            None => false,
        }
    }

    /// Number of sends still awaiting an ack.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Releases every pending waiter with [`SendOutcome::Cancelled`] and
    /// refuses new sends. Called before timers stop and the link closes so
    /// no caller is left blocked.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let drained: Vec<PendingAck> = {
            let mut table = self.pending.lock().unwrap();
            table.drain().map(|(_, p)| p).collect()
        };
        for p in drained {
            let _ = p.tx.send(SendOutcome::Cancelled);
        }
    }
}
