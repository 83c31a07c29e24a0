//! Mock radio link for testing.
//!
//! This module provides a mock link that can be used to test the transport,
//! scheduler, monitor, and flash layers without actual radio hardware. Tests
//! inject inbound frames, observe outbound ones, and can enable automatic
//! delivery acks.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

use crate::codec::{encode_raw_frame, split_frame};
use crate::constants::ACK_FLAG;
use crate::error::JeeNetError;
use crate::link::RadioLink;

/// Mock link that simulates the radio board.
pub struct MockLink {
    /// Frames written to the link (outgoing).
    sent: Mutex<Vec<Vec<u8>>>,
    /// Mirror of outgoing frames, for tests that want to await them.
    outbound_tx: mpsc::UnboundedSender<Vec<u8>>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
    /// Frames queued for the reader (incoming).
    inbound_tx: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    /// When set, every ack-requested frame is answered with a bare ack.
    auto_ack: AtomicBool,
}

impl MockLink {
    pub fn new() -> MockLink {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        MockLink {
            sent: Mutex::new(Vec::new()),
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            inbound_tx: Mutex::new(Some(inbound_tx)),
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            auto_ack: AtomicBool::new(false),
        }
    }

    /// Queues a frame for the reader to pick up.
    pub fn inject(&self, raw: Vec<u8>) {
        if let Some(tx) = self.inbound_tx.lock().unwrap().as_ref() {
            let _ = tx.send(raw);
        }
    }

    /// Snapshot of every frame written so far.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// Takes the outbound mirror channel. Single consumer.
    pub fn outbound(&self) -> mpsc::UnboundedReceiver<Vec<u8>> {
        self.outbound_rx
            .lock()
            .unwrap()
            .take()
            .expect("outbound channel already taken")
    }

    pub fn set_auto_ack(&self, enabled: bool) {
        self.auto_ack.store(enabled, Ordering::SeqCst);
    }
}

impl Default for MockLink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RadioLink for MockLink {
    async fn send_raw(&self, raw: &[u8]) -> Result<(), JeeNetError> {
        self.sent.lock().unwrap().push(raw.to_vec());
        let _ = self.outbound_tx.send(raw.to_vec());

        if self.auto_ack.load(Ordering::SeqCst) {
            if let Ok((header, _)) = split_frame(raw) {
                if header.flags & ACK_FLAG != 0 {
                    self.inject(encode_raw_frame(
                        header.message_id,
                        header.destination,
                        ACK_FLAG,
                        &[],
                    ));
                }
            }
        }
        Ok(())
    }

    async fn recv_raw(&self) -> Result<Vec<u8>, JeeNetError> {
        self.inbound_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(JeeNetError::Shutdown)
    }

    async fn close(&self) -> Result<(), JeeNetError> {
        // Dropping the sender ends the inbound stream.
        self.inbound_tx.lock().unwrap().take();
        Ok(())
    }
}
