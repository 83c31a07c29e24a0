//! # Flash Firmware-Update Sub-Protocol
//!
//! A second command namespace multiplexed onto the normal framing: when
//! `FLASH_FLAG` is set, the payload is a one-byte opcode plus a
//! little-endian body instead of schema fields. Every request rides the
//! transport's ack/retry path; the matching response frame carries the
//! opcode one past the request's.
//!
//! One update walks `Idle → InfoRequested → Cleared → Writing → CrcVerified
//! → Rebooted`, dropping to `Failed` on retry exhaustion, a missing erase
//! acknowledgment, or a CRC mismatch. The image goes out in fixed-size
//! chunks, one in flight at a time; a failed chunk fails the whole update
//! without retransmitting earlier chunks. Responses that do not belong to
//! the current step are logged and ignored. Updates to different nodes may
//! run concurrently, each on its own `FlashProtocol` value.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crc::{Crc, CRC_16_XMODEM};

use crate::codec::FrameHeader;
use crate::constants::{
    FLASH_CHUNK_SIZE, FLASH_CLEAR, FLASH_CLEARED, FLASH_CRC, FLASH_CRC_REQ, FLASH_FLAG,
    FLASH_INFO, FLASH_INFO_REQ, FLASH_READ, FLASH_READ_REQ, FLASH_REBOOT, FLASH_WRITE,
    FLASH_WRITTEN,
};
use crate::device::Dispatcher;
use crate::error::JeeNetError;
use crate::logging::{log_debug, log_info, log_warn};
use crate::transport::{SendOutcome, Transport};

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Computes the CRC the device side is expected to report for a byte range.
pub fn image_crc(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}

/// Update progress states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashState {
    Idle,
    InfoRequested,
    Cleared,
    Writing,
    CrcVerified,
    Rebooted,
    Failed,
}

/// Target memory metadata from an INFO response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashInfo {
    pub size: u32,
}

/// One in-progress (or completed) firmware update for a single node.
pub struct FlashProtocol {
    transport: Arc<Transport>,
    dispatcher: Arc<Dispatcher>,
    node: u8,
    responses: mpsc::UnboundedReceiver<(FrameHeader, Vec<u8>)>,
    state: FlashState,
    /// How long to wait for the content response after the delivery ack.
    pub response_timeout: Duration,
    pub chunk_size: usize,
}

impl FlashProtocol {
    /// Registers the flash route for `node` and returns the protocol handle.
    /// The route is released when the handle drops.
    pub fn new(transport: Arc<Transport>, dispatcher: Arc<Dispatcher>, node: u8) -> FlashProtocol {
        let responses = dispatcher.register_flash(node);
        FlashProtocol {
            transport,
            dispatcher,
            node,
            responses,
            state: FlashState::Idle,
            response_timeout: Duration::from_secs(2),
            chunk_size: FLASH_CHUNK_SIZE,
        }
    }

    pub fn state(&self) -> FlashState {
        self.state
    }

    /// Runs a complete firmware update. Any failure leaves the state at
    /// `Failed`; the device's prior firmware is whatever the device itself
    /// guarantees beyond the CRC check performed here.
    pub async fn update(&mut self, base_addr: u32, image: &[u8]) -> Result<(), JeeNetError> {
        match self.run_update(base_addr, image).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.state = FlashState::Failed;
                Err(e)
            }
        }
    }

    async fn run_update(&mut self, base_addr: u32, image: &[u8]) -> Result<(), JeeNetError> {
        // CLEAR and CRC_REQ carry the region length in a u16; a longer image
        // would wrap the length and erase only a fraction of the region.
        if image.len() > u16::MAX as usize {
            return Err(JeeNetError::FlashIntegrity(format!(
                "image of {} bytes exceeds the {}-byte length field",
                image.len(),
                u16::MAX
            )));
        }

        self.state = FlashState::InfoRequested;
        let info = self.request_info().await?;
        log_info(&format!(
            "node {}: flash target reports {} bytes",
            self.node, info.size
        ));
        let end = base_addr as u64 + image.len() as u64;
        if end > info.size as u64 {
            return Err(JeeNetError::FlashIntegrity(format!(
                "image end 0x{end:X} exceeds flash size 0x{:X}",
                info.size
            )));
        }

        // Writing unerased flash is undefined on the device side; the erase
        // acknowledgment gates everything after it.
        self.clear(base_addr, image.len() as u16).await?;
        self.state = FlashState::Cleared;

        self.state = FlashState::Writing;
        let mut addr = base_addr;
        for chunk in image.chunks(self.chunk_size) {
            self.write(addr, chunk).await?;
            addr += chunk.len() as u32;
        }

        let reported = self.request_crc(base_addr, image.len() as u16).await?;
        let local = image_crc(image);
        if reported != local {
            return Err(JeeNetError::FlashIntegrity(format!(
                "CRC mismatch: device 0x{reported:04X}, local 0x{local:04X}"
            )));
        }
        self.state = FlashState::CrcVerified;

        self.reboot().await?;
        self.state = FlashState::Rebooted;
        Ok(())
    }

    /// INFO_REQ: fetches target memory metadata.
    pub async fn request_info(&mut self) -> Result<FlashInfo, JeeNetError> {
        let body = self.transact(&[FLASH_INFO_REQ], FLASH_INFO).await?;
        let size = read_u32(&body, "INFO size")?;
        Ok(FlashInfo { size })
    }

    /// CLEAR: erases `len` bytes at `addr`; the CLEARED acknowledgment is
    /// mandatory before any write.
    pub async fn clear(&mut self, addr: u32, len: u16) -> Result<(), JeeNetError> {
        let mut payload = vec![FLASH_CLEAR];
        payload.extend_from_slice(&addr.to_le_bytes());
        payload.extend_from_slice(&len.to_le_bytes());
        self.transact(&payload, FLASH_CLEARED).await?;
        Ok(())
    }

    /// WRITE: one chunk, advancing only on the WRITTEN acknowledgment.
    pub async fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), JeeNetError> {
        log_debug(&format!(
            "node {}: writing {} bytes at 0x{addr:X}",
            self.node,
            data.len()
        ));
        let mut payload = vec![FLASH_WRITE];
        payload.extend_from_slice(&addr.to_le_bytes());
        payload.extend_from_slice(&(data.len() as u16).to_le_bytes());
        payload.extend_from_slice(data);
        self.transact(&payload, FLASH_WRITTEN).await?;
        Ok(())
    }

    /// CRC_REQ: asks the device for the CRC of a written region.
    pub async fn request_crc(&mut self, addr: u32, len: u16) -> Result<u16, JeeNetError> {
        let mut payload = vec![FLASH_CRC_REQ];
        payload.extend_from_slice(&addr.to_le_bytes());
        payload.extend_from_slice(&len.to_le_bytes());
        let body = self.transact(&payload, FLASH_CRC).await?;
        read_u16(&body, "CRC value")
    }

    /// READ_REQ: reads back a region, for spot verification.
    pub async fn read(&mut self, addr: u32, len: u16) -> Result<Vec<u8>, JeeNetError> {
        let mut payload = vec![FLASH_READ_REQ];
        payload.extend_from_slice(&addr.to_le_bytes());
        payload.extend_from_slice(&len.to_le_bytes());
        self.transact(&payload, FLASH_READ).await
    }

    /// REBOOT: fire-and-forget; the device disappears and reappears, which
    /// the monitor observes as a dead-to-alive transition.
    pub async fn reboot(&mut self) -> Result<(), JeeNetError> {
        self.transport
            .send_raw_payload(self.node, false, FLASH_FLAG, &[FLASH_REBOOT])
            .await?;
        Ok(())
    }

    /// Sends one request through the ack/retry path, then waits for the
    /// expected response opcode. Off-step responses are logged and ignored.
    async fn transact(&mut self, payload: &[u8], expect: u8) -> Result<Vec<u8>, JeeNetError> {
        let (_, outcome) = self
            .transport
            .send_raw_payload(self.node, true, FLASH_FLAG, payload)
            .await?;
        match outcome {
            SendOutcome::Acked => {}
            SendOutcome::DeliveryFailed => {
                return Err(JeeNetError::FlashIntegrity(format!(
                    "node {}: delivery failed for opcode {}",
                    self.node, payload[0]
                )))
            }
            SendOutcome::Cancelled => return Err(JeeNetError::Shutdown),
            SendOutcome::Sent => unreachable!("acked send cannot report Sent"),
        }

        let deadline = tokio::time::Instant::now() + self.response_timeout;
        loop {
            let next = tokio::time::timeout_at(deadline, self.responses.recv()).await;
            let (_, body) = match next {
                Ok(Some(frame)) => frame,
                Ok(None) => return Err(JeeNetError::Shutdown),
                Err(_) => {
                    return Err(JeeNetError::FlashIntegrity(format!(
                        "node {}: timed out waiting for opcode {expect}",
                        self.node
                    )))
                }
            };
            match body.split_first() {
                Some((&opcode, rest)) if opcode == expect => return Ok(rest.to_vec()),
                Some((&opcode, _)) => {
                    log_warn(&format!(
                        "node {}: ignoring flash opcode {opcode} while waiting for {expect}",
                        self.node
                    ));
                }
                None => log_warn(&format!("node {}: empty flash response ignored", self.node)),
            }
        }
    }
}

impl Drop for FlashProtocol {
    fn drop(&mut self) {
        self.dispatcher.unregister_flash(self.node);
    }
}

fn read_u32(body: &[u8], what: &str) -> Result<u32, JeeNetError> {
    let bytes: [u8; 4] = body
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| JeeNetError::FlashIntegrity(format!("short {what} body")))?;
    Ok(u32::from_le_bytes(bytes))
}

fn read_u16(body: &[u8], what: &str) -> Result<u16, JeeNetError> {
    let bytes: [u8; 2] = body
        .get(..2)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| JeeNetError::FlashIntegrity(format!("short {what} body")))?;
    Ok(u16::from_le_bytes(bytes))
}
