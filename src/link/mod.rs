//! Radio link plumbing: the [`RadioLink`] seam the transport drives, a
//! serial implementation for the real radio board, and a mock for tests.
//!
//! Host and radio board exchange frames over the serial line with a one-byte
//! length prefix; the board handles the air-side framing itself.

pub mod mock;
pub mod serial;

use async_trait::async_trait;

use crate::error::JeeNetError;

/// One bidirectional frame pipe to the radio board.
#[async_trait]
pub trait RadioLink: Send + Sync {
    /// Writes one frame. Callers may invoke this concurrently.
    async fn send_raw(&self, raw: &[u8]) -> Result<(), JeeNetError>;

    /// Reads the next inbound frame. Fails with [`JeeNetError::Shutdown`]
    /// once the link is closed. Driven by a single reader task.
    async fn recv_raw(&self) -> Result<Vec<u8>, JeeNetError>;

    /// Closes the link; later calls fail with `Shutdown`. Releasing a reader
    /// already parked inside `recv_raw` is best-effort (the mock does, the
    /// serial port does not), so the reader task must race reads against its
    /// own shutdown signal rather than rely on it.
    async fn close(&self) -> Result<(), JeeNetError>;
}

pub use mock::MockLink;
pub use serial::{SerialConfig, SerialLink};
