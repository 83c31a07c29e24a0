//! # Serial Radio Link
//!
//! Connects to the radio gateway board over a serial port and shuttles
//! length-prefixed frames across it.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio_serial::SerialPortBuilderExt;

use crate::error::JeeNetError;
use crate::link::RadioLink;

/// Configuration for the serial connection to the radio board.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub baudrate: u32,
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        SerialConfig {
            baudrate: 57600,
            timeout: Duration::from_secs(5),
        }
    }
}

/// Serial link to the radio board.
pub struct SerialLink {
    reader: Mutex<ReadHalf<tokio_serial::SerialStream>>,
    writer: Mutex<WriteHalf<tokio_serial::SerialStream>>,
    closed: AtomicBool,
}

impl SerialLink {
    /// Opens the port with default settings.
    pub async fn connect(port_name: &str) -> Result<SerialLink, JeeNetError> {
        Self::connect_with_config(port_name, SerialConfig::default()).await
    }

    /// Opens the port with custom settings (8N1 framing throughout).
    pub async fn connect_with_config(
        port_name: &str,
        config: SerialConfig,
    ) -> Result<SerialLink, JeeNetError> {
        let port = tokio_serial::new(port_name, config.baudrate)
            .data_bits(tokio_serial::DataBits::Eight)
            .stop_bits(tokio_serial::StopBits::One)
            .parity(tokio_serial::Parity::None)
            .timeout(config.timeout)
            .open_native_async()
            .map_err(|e| JeeNetError::LinkError(e.to_string()))?;
        let (reader, writer) = tokio::io::split(port);
        Ok(SerialLink {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl RadioLink for SerialLink {
    async fn send_raw(&self, raw: &[u8]) -> Result<(), JeeNetError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(JeeNetError::Shutdown);
        }
        if raw.len() > u8::MAX as usize {
            return Err(JeeNetError::LinkError(format!(
                "frame of {} bytes exceeds length prefix",
                raw.len()
            )));
        }
        let mut writer = self.writer.lock().await;
        writer
            .write_all(&[raw.len() as u8])
            .await
            .map_err(|e| JeeNetError::LinkError(e.to_string()))?;
        writer
            .write_all(raw)
            .await
            .map_err(|e| JeeNetError::LinkError(e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| JeeNetError::LinkError(e.to_string()))
    }

    async fn recv_raw(&self) -> Result<Vec<u8>, JeeNetError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(JeeNetError::Shutdown);
        }
        let mut reader = self.reader.lock().await;
        let mut len = [0u8; 1];
        reader
            .read_exact(&mut len)
            .await
            .map_err(|e| JeeNetError::LinkError(e.to_string()))?;
        let mut frame = vec![0u8; len[0] as usize];
        reader
            .read_exact(&mut frame)
            .await
            .map_err(|e| JeeNetError::LinkError(e.to_string()))?;
        Ok(frame)
    }

    async fn close(&self) -> Result<(), JeeNetError> {
        // The flag fails subsequent calls; a read already parked in
        // read_exact is not interrupted. The gateway reader selects on its
        // shutdown signal, per the RadioLink contract.
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
