//! # jeenet-rs - A Rust Gateway for JeeNode Radio Networks
//!
//! The jeenet-rs crate bridges a network of battery-operated JeeNode
//! sensor/actuator nodes, reached over a custom low-power radio protocol,
//! to a general pub/sub event bus.
//!
//! ## Features
//!
//! - Decode and encode the flag-driven binary frame format the nodes speak
//! - Describe each physical node type with its own field schema, polling
//!   cadence, and command set
//! - Reliable delivery over the best-effort radio link: per-message acks,
//!   retries with configurable backoff, delivery outcomes instead of faults
//! - Periodic polling of devices that want it, passive liveness monitoring
//!   of every node
//! - Firmware updates over the air via the flash sub-protocol
//! - Publish decoded events, diagnostics, and liveness transitions to any
//!   broker implementing the small [`bus::EventBus`] contract
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use jeenet_rs::{connect, Gateway, GatewayConfig, MemoryBus, Registry};
//!
//! # async fn demo() -> Result<(), jeenet_rs::JeeNetError> {
//! let link = Arc::new(connect("/dev/ttyACM0").await?);
//! let bus = Arc::new(MemoryBus::new());
//! let gateway = Gateway::start(link, Registry::with_builtin(), bus, GatewayConfig::default()).await;
//! // ... gateway.shutdown().await on exit
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod codec;
pub mod constants;
pub mod device;
pub mod error;
pub mod flash;
pub mod gateway;
pub mod link;
pub mod logging;
pub mod monitor;
pub mod scheduler;
pub mod transport;

pub use crate::error::JeeNetError;
pub use crate::logging::{init_logger, log_info};

// Core frame and schema types
pub use codec::{
    decode_frame, encode_frame, split_frame, FieldSpec, Frame, FrameHeader, Schema, Value,
};

// Device layer
pub use device::{CommandSpec, DeviceModel, Dispatcher, Domain, EventInfo, Registry};

// Transport and the periodic machinery
pub use monitor::{Monitor, MonitorConfig};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use transport::{Backoff, SendOutcome, Transport, TransportConfig};

// Firmware updates
pub use flash::{FlashProtocol, FlashState};

// Bus contract and wiring
pub use bus::{BusMessage, EventBus, MemoryBus};
pub use gateway::{Gateway, GatewayConfig};
pub use link::{MockLink, RadioLink, SerialConfig, SerialLink};

/// Connect to the radio board via serial port.
///
/// # Arguments
/// * `port` - Serial port path (e.g., "/dev/ttyACM0" on Linux)
///
/// # Returns
/// * `Ok(SerialLink)` - Connected link for the gateway
/// * `Err(JeeNetError)` - Connection failed
pub async fn connect(port: &str) -> Result<SerialLink, JeeNetError> {
    SerialLink::connect(port).await
}

/// Connect with custom serial settings.
pub async fn connect_with_config(
    port: &str,
    config: SerialConfig,
) -> Result<SerialLink, JeeNetError> {
    SerialLink::connect_with_config(port, config).await
}
