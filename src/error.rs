//! # JeeNet Error Handling
//!
//! This module defines the JeeNetError enum, which represents the different
//! error types that can occur in the jeenet-rs crate.

use thiserror::Error;

/// Represents the different error types that can occur in the JeeNet gateway.
#[derive(Debug, Error)]
pub enum JeeNetError {
    /// Indicates a frame that could not be decoded: truncated header or a
    /// length-prefixed field overrunning the payload.
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Indicates a field schema declaring the same flag bit twice.
    #[error("Duplicate flag bit 0x{0:02X} in schema")]
    DuplicateBit(u8),

    /// Indicates a field schema claiming a protocol-reserved flag bit.
    #[error("Reserved flag bit 0x{0:02X} used by schema field")]
    ReservedBit(u8),

    /// Indicates a flag bit that is zero or not a power of two.
    #[error("Invalid flag bit 0x{0:02X}")]
    InvalidBit(u8),

    /// Indicates an unsupported fixed-integer wire width.
    #[error("Unsupported field width: {0}")]
    InvalidWidth(u8),

    /// Indicates a command name not in the device's capability set.
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// Indicates a command argument outside the field's declared domain.
    #[error("Invalid argument for field {field}: {why}")]
    InvalidArgument { field: String, why: String },

    /// Indicates an unregistered node announcing an unrecognized type string.
    #[error("Unknown device type: {0}")]
    UnknownDeviceType(String),

    /// Indicates an error on the underlying radio link.
    #[error("Link error: {0}")]
    LinkError(String),

    /// Indicates a failed firmware update: CRC mismatch, erase not
    /// acknowledged, or a chunk exhausting its retry budget.
    #[error("Flash integrity error: {0}")]
    FlashIntegrity(String),

    /// Indicates the gateway is shutting down.
    #[error("Gateway shutting down")]
    Shutdown,
}
