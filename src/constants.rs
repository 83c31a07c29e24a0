//! Protocol constants shared across the crate: header layout, reserved flag
//! bits, flash sub-protocol opcodes, and process-level defaults.

/// Fixed frame header size in bytes: `message_id`, `destination`, `flags`.
pub const HEADER_SIZE: usize = 3;

/// Flags bit 0: ack requested on outbound frames, ack reply on inbound ones.
pub const ACK_FLAG: u8 = 1 << 0;

/// Flags bit 6: payload belongs to the flash sub-protocol, not the device
/// field schema.
pub const FLASH_FLAG: u8 = 1 << 6;

/// Flags bit 7: trailing length-prefixed text field is present.
pub const TEXT_FLAG: u8 = 1 << 7;

// Flash sub-protocol opcodes, one byte at the start of the payload when
// FLASH_FLAG is set.
pub const FLASH_INFO_REQ: u8 = 1;
pub const FLASH_INFO: u8 = 2;
pub const FLASH_CLEAR: u8 = 3;
pub const FLASH_CLEARED: u8 = 4;
pub const FLASH_WRITE: u8 = 5;
pub const FLASH_WRITTEN: u8 = 6;
pub const FLASH_CRC_REQ: u8 = 7;
pub const FLASH_CRC: u8 = 8;
pub const FLASH_READ_REQ: u8 = 9;
pub const FLASH_READ: u8 = 10;
pub const FLASH_REBOOT: u8 = 11;

/// Firmware image chunk size for flash writes.
pub const FLASH_CHUNK_SIZE: usize = 64;

/// Node id the gateway itself answers to on the radio network.
pub const GATEWAY_NODE_ID: u8 = 31;

/// Serial device candidates tried in order when no path is given.
pub const DEFAULT_DEVICE_PATHS: &[&str] = &["/dev/arduino", "/dev/ttyACM0"];

/// Diagnostic topic for frames from unrecognized device types.
pub const TOPIC_UNKNOWN: &str = "gateway/unknown";

/// Topic carrying node up/down liveness transitions.
pub const TOPIC_MONITOR: &str = "gateway/monitor";

/// Topic prefix for decoded device events (`node/<name>`).
pub const TOPIC_NODE_PREFIX: &str = "node";

/// Topic prefix the gateway subscribes to for inbound commands (`cmd/<name>`).
pub const TOPIC_CMD_PREFIX: &str = "cmd";
