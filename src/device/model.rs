//! Per-device-type descriptions: receive schema, command set, poll cadence,
//! and capabilities. A [`DeviceModel`] is static configuration shared by
//! every instance of one physical node type; it never holds per-node state.

use std::collections::HashMap;
use std::time::Duration;

use crate::codec::{decode_fields, decode_frame, FieldSpec, FrameHeader, Schema, Value};
use crate::error::JeeNetError;

/// Allowed value domain of one command field, checked before encoding.
/// Out-of-domain arguments are rejected, never clamped.
#[derive(Debug, Clone)]
pub enum Domain {
    Any,
    OneOf(Vec<u64>),
    Range { min: u64, max: u64 },
}

impl Domain {
    fn check(&self, field: &str, value: &Value) -> Result<(), JeeNetError> {
        let out = |why: String| JeeNetError::InvalidArgument {
            field: field.to_string(),
            why,
        };
        match self {
            Domain::Any => Ok(()),
            Domain::OneOf(allowed) => {
                let v = value
                    .as_u64()
                    .ok_or_else(|| out("expected an unsigned integer".into()))?;
                if allowed.contains(&v) {
                    Ok(())
                } else {
                    Err(out(format!("{v} not in {allowed:?}")))
                }
            }
            Domain::Range { min, max } => {
                let v = value
                    .as_u64()
                    .ok_or_else(|| out("expected an unsigned integer".into()))?;
                if (*min..=*max).contains(&v) {
                    Ok(())
                } else {
                    Err(out(format!("{v} outside {min}..={max}")))
                }
            }
        }
    }
}

/// One command a device type accepts: its own field schema (independent of
/// the receive schema), per-field domains, and whether delivery is acked.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub name: String,
    pub schema: Schema,
    pub domains: HashMap<String, Domain>,
    pub ack: bool,
}

impl CommandSpec {
    pub fn new(
        name: &str,
        fields: Vec<(FieldSpec, Domain)>,
        ack: bool,
    ) -> Result<CommandSpec, JeeNetError> {
        let mut domains = HashMap::new();
        let mut specs = Vec::with_capacity(fields.len());
        for (spec, domain) in fields {
            domains.insert(spec.name.clone(), domain);
            specs.push(spec);
        }
        Ok(CommandSpec {
            name: name.to_string(),
            schema: Schema::new(specs)?,
            domains,
            ack,
        })
    }
}

/// A validated, encodable command ready for the transport.
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub ack_requested: bool,
    pub schema: Schema,
    pub values: Vec<(String, Value)>,
}

/// A decoded inbound event: field name to value, plus the frame bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct EventInfo {
    pub message_id: u8,
    pub flags: u8,
    pub fields: Vec<(String, Value)>,
}

impl EventInfo {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }
}

/// Static description of one device type.
#[derive(Debug, Clone)]
pub struct DeviceModel {
    /// The type string the node announces, e.g. `"Relay Device v1.0"`.
    pub type_name: String,
    pub rx_schema: Schema,
    pub commands: HashMap<String, CommandSpec>,
    /// `None` means the device is never proactively polled.
    pub poll_period: Option<Duration>,
    /// Whether the node speaks the flash firmware-update sub-protocol.
    pub flash_capable: bool,
}

impl DeviceModel {
    pub fn new(
        type_name: &str,
        rx_schema: Schema,
        commands: Vec<CommandSpec>,
        poll_period: Option<Duration>,
        flash_capable: bool,
    ) -> DeviceModel {
        DeviceModel {
            type_name: type_name.to_string(),
            rx_schema,
            commands: commands.into_iter().map(|c| (c.name.clone(), c)).collect(),
            poll_period,
            flash_capable,
        }
    }

    /// Command names this device type accepts.
    pub fn capabilities(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(|s| s.as_str())
    }

    /// Decodes an inbound frame against the receive schema, scale transforms
    /// included. Absent optional fields are absent from the result.
    pub fn decode_event(&self, raw: &[u8]) -> Result<EventInfo, JeeNetError> {
        let frame = decode_frame(raw, &self.rx_schema)?;
        Ok(EventInfo {
            message_id: frame.message_id,
            flags: frame.flags,
            fields: frame.fields,
        })
    }

    /// Decodes the payload of an already-split frame against the receive
    /// schema. The dispatcher uses this after routing on the header alone.
    pub fn decode_event_raw(
        &self,
        header: &FrameHeader,
        payload: &[u8],
    ) -> Result<Vec<(String, Value)>, JeeNetError> {
        decode_fields(header.flags, payload, &self.rx_schema)
    }

    /// Validates command arguments against the declared domains and returns
    /// the encodable request. No wire traffic happens here.
    pub fn build_command(
        &self,
        name: &str,
        args: &[(String, Value)],
    ) -> Result<CommandRequest, JeeNetError> {
        let spec = self
            .commands
            .get(name)
            .ok_or_else(|| JeeNetError::UnknownCommand(name.to_string()))?;

        for (field, value) in args {
            if spec.schema.field(field).is_none() {
                return Err(JeeNetError::InvalidArgument {
                    field: field.clone(),
                    why: format!("not a field of command {name}"),
                });
            }
            if let Some(domain) = spec.domains.get(field) {
                domain.check(field, value)?;
            }
        }

        Ok(CommandRequest {
            ack_requested: spec.ack,
            schema: spec.schema.clone(),
            values: args.to_vec(),
        })
    }
}
