//! Field schemas for the flag-driven frame payload.
//!
//! Each optional payload field is declared by a [`FieldSpec`] tying one flag
//! bit to a name and a wire encoding. A [`Schema`] is the ordered set of
//! fields one device type can carry; encode and decode walk it in ascending
//! bit order so both ends agree on payload layout.

use crate::constants::ACK_FLAG;
use crate::error::JeeNetError;

/// Wire encoding of a single payload field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Little-endian integer of 1, 2 or 4 bytes.
    FixedInt { width: u8, signed: bool },
    /// One length byte followed by that many bytes.
    LengthPrefixedBytes,
}

/// Declares one optional payload field: its flag bit, name, encoding, and an
/// optional scale applied after decode (raw wire units to physical units).
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub bit: u8,
    pub name: String,
    pub encoding: Encoding,
    pub scale: Option<f64>,
}

impl FieldSpec {
    /// Unsigned integer field of the given wire width.
    pub fn uint(bit: u8, name: &str, width: u8) -> Self {
        FieldSpec {
            bit,
            name: name.to_string(),
            encoding: Encoding::FixedInt {
                width,
                signed: false,
            },
            scale: None,
        }
    }

    /// Signed integer field of the given wire width.
    pub fn int(bit: u8, name: &str, width: u8) -> Self {
        FieldSpec {
            bit,
            name: name.to_string(),
            encoding: Encoding::FixedInt {
                width,
                signed: true,
            },
            scale: None,
        }
    }

    /// Unsigned integer field decoded to `raw * scale` (e.g. 0.01 recovers
    /// a centi-degree reading as degrees).
    pub fn scaled(bit: u8, name: &str, width: u8, scale: f64) -> Self {
        FieldSpec {
            bit,
            name: name.to_string(),
            encoding: Encoding::FixedInt {
                width,
                signed: false,
            },
            scale: Some(scale),
        }
    }

    /// Length-prefixed text field.
    pub fn text(bit: u8, name: &str) -> Self {
        FieldSpec {
            bit,
            name: name.to_string(),
            encoding: Encoding::LengthPrefixedBytes,
            scale: None,
        }
    }
}

/// A decoded field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Uint(u64),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Uint(v) => Some(*v),
            Value::Int(v) if *v >= 0 => Some(*v as u64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Uint(v) => Some(*v as f64),
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Converts the value into a JSON value for event-bus payloads.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Uint(v) => serde_json::json!(v),
            Value::Int(v) => serde_json::json!(v),
            Value::Float(v) => serde_json::json!(v),
            Value::Text(s) => serde_json::json!(s),
            Value::Bytes(b) => serde_json::json!(hex::encode(b)),
        }
    }

    /// Builds a value from a JSON command argument. Integers map to
    /// `Uint`/`Int`, floats to `Float`, strings to `Text`.
    pub fn from_json(v: &serde_json::Value) -> Option<Value> {
        match v {
            serde_json::Value::Number(n) => {
                if let Some(u) = n.as_u64() {
                    Some(Value::Uint(u))
                } else if let Some(i) = n.as_i64() {
                    Some(Value::Int(i))
                } else {
                    n.as_f64().map(Value::Float)
                }
            }
            serde_json::Value::String(s) => Some(Value::Text(s.clone())),
            _ => None,
        }
    }
}

/// The ordered field set of one device type. Construction validates that no
/// two fields share a flag bit and that no field claims the reserved ack bit.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    fields: Vec<FieldSpec>,
}

impl Schema {
    pub fn new(mut fields: Vec<FieldSpec>) -> Result<Schema, JeeNetError> {
        let mut seen: u8 = 0;
        for f in &fields {
            if f.bit == 0 || !f.bit.is_power_of_two() {
                return Err(JeeNetError::InvalidBit(f.bit));
            }
            if f.bit & ACK_FLAG != 0 {
                return Err(JeeNetError::ReservedBit(f.bit));
            }
            if seen & f.bit != 0 {
                return Err(JeeNetError::DuplicateBit(f.bit));
            }
            if let Encoding::FixedInt { width, .. } = f.encoding {
                if !matches!(width, 1 | 2 | 4) {
                    return Err(JeeNetError::InvalidWidth(width));
                }
            }
            seen |= f.bit;
        }
        fields.sort_by_key(|f| f.bit);
        Ok(Schema { fields })
    }

    /// Fields in ascending bit order.
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Bitmask of every field bit the schema declares.
    pub fn bits(&self) -> u8 {
        self.fields.iter().fold(0, |acc, f| acc | f.bit)
    }
}

/// Serializes a value at the given spec, appending to `out`. Scaled fields
/// divide by the scale and truncate toward zero before hitting the wire.
pub(crate) fn encode_value(
    spec: &FieldSpec,
    value: &Value,
    out: &mut bytes::BytesMut,
) -> Result<(), JeeNetError> {
    use bytes::BufMut;

    match spec.encoding {
        // Two's-complement little-endian truncation covers signed and
        // unsigned alike on the encode side.
        Encoding::FixedInt { width, .. } => {
            let raw: i64 = match spec.scale {
                Some(scale) => {
                    let v = value.as_f64().ok_or_else(|| JeeNetError::InvalidArgument {
                        field: spec.name.clone(),
                        why: "expected a numeric value".into(),
                    })?;
                    (v / scale) as i64
                }
                None => match value {
                    Value::Uint(v) => *v as i64,
                    Value::Int(v) => *v,
                    Value::Float(v) => *v as i64,
                    _ => {
                        return Err(JeeNetError::InvalidArgument {
                            field: spec.name.clone(),
                            why: "expected a numeric value".into(),
                        })
                    }
                },
            };
            match width {
                1 => out.put_u8(raw as u8),
                2 => out.put_u16_le(raw as u16),
                4 => out.put_u32_le(raw as u32),
                w => return Err(JeeNetError::InvalidWidth(w)),
            }
        }
        Encoding::LengthPrefixedBytes => {
            let bytes: &[u8] = match value {
                Value::Text(s) => s.as_bytes(),
                Value::Bytes(b) => b,
                _ => {
                    return Err(JeeNetError::InvalidArgument {
                        field: spec.name.clone(),
                        why: "expected text or bytes".into(),
                    })
                }
            };
            if bytes.len() > u8::MAX as usize {
                return Err(JeeNetError::InvalidArgument {
                    field: spec.name.clone(),
                    why: format!("length {} exceeds one length byte", bytes.len()),
                });
            }
            out.put_u8(bytes.len() as u8);
            out.put_slice(bytes);
        }
    }
    Ok(())
}

/// Deserializes one field from the front of `payload`, returning the value
/// and the number of bytes consumed.
pub(crate) fn decode_value(
    spec: &FieldSpec,
    payload: &[u8],
) -> Result<(Value, usize), JeeNetError> {
    match spec.encoding {
        Encoding::FixedInt { width, signed } => {
            let width = width as usize;
            if payload.len() < width {
                return Err(JeeNetError::MalformedFrame(format!(
                    "field {} needs {} bytes, {} left",
                    spec.name,
                    width,
                    payload.len()
                )));
            }
            let mut raw: u64 = 0;
            for (i, b) in payload[..width].iter().enumerate() {
                raw |= (*b as u64) << (8 * i);
            }
            let value = if let Some(scale) = spec.scale {
                Value::Float(raw as f64 * scale)
            } else if signed {
                // Sign-extend from the declared width.
                let shift = 64 - 8 * width as u32;
                Value::Int(((raw << shift) as i64) >> shift)
            } else {
                Value::Uint(raw)
            };
            Ok((value, width))
        }
        Encoding::LengthPrefixedBytes => {
            let Some((&len, rest)) = payload.split_first() else {
                return Err(JeeNetError::MalformedFrame(format!(
                    "field {} missing length byte",
                    spec.name
                )));
            };
            let len = len as usize;
            if rest.len() < len {
                return Err(JeeNetError::MalformedFrame(format!(
                    "field {} declares {} bytes, {} left",
                    spec.name,
                    len,
                    rest.len()
                )));
            }
            let body = &rest[..len];
            let value = match std::str::from_utf8(body) {
                Ok(s) => Value::Text(s.to_string()),
                Err(_) => Value::Bytes(body.to_vec()),
            };
            Ok((value, 1 + len))
        }
    }
}
