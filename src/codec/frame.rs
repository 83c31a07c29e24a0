//! # JeeNet Frame Codec
//!
//! Encodes and decodes the binary frames exchanged with radio nodes. A frame
//! is a fixed three-byte header (`message_id`, `destination`, `flags`)
//! followed by a payload whose shape is driven entirely by the flags byte:
//! every set bit that a schema declares marks one present field, serialized
//! in ascending bit order. Header parsing uses the `nom` crate.
//!
//! The codec knows nothing about devices or the transport. Message-id
//! allocation belongs to the transport, so `encode_frame` takes the id as an
//! argument.

use nom::number::complete::le_u8;
use nom::IResult;

use crate::codec::field::{decode_value, encode_value, Schema, Value};
use crate::constants::HEADER_SIZE;
use crate::error::JeeNetError;

/// The fixed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub message_id: u8,
    pub destination: u8,
    pub flags: u8,
}

/// A fully decoded frame: header plus the schema fields its flags declared,
/// in ascending bit order. Fields whose bit was clear are simply absent.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub message_id: u8,
    pub destination: u8,
    pub flags: u8,
    pub fields: Vec<(String, Value)>,
}

impl Frame {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }
}

fn parse_header(input: &[u8]) -> IResult<&[u8], FrameHeader> {
    let (input, message_id) = le_u8(input)?;
    let (input, destination) = le_u8(input)?;
    let (input, flags) = le_u8(input)?;
    Ok((
        input,
        FrameHeader {
            message_id,
            destination,
            flags,
        },
    ))
}

/// Splits a raw frame into header and payload without touching any schema.
/// The transport's reader uses this to route frames before a device decodes
/// the payload.
pub fn split_frame(raw: &[u8]) -> Result<(FrameHeader, &[u8]), JeeNetError> {
    if raw.len() < HEADER_SIZE {
        return Err(JeeNetError::MalformedFrame(format!(
            "frame of {} bytes shorter than {}-byte header",
            raw.len(),
            HEADER_SIZE
        )));
    }
    let (payload, header) =
        parse_header(raw).map_err(|e| JeeNetError::MalformedFrame(format!("{e:?}")))?;
    Ok((header, payload))
}

/// Decodes the payload fields declared present by `flags`, in ascending bit
/// order. Set bits the schema does not declare are ignored for forward
/// compatibility; a declared field whose bytes run out is a malformed frame.
pub fn decode_fields(
    flags: u8,
    payload: &[u8],
    schema: &Schema,
) -> Result<Vec<(String, Value)>, JeeNetError> {
    let mut fields = Vec::new();
    let mut rest = payload;
    for spec in schema.fields() {
        if flags & spec.bit == 0 {
            continue;
        }
        let (value, consumed) = decode_value(spec, rest)?;
        rest = &rest[consumed..];
        fields.push((spec.name.clone(), value));
    }
    Ok(fields)
}

/// Decodes a complete frame against a schema.
pub fn decode_frame(raw: &[u8], schema: &Schema) -> Result<Frame, JeeNetError> {
    let (header, payload) = split_frame(raw)?;
    let fields = decode_fields(header.flags, payload, schema)?;
    Ok(Frame {
        message_id: header.message_id,
        destination: header.destination,
        flags: header.flags,
        fields,
    })
}

/// Encodes a frame carrying the supplied schema fields. Only supplied fields
/// are serialized and only their bits are set on top of `flags_base`; the
/// supplied order is irrelevant because the schema fixes the wire order.
pub fn encode_frame(
    message_id: u8,
    destination: u8,
    flags_base: u8,
    values: &[(String, Value)],
    schema: &Schema,
) -> Result<Vec<u8>, JeeNetError> {
    use bytes::BufMut;

    for (name, _) in values {
        if schema.field(name).is_none() {
            return Err(JeeNetError::InvalidArgument {
                field: name.clone(),
                why: "not a schema field".into(),
            });
        }
    }

    let mut payload = bytes::BytesMut::with_capacity(32);
    let mut flags = flags_base;
    for spec in schema.fields() {
        let Some((_, value)) = values.iter().find(|(n, _)| n == &spec.name) else {
            continue;
        };
        encode_value(spec, value, &mut payload)?;
        flags |= spec.bit;
    }

    let mut buf = bytes::BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_u8(message_id);
    buf.put_u8(destination);
    buf.put_u8(flags);
    buf.extend_from_slice(&payload);
    Ok(buf.to_vec())
}

/// Encodes a frame with an opaque payload, used by the flash sub-protocol
/// where the payload is an opcode plus body rather than schema fields.
pub fn encode_raw_frame(message_id: u8, destination: u8, flags: u8, payload: &[u8]) -> Vec<u8> {
    use bytes::BufMut;

    let mut buf = bytes::BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_u8(message_id);
    buf.put_u8(destination);
    buf.put_u8(flags);
    buf.extend_from_slice(payload);
    buf.to_vec()
}
