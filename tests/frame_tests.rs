//! Unit tests for the frame codec: header/payload split, flag-driven field
//! decoding, encoding, scale transforms, and schema validation.

use jeenet_rs::codec::{decode_frame, encode_frame, split_frame, FieldSpec, Schema, Value};
use jeenet_rs::constants::{ACK_FLAG, TEXT_FLAG};
use jeenet_rs::JeeNetError;

fn relay_style_schema() -> Schema {
    Schema::new(vec![
        FieldSpec::scaled(1 << 1, "temp", 2, 0.01),
        FieldSpec::uint(1 << 2, "relay", 1),
        FieldSpec::scaled(1 << 3, "vcc", 2, 0.001),
        FieldSpec::text(TEXT_FLAG, "text"),
    ])
    .unwrap()
}

/// The worked example: flags 0b0110 with payload [0x4E, 0x09, 0x01] carries
/// temp raw 0x094E = 2382 -> 23.82 and relay = 1; vcc's bit is clear so vcc
/// is absent.
#[test]
fn test_decode_temp_and_relay() {
    let raw = [0x07, 0x02, 0b0110, 0x4E, 0x09, 0x01];
    let frame = decode_frame(&raw, &relay_style_schema()).unwrap();

    assert_eq!(frame.message_id, 0x07);
    assert_eq!(frame.destination, 0x02);
    assert_eq!(frame.flags, 0b0110);

    let temp = frame.field("temp").unwrap().as_f64().unwrap();
    assert!((temp - 23.82).abs() < 1e-9);
    assert_eq!(frame.field("relay"), Some(&Value::Uint(1)));
    assert_eq!(frame.field("vcc"), None);
    assert_eq!(frame.fields.len(), 2);
}

/// Decoding never yields a field whose bit was clear, and yields every
/// schema field whose bit was set.
#[test]
fn test_flag_fidelity() {
    let schema = relay_style_schema();
    let raw = [0x01, 0x05, 0b1000, 0xB8, 0x0C];
    let frame = decode_frame(&raw, &schema).unwrap();
    assert_eq!(frame.fields.len(), 1);
    let vcc = frame.field("vcc").unwrap().as_f64().unwrap();
    assert!((vcc - 3.256).abs() < 1e-9);
}

/// Set bits the schema does not declare are ignored, not an error.
#[test]
fn test_unknown_bits_ignored() {
    let schema = Schema::new(vec![FieldSpec::uint(1 << 1, "count", 1)]).unwrap();
    let raw = [0x01, 0x05, (1 << 1) | (1 << 5), 0x2A];
    let frame = decode_frame(&raw, &schema).unwrap();
    assert_eq!(frame.field("count"), Some(&Value::Uint(42)));
    assert_eq!(frame.fields.len(), 1);
}

#[test]
fn test_truncated_header_is_malformed() {
    let err = split_frame(&[0x01, 0x02]).unwrap_err();
    assert!(matches!(err, JeeNetError::MalformedFrame(_)));
}

#[test]
fn test_short_payload_is_malformed() {
    // temp declares 2 bytes, only 1 present
    let raw = [0x01, 0x02, 0b0010, 0x4E];
    let err = decode_frame(&raw, &relay_style_schema()).unwrap_err();
    assert!(matches!(err, JeeNetError::MalformedFrame(_)));
}

#[test]
fn test_text_length_overrun_is_malformed() {
    // length byte declares 10 bytes, only 3 follow
    let raw = [0x01, 0x02, TEXT_FLAG, 10, b'a', b'b', b'c'];
    let err = decode_frame(&raw, &relay_style_schema()).unwrap_err();
    assert!(matches!(err, JeeNetError::MalformedFrame(_)));
}

#[test]
fn test_decode_text_field() {
    let mut raw = vec![0x03, 0x09, TEXT_FLAG];
    let announce = b"PIR Device v1.0";
    raw.push(announce.len() as u8);
    raw.extend_from_slice(announce);
    let frame = decode_frame(&raw, &relay_style_schema()).unwrap();
    assert_eq!(
        frame.field("text"),
        Some(&Value::Text("PIR Device v1.0".to_string()))
    );
}

/// Encode serializes only the supplied fields, in ascending bit order no
/// matter how the caller ordered them, and sets exactly their bits.
#[test]
fn test_encode_subset_out_of_order() {
    let schema = relay_style_schema();
    let values = vec![
        ("relay".to_string(), Value::Uint(1)),
        ("temp".to_string(), Value::Float(23.82)),
    ];
    let raw = encode_frame(0x11, 0x02, 0, &values, &schema).unwrap();
    assert_eq!(raw[0], 0x11);
    assert_eq!(raw[1], 0x02);
    assert_eq!(raw[2], 0b0110);
    // temp (bit 1) first on the wire, then relay (bit 2)
    assert_eq!(&raw[3..5], &[0x4E, 0x09]);
    assert_eq!(raw[5], 0x01);
}

#[test]
fn test_encode_unknown_field_rejected() {
    let schema = relay_style_schema();
    let values = vec![("watts".to_string(), Value::Uint(9))];
    let err = encode_frame(0, 1, 0, &values, &schema).unwrap_err();
    assert!(matches!(err, JeeNetError::InvalidArgument { .. }));
}

/// Scaled round-trips stay within one wire unit.
#[test]
fn test_scale_round_trip_tolerance() {
    let schema = relay_style_schema();
    for temp in [0.0, 0.01, 23.82, 91.07, 655.35] {
        let values = vec![("temp".to_string(), Value::Float(temp))];
        let raw = encode_frame(0, 1, 0, &values, &schema).unwrap();
        let frame = decode_frame(&raw, &schema).unwrap();
        let back = frame.field("temp").unwrap().as_f64().unwrap();
        assert!(
            (back - temp).abs() <= 0.01 + 1e-9,
            "temp {temp} came back as {back}"
        );
    }
}

#[test]
fn test_signed_field_sign_extension() {
    let schema = Schema::new(vec![FieldSpec::int(1 << 1, "offset", 2)]).unwrap();
    let values = vec![("offset".to_string(), Value::Int(-5))];
    let raw = encode_frame(0, 1, 0, &values, &schema).unwrap();
    let frame = decode_frame(&raw, &schema).unwrap();
    assert_eq!(frame.field("offset"), Some(&Value::Int(-5)));
}

#[test]
fn test_schema_rejects_duplicate_bit() {
    let err = Schema::new(vec![
        FieldSpec::uint(1 << 2, "a", 1),
        FieldSpec::uint(1 << 2, "b", 1),
    ])
    .unwrap_err();
    assert!(matches!(err, JeeNetError::DuplicateBit(b) if b == 1 << 2));
}

#[test]
fn test_schema_rejects_ack_bit() {
    let err = Schema::new(vec![FieldSpec::uint(ACK_FLAG, "a", 1)]).unwrap_err();
    assert!(matches!(err, JeeNetError::ReservedBit(_)));
}

#[test]
fn test_schema_rejects_non_power_of_two_bit() {
    let err = Schema::new(vec![FieldSpec::uint(0b0110, "a", 1)]).unwrap_err();
    assert!(matches!(err, JeeNetError::InvalidBit(_)));
}

mod round_trip {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Unscaled fields round-trip exactly for any in-domain values.
        #[test]
        fn prop_round_trip(count in any::<u8>(), raw16 in any::<u16>(), raw32 in any::<u32>()) {
            let schema = Schema::new(vec![
                FieldSpec::uint(1 << 1, "count", 1),
                FieldSpec::uint(1 << 2, "raw16", 2),
                FieldSpec::uint(1 << 3, "raw32", 4),
            ]).unwrap();
            let values = vec![
                ("count".to_string(), Value::Uint(count as u64)),
                ("raw16".to_string(), Value::Uint(raw16 as u64)),
                ("raw32".to_string(), Value::Uint(raw32 as u64)),
            ];
            let raw = encode_frame(1, 2, 0, &values, &schema).unwrap();
            let frame = decode_frame(&raw, &schema).unwrap();
            prop_assert_eq!(frame.field("count"), Some(&Value::Uint(count as u64)));
            prop_assert_eq!(frame.field("raw16"), Some(&Value::Uint(raw16 as u64)));
            prop_assert_eq!(frame.field("raw32"), Some(&Value::Uint(raw32 as u64)));
        }
    }
}
