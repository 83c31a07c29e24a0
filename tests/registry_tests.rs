//! Tests for the device model and registry/dispatcher layer: command
//! validation, announce handling, and the unknown-device diagnostic path.

use std::sync::Arc;

use jeenet_rs::bus::{EventBus, MemoryBus};
use jeenet_rs::codec::{encode_raw_frame, split_frame, Value};
use jeenet_rs::constants::{TEXT_FLAG, TOPIC_UNKNOWN};
use jeenet_rs::device::builtin::relay_model;
use jeenet_rs::device::{Dispatcher, Registry};
use jeenet_rs::JeeNetError;

/// Builds an announce frame: text field carrying the device type string.
fn announce_frame(message_id: u8, node: u8, type_name: &str) -> Vec<u8> {
    let mut payload = vec![type_name.len() as u8];
    payload.extend_from_slice(type_name.as_bytes());
    encode_raw_frame(message_id, node, TEXT_FLAG, &payload)
}

#[test]
fn test_build_command_validates() {
    let model = relay_model();

    let ok = model
        .build_command("set_relay", &[("state".to_string(), Value::Uint(1))])
        .unwrap();
    assert!(ok.ack_requested);
    assert_eq!(ok.values.len(), 1);

    let err = model
        .build_command("set_relay", &[("state".to_string(), Value::Uint(7))])
        .unwrap_err();
    assert!(matches!(err, JeeNetError::InvalidArgument { .. }));

    let err = model.build_command("explode", &[]).unwrap_err();
    assert!(matches!(err, JeeNetError::UnknownCommand(_)));

    let err = model
        .build_command("set_relay", &[("bogus".to_string(), Value::Uint(0))])
        .unwrap_err();
    assert!(matches!(err, JeeNetError::InvalidArgument { .. }));
}

#[test]
fn test_decode_event_applies_scales() {
    let model = relay_model();
    let raw = [0x07, 0x02, 0b1110, 0x4E, 0x09, 0x01, 0xB8, 0x0C];
    let info = model.decode_event(&raw).unwrap();

    assert_eq!(info.message_id, 0x07);
    let temp = info.field("temp").unwrap().as_f64().unwrap();
    assert!((temp - 23.82).abs() < 1e-9);
    assert_eq!(info.field("relay"), Some(&Value::Uint(1)));
    let vcc = info.field("vcc").unwrap().as_f64().unwrap();
    assert!((vcc - 3.256).abs() < 1e-9);
}

/// A known type string attaches the node: instance created, new-device
/// notification sent, first decoded event published.
#[tokio::test]
async fn test_known_announce_creates_instance() {
    let bus = Arc::new(MemoryBus::new());
    let mut events = bus.subscribe("node/*").await;
    let (dispatcher, mut new_devices) = Dispatcher::new(Registry::with_builtin(), bus);

    let raw = announce_frame(1, 5, "Triac Control v1.0");
    let (header, payload) = split_frame(&raw).unwrap();
    dispatcher.on_frame(&header, payload, false).await;

    let added = new_devices.try_recv().unwrap();
    assert_eq!(added.node_id, 5);
    assert_eq!(added.name, "triac_5");

    let instance = dispatcher.instance(5).unwrap();
    assert!(instance.alive);
    assert_eq!(instance.model.type_name, "Triac Control v1.0");

    let event = events.try_recv().unwrap();
    assert_eq!(event.topic, "node/triac_5");
    assert_eq!(event.payload["node"], serde_json::json!(5));
    assert_eq!(event.payload["text"], serde_json::json!("Triac Control v1.0"));
}

/// An unrecognized type string creates nothing and publishes an "unknown
/// device" diagnostic carrying the raw string.
#[tokio::test]
async fn test_unknown_announce_publishes_diagnostic() {
    let bus = Arc::new(MemoryBus::new());
    let mut diagnostics = bus.subscribe(TOPIC_UNKNOWN).await;
    let (dispatcher, mut new_devices) = Dispatcher::new(Registry::with_builtin(), bus);

    let raw = announce_frame(1, 9, "Widget X");
    let (header, payload) = split_frame(&raw).unwrap();
    dispatcher.on_frame(&header, payload, false).await;

    assert!(dispatcher.instance(9).is_none());
    assert!(new_devices.try_recv().is_err());

    let diag = diagnostics.try_recv().unwrap();
    assert_eq!(diag.payload["node"], serde_json::json!(9));
    assert_eq!(diag.payload["error"], serde_json::json!("unknown device"));
    assert_eq!(diag.payload["why"], serde_json::json!("Widget X"));
}

/// A frame from an unknown node with no announce text still produces a
/// diagnostic rather than silently vanishing.
#[tokio::test]
async fn test_unknown_node_without_announce() {
    let bus = Arc::new(MemoryBus::new());
    let mut diagnostics = bus.subscribe(TOPIC_UNKNOWN).await;
    let (dispatcher, _new_devices) = Dispatcher::new(Registry::with_builtin(), bus);

    let raw = encode_raw_frame(4, 8, 0b0010, &[0x10, 0x00]);
    let (header, payload) = split_frame(&raw).unwrap();
    dispatcher.on_frame(&header, payload, false).await;

    let diag = diagnostics.try_recv().unwrap();
    assert_eq!(diag.payload["why"], serde_json::json!("message received"));
}

/// Telemetry from a provisioned node is decoded with its model's schema and
/// published on the node topic.
#[tokio::test]
async fn test_provisioned_node_event_published() {
    let bus = Arc::new(MemoryBus::new());
    let mut events = bus.subscribe("node/*").await;
    let (dispatcher, _new_devices) = Dispatcher::new(Registry::with_builtin(), bus);

    let name = dispatcher.provision(2, "Relay Device v1.0").unwrap();
    assert_eq!(name, "relay_2");

    let raw = encode_raw_frame(7, 2, 0b0110, &[0x4E, 0x09, 0x01]);
    let (header, payload) = split_frame(&raw).unwrap();
    dispatcher.on_frame(&header, payload, false).await;

    let event = events.try_recv().unwrap();
    assert_eq!(event.topic, "node/relay_2");
    assert!((event.payload["temp"].as_f64().unwrap() - 23.82).abs() < 1e-9);
    assert_eq!(event.payload["relay"], serde_json::json!(1));
    assert_eq!(event.payload["msg_id"], serde_json::json!(7));
}

#[test]
fn test_provision_unknown_type_fails() {
    let bus = Arc::new(MemoryBus::new());
    let (dispatcher, _new_devices) = Dispatcher::new(Registry::with_builtin(), bus);
    let err = dispatcher.provision(2, "Widget X").unwrap_err();
    assert!(matches!(err, JeeNetError::UnknownDeviceType(_)));
}
