//! End-to-end gateway tests over the mock link: bus-driven commands,
//! announce handling, flash capability gating, and graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use jeenet_rs::bus::{EventBus, MemoryBus};
use jeenet_rs::codec::{encode_raw_frame, split_frame, Value};
use jeenet_rs::constants::{ACK_FLAG, TEXT_FLAG};
use jeenet_rs::device::Registry;
use jeenet_rs::gateway::{Gateway, GatewayConfig};
use jeenet_rs::link::MockLink;
use jeenet_rs::transport::SendOutcome;
use jeenet_rs::JeeNetError;

async fn start_gateway(link: Arc<MockLink>, bus: Arc<MemoryBus>) -> Gateway {
    Gateway::start(
        link,
        Registry::with_builtin(),
        bus,
        GatewayConfig::default(),
    )
    .await
}

/// Collects ack-requested frames off the mock link, skipping scheduler polls.
fn command_frames(link: &MockLink) -> Vec<Vec<u8>> {
    link.sent()
        .iter()
        .filter(|raw| {
            split_frame(raw)
                .map(|(header, _)| header.flags & ACK_FLAG != 0)
                .unwrap_or(false)
        })
        .cloned()
        .collect()
}

/// A JSON command published on `cmd/<name>` reaches the wire as a validated,
/// ack-requested frame for the right node.
#[tokio::test(start_paused = true)]
async fn test_bus_command_reaches_wire() {
    let link = Arc::new(MockLink::new());
    link.set_auto_ack(true);
    let bus = Arc::new(MemoryBus::new());
    let gateway = start_gateway(link.clone(), bus.clone()).await;
    gateway.provision(2, "Relay Device v1.0").unwrap();

    bus.publish(
        "cmd/relay_2",
        serde_json::json!({"command": "set_relay", "args": {"state": 1}}),
    )
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let commands = command_frames(&link);
    assert_eq!(commands.len(), 1);
    let (header, payload) = split_frame(&commands[0]).unwrap();
    assert_eq!(header.destination, 2);
    assert_eq!(header.flags, ACK_FLAG | (1 << 2));
    assert_eq!(payload, &[0x01]);

    gateway.shutdown().await;
}

/// An out-of-domain argument is rejected before encoding: nothing ack-
/// requested ever reaches the wire.
#[tokio::test(start_paused = true)]
async fn test_invalid_command_produces_no_wire_traffic() {
    let link = Arc::new(MockLink::new());
    let bus = Arc::new(MemoryBus::new());
    let gateway = start_gateway(link.clone(), bus.clone()).await;
    gateway.provision(2, "Relay Device v1.0").unwrap();

    bus.publish(
        "cmd/relay_2",
        serde_json::json!({"command": "set_relay", "args": {"state": 7}}),
    )
    .await;
    bus.publish(
        "cmd/relay_2",
        serde_json::json!({"command": "no_such_command", "args": {}}),
    )
    .await;
    bus.publish("cmd/nobody_9", serde_json::json!({"command": "set_relay"}))
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(command_frames(&link).is_empty());

    gateway.shutdown().await;
}

/// The typed send API reports the delivery outcome.
#[tokio::test(start_paused = true)]
async fn test_send_command_outcome() {
    let link = Arc::new(MockLink::new());
    link.set_auto_ack(true);
    let bus = Arc::new(MemoryBus::new());
    let gateway = start_gateway(link.clone(), bus).await;
    gateway.provision(5, "Triac Control v1.0").unwrap();

    let outcome = gateway
        .send_command("triac_5", "set_level", &[("level".to_string(), Value::Uint(80))])
        .await
        .unwrap();
    assert_eq!(outcome, SendOutcome::Acked);

    let err = gateway
        .send_command(
            "triac_5",
            "set_level",
            &[("level".to_string(), Value::Uint(150))],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, JeeNetError::InvalidArgument { .. }));

    gateway.shutdown().await;
}

/// An announce frame injected on the link surfaces on the new-device channel
/// with the derived instance name.
#[tokio::test(start_paused = true)]
async fn test_announce_surfaces_new_device() {
    let link = Arc::new(MockLink::new());
    let bus = Arc::new(MemoryBus::new());
    let mut gateway = start_gateway(link.clone(), bus).await;
    let mut new_devices = gateway.new_devices().unwrap();

    let name = b"Triac Control v1.0";
    let mut payload = vec![name.len() as u8];
    payload.extend_from_slice(name);
    link.inject(encode_raw_frame(1, 5, TEXT_FLAG, &payload));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let added = new_devices.try_recv().unwrap();
    assert_eq!(added.node_id, 5);
    assert_eq!(added.name, "triac_5");
    assert!(gateway.dispatcher().instance(5).unwrap().alive);

    gateway.shutdown().await;
}

/// Flash sessions are only handed out for models that declare the
/// capability.
#[tokio::test(start_paused = true)]
async fn test_flash_requires_capability() {
    let link = Arc::new(MockLink::new());
    let bus = Arc::new(MemoryBus::new());
    let gateway = start_gateway(link, bus).await;
    gateway.provision(4, "PIR Device v1.0").unwrap();
    gateway.provision(2, "Relay Device v1.0").unwrap();

    assert!(matches!(
        gateway.flash(4),
        Err(JeeNetError::UnknownCommand(_))
    ));
    assert!(matches!(
        gateway.flash(7),
        Err(JeeNetError::UnknownDeviceType(_))
    ));
    assert!(gateway.flash(2).is_ok());

    gateway.shutdown().await;
}

/// Shutdown cancels a parked send and joins every background task.
#[tokio::test(start_paused = true)]
async fn test_shutdown_releases_pending_send() {
    let link = Arc::new(MockLink::new());
    let bus = Arc::new(MemoryBus::new());
    let gateway = start_gateway(link, bus).await;
    gateway.provision(2, "Relay Device v1.0").unwrap();

    let transport = gateway.transport().clone();
    let parked = tokio::spawn(async move {
        transport.send_raw_payload(2, true, 0, &[]).await
    });
    tokio::task::yield_now().await;

    gateway.shutdown().await;
    let (_, outcome) = parked.await.unwrap().unwrap();
    assert_eq!(outcome, SendOutcome::Cancelled);
}
