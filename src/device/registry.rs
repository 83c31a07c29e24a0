//! # Device Registry and Dispatcher
//!
//! The [`Registry`] maps self-reported device type strings to shared
//! [`DeviceModel`] values. It is built once at startup and passed in
//! explicitly; there is no ambient global table.
//!
//! The [`Dispatcher`] owns the live node table (`node_id` to
//! [`DeviceInstance`]), routes decoded inbound frames to the event bus,
//! creates instances for newly announced nodes, and reports unrecognized
//! type strings as diagnostics. New-device notifications flow through an
//! explicit channel handed out at construction time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::codec::{decode_fields, FieldSpec, FrameHeader, Schema, Value};
use crate::constants::{FLASH_FLAG, TEXT_FLAG, TOPIC_MONITOR, TOPIC_NODE_PREFIX, TOPIC_UNKNOWN};
use crate::bus::EventBus;
use crate::device::model::DeviceModel;
use crate::logging::{log_info, log_warn};

/// Maps announced type strings to device models. Built once at startup.
#[derive(Default)]
pub struct Registry {
    models: HashMap<String, Arc<DeviceModel>>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry {
            models: HashMap::new(),
        }
    }

    /// A registry seeded with the builtin device models.
    pub fn with_builtin() -> Registry {
        let mut registry = Registry::new();
        for model in crate::device::builtin::builtin_models() {
            registry.register(model);
        }
        registry
    }

    pub fn register(&mut self, model: DeviceModel) {
        self.models
            .insert(model.type_name.clone(), Arc::new(model));
    }

    pub fn resolve(&self, type_name: &str) -> Option<Arc<DeviceModel>> {
        self.models.get(type_name).cloned()
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(|s| s.as_str())
    }
}

/// One physical node attached to the gateway. Created when the node first
/// announces itself (or is provisioned) and never destroyed, only marked
/// dead or alive.
#[derive(Debug, Clone)]
pub struct DeviceInstance {
    pub node_id: u8,
    pub name: String,
    pub model: Arc<DeviceModel>,
    pub last_seen: Option<Instant>,
    pub last_poll: Option<Instant>,
    pub alive: bool,
}

/// Notification published on the new-device channel when a node attaches.
#[derive(Debug, Clone)]
pub struct NewDevice {
    pub node_id: u8,
    pub name: String,
}

/// A liveness transition found by the monitor scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivenessEvent {
    pub node_id: u8,
    pub name: String,
    pub up: bool,
}

enum Routed {
    Known {
        name: String,
        model: Arc<DeviceModel>,
        revived: bool,
    },
    Unknown,
}

/// Routes inbound frames to device instances and the event bus.
pub struct Dispatcher {
    registry: Registry,
    bus: Arc<dyn EventBus>,
    instances: Mutex<HashMap<u8, DeviceInstance>>,
    announce_schema: Schema,
    new_device_tx: mpsc::UnboundedSender<NewDevice>,
    flash_routes: Mutex<HashMap<u8, mpsc::UnboundedSender<(FrameHeader, Vec<u8>)>>>,
}

impl Dispatcher {
    /// Builds the dispatcher and returns the new-device notification channel
    /// alongside it.
    pub fn new(
        registry: Registry,
        bus: Arc<dyn EventBus>,
    ) -> (Arc<Dispatcher>, mpsc::UnboundedReceiver<NewDevice>) {
        let (new_device_tx, new_device_rx) = mpsc::unbounded_channel();
        let announce_schema = Schema::new(vec![FieldSpec::text(TEXT_FLAG, "device")])
            .expect("announce schema");
        let dispatcher = Arc::new(Dispatcher {
            registry,
            bus,
            instances: Mutex::new(HashMap::new()),
            announce_schema,
            new_device_tx,
            flash_routes: Mutex::new(HashMap::new()),
        });
        (dispatcher, new_device_rx)
    }

    /// Statically provisions a node before it ever speaks. The instance
    /// starts dead and flips alive on its first frame.
    pub fn provision(&self, node_id: u8, type_name: &str) -> Result<String, crate::JeeNetError> {
        let model = self
            .registry
            .resolve(type_name)
            .ok_or_else(|| crate::JeeNetError::UnknownDeviceType(type_name.to_string()))?;
        let name = instance_name(&model.type_name, node_id);
        let mut instances = self.instances.lock().unwrap();
        instances.insert(
            node_id,
            DeviceInstance {
                node_id,
                name: name.clone(),
                model,
                last_seen: None,
                last_poll: None,
                alive: false,
            },
        );
        Ok(name)
    }

    /// Handles one inbound frame. `resolved_ack` is true when the transport
    /// already matched this frame against a pending ack. Frames from a
    /// single node arrive here in receive order.
    pub async fn on_frame(&self, header: &FrameHeader, payload: &[u8], resolved_ack: bool) {
        let node = header.destination;

        let routed = {
            let mut instances = self.instances.lock().unwrap();
            match instances.get_mut(&node) {
                Some(inst) => {
                    let revived = !inst.alive;
                    inst.last_seen = Some(Instant::now());
                    inst.alive = true;
                    Routed::Known {
                        name: inst.name.clone(),
                        model: inst.model.clone(),
                        revived,
                    }
                }
                None => Routed::Unknown,
            }
        };

        match routed {
            Routed::Known {
                name,
                model,
                revived,
            } => {
                if revived {
                    self.publish_liveness(node, &name, true).await;
                }
                if header.flags & FLASH_FLAG != 0 {
                    self.route_flash(node, header, payload);
                    return;
                }
                if resolved_ack && payload.is_empty() {
                    // Bare delivery ack, nothing to publish.
                    return;
                }
                match model.decode_event_raw(header, payload) {
                    Ok(fields) => self.publish_event(node, &name, header, &fields).await,
                    Err(e) => log_warn(&format!("node {node}: dropping frame: {e}")),
                }
            }
            Routed::Unknown => self.on_unknown(header, payload).await,
        }
    }

    /// Unregistered-node path: decode the announce text and either attach a
    /// recognized device or publish an "unknown device" diagnostic.
    async fn on_unknown(&self, header: &FrameHeader, payload: &[u8]) {
        let node = header.destination;
        let announced = decode_fields(header.flags, payload, &self.announce_schema)
            .ok()
            .and_then(|fields| {
                fields
                    .into_iter()
                    .find(|(n, _)| n == "device")
                    .and_then(|(_, v)| v.as_text().map(|s| s.to_string()))
            });

        let Some(type_name) = announced else {
            self.publish_unknown(node, "message received").await;
            return;
        };

        let Some(model) = self.registry.resolve(&type_name) else {
            self.publish_unknown(node, &type_name).await;
            return;
        };

        let name = instance_name(&model.type_name, node);
        {
            let mut instances = self.instances.lock().unwrap();
            instances.insert(
                node,
                DeviceInstance {
                    node_id: node,
                    name: name.clone(),
                    model: model.clone(),
                    last_seen: Some(Instant::now()),
                    last_poll: None,
                    alive: true,
                },
            );
        }
        log_info(&format!("Added device {name}"));
        let _ = self.new_device_tx.send(NewDevice {
            node_id: node,
            name: name.clone(),
        });

        // The announce frame doubles as the node's first event.
        match model.decode_event_raw(header, payload) {
            Ok(fields) => self.publish_event(node, &name, header, &fields).await,
            Err(e) => log_warn(&format!("node {node}: dropping announce payload: {e}")),
        }
    }

    async fn publish_event(
        &self,
        node: u8,
        name: &str,
        header: &FrameHeader,
        fields: &[(String, Value)],
    ) {
        let mut body = serde_json::Map::new();
        body.insert("node".into(), serde_json::json!(node));
        body.insert("msg_id".into(), serde_json::json!(header.message_id));
        for (field, value) in fields {
            body.insert(field.clone(), value.to_json());
        }
        self.bus
            .publish(
                &format!("{TOPIC_NODE_PREFIX}/{name}"),
                serde_json::Value::Object(body),
            )
            .await;
    }

    async fn publish_unknown(&self, node: u8, why: &str) {
        self.bus
            .publish(
                TOPIC_UNKNOWN,
                serde_json::json!({
                    "node": node,
                    "error": "unknown device",
                    "why": why,
                }),
            )
            .await;
    }

    pub async fn publish_liveness(&self, node: u8, name: &str, up: bool) {
        self.bus
            .publish(
                TOPIC_MONITOR,
                serde_json::json!({
                    "node": node,
                    "name": name,
                    "event": if up { "up" } else { "down" },
                }),
            )
            .await;
    }

    /// Registers a flash sub-protocol route for a node, returning the channel
    /// its responses arrive on.
    pub fn register_flash(
        &self,
        node_id: u8,
    ) -> mpsc::UnboundedReceiver<(FrameHeader, Vec<u8>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.flash_routes.lock().unwrap().insert(node_id, tx);
        rx
    }

    pub fn unregister_flash(&self, node_id: u8) {
        self.flash_routes.lock().unwrap().remove(&node_id);
    }

    fn route_flash(&self, node: u8, header: &FrameHeader, payload: &[u8]) {
        let routes = self.flash_routes.lock().unwrap();
        match routes.get(&node) {
            Some(tx) => {
                let _ = tx.send((*header, payload.to_vec()));
            }
            None => log_warn(&format!("node {node}: unsolicited flash frame ignored")),
        }
    }

    /// Finds a node by instance name, for command routing.
    pub fn find_by_name(&self, name: &str) -> Option<(u8, Arc<DeviceModel>)> {
        let instances = self.instances.lock().unwrap();
        instances
            .values()
            .find(|i| i.name == name)
            .map(|i| (i.node_id, i.model.clone()))
    }

    pub fn node_model(&self, node_id: u8) -> Option<Arc<DeviceModel>> {
        let instances = self.instances.lock().unwrap();
        instances.get(&node_id).map(|i| i.model.clone())
    }

    pub fn instance(&self, node_id: u8) -> Option<DeviceInstance> {
        self.instances.lock().unwrap().get(&node_id).cloned()
    }

    /// Nodes whose poll period has elapsed. Stamps `last_poll` for each node
    /// returned; the scheduler then sends the poll requests.
    pub fn due_for_poll(&self, now: Instant) -> Vec<u8> {
        let mut instances = self.instances.lock().unwrap();
        let mut due = Vec::new();
        for inst in instances.values_mut() {
            let Some(period) = inst.model.poll_period else {
                continue;
            };
            let elapsed = match inst.last_poll {
                Some(t) => now.duration_since(t) >= period,
                None => true,
            };
            if elapsed {
                inst.last_poll = Some(now);
                due.push(inst.node_id);
            }
        }
        due
    }

    /// Flips nodes silent for longer than `dead_time` to dead and returns
    /// the transitions. Nodes already dead are left alone.
    pub fn scan_liveness(&self, now: Instant, dead_time: Duration) -> Vec<LivenessEvent> {
        let mut instances = self.instances.lock().unwrap();
        let mut events = Vec::new();
        for inst in instances.values_mut() {
            if !inst.alive {
                continue;
            }
            let silent = match inst.last_seen {
                Some(t) => now.duration_since(t) > dead_time,
                None => false,
            };
            if silent {
                inst.alive = false;
                events.push(LivenessEvent {
                    node_id: inst.node_id,
                    name: inst.name.clone(),
                    up: false,
                });
            }
        }
        events
    }

    /// Nodes with no scheduler-driven traffic, candidates for an optional
    /// keep-alive probe.
    pub fn unpolled_nodes(&self) -> Vec<u8> {
        let instances = self.instances.lock().unwrap();
        instances
            .values()
            .filter(|i| i.model.poll_period.is_none())
            .map(|i| i.node_id)
            .collect()
    }
}

/// Derives an instance name from the announced type string, e.g.
/// `"Triac Control v1.0"` on node 5 becomes `"triac_5"`.
fn instance_name(type_name: &str, node_id: u8) -> String {
    let stem = type_name
        .split_whitespace()
        .next()
        .unwrap_or("device")
        .to_lowercase();
    format!("{stem}_{node_id}")
}
