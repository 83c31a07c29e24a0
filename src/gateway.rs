//! # Gateway Wiring
//!
//! Ties the pieces together: spawns the link reader, the poll scheduler,
//! the liveness monitor, and the inbound-command subscriber, and owns the
//! graceful-shutdown sequence (release pending-ack waiters, stop the timer
//! loops, close the link, in that order).

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::bus::{BusMessage, EventBus};
use crate::codec::{split_frame, Value};
use crate::constants::{ACK_FLAG, TOPIC_CMD_PREFIX};
use crate::device::{Dispatcher, NewDevice, Registry};
use crate::error::JeeNetError;
use crate::flash::FlashProtocol;
use crate::link::RadioLink;
use crate::logging::{log_error, log_info, log_warn};
use crate::monitor::{Monitor, MonitorConfig};
use crate::scheduler::{Scheduler, SchedulerConfig};
use crate::transport::{SendOutcome, Transport, TransportConfig};

/// Top-level configuration for one gateway process.
#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    pub transport: TransportConfig,
    pub scheduler: SchedulerConfig,
    pub monitor: MonitorConfig,
}

/// A running gateway: one radio link bridged to one event bus.
pub struct Gateway {
    transport: Arc<Transport>,
    dispatcher: Arc<Dispatcher>,
    link: Arc<dyn RadioLink>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    new_devices: Option<mpsc::UnboundedReceiver<NewDevice>>,
}

impl Gateway {
    /// Wires everything up and spawns the long-lived tasks. The command
    /// subscription is made before this returns, so commands published right
    /// after startup are not lost.
    pub async fn start(
        link: Arc<dyn RadioLink>,
        registry: Registry,
        bus: Arc<dyn EventBus>,
        config: GatewayConfig,
    ) -> Gateway {
        let (dispatcher, new_devices) = Dispatcher::new(registry, bus.clone());
        let transport = Transport::new(link.clone(), config.transport);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let commands = bus.subscribe(&format!("{TOPIC_CMD_PREFIX}/*")).await;

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(run_reader(
            link.clone(),
            transport.clone(),
            dispatcher.clone(),
            shutdown_rx.clone(),
        )));
        tasks.push(tokio::spawn(
            Scheduler::new(config.scheduler, dispatcher.clone(), transport.clone())
                .run(shutdown_rx.clone()),
        ));
        tasks.push(tokio::spawn(
            Monitor::new(config.monitor, dispatcher.clone(), transport.clone())
                .run(shutdown_rx.clone()),
        ));
        tasks.push(tokio::spawn(run_commands(
            commands,
            dispatcher.clone(),
            transport.clone(),
            shutdown_rx,
        )));

        Gateway {
            transport,
            dispatcher,
            link,
            shutdown_tx,
            tasks,
            new_devices: Some(new_devices),
        }
    }

    /// Statically provisions a node, returning its instance name.
    pub fn provision(&self, node_id: u8, type_name: &str) -> Result<String, JeeNetError> {
        self.dispatcher.provision(node_id, type_name)
    }

    /// Takes the new-device notification channel. Single consumer.
    pub fn new_devices(&mut self) -> Option<mpsc::UnboundedReceiver<NewDevice>> {
        self.new_devices.take()
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    /// Builds, validates, and sends a command to a node by instance name.
    pub async fn send_command(
        &self,
        name: &str,
        command: &str,
        args: &[(String, Value)],
    ) -> Result<SendOutcome, JeeNetError> {
        let (node, model) = self
            .dispatcher
            .find_by_name(name)
            .ok_or_else(|| JeeNetError::UnknownDeviceType(name.to_string()))?;
        let request = model.build_command(command, args)?;
        let (_, outcome) = self.transport.send_command(node, &request).await?;
        Ok(outcome)
    }

    /// Opens a flash update session for a node that declares the capability.
    pub fn flash(&self, node_id: u8) -> Result<FlashProtocol, JeeNetError> {
        let model = self
            .dispatcher
            .node_model(node_id)
            .ok_or_else(|| JeeNetError::UnknownDeviceType(format!("node {node_id}")))?;
        if !model.flash_capable {
            return Err(JeeNetError::UnknownCommand(format!(
                "flash update on {}",
                model.type_name
            )));
        }
        Ok(FlashProtocol::new(
            self.transport.clone(),
            self.dispatcher.clone(),
            node_id,
        ))
    }

    /// Graceful shutdown: waiters released first, then the timer loops,
    /// then the link.
    pub async fn shutdown(self) {
        self.transport.shutdown();
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.link.close().await {
            log_warn(&format!("link close: {e}"));
        }
        for task in self.tasks {
            let _ = task.await;
        }
        log_info("gateway stopped");
    }
}

/// Link reader: decodes inbound frames, resolves acks, dispatches the rest.
/// One bad frame is logged and dropped; it never stops the loop.
async fn run_reader(
    link: Arc<dyn RadioLink>,
    transport: Arc<Transport>,
    dispatcher: Arc<Dispatcher>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            result = link.recv_raw() => match result {
                Ok(raw) => match split_frame(&raw) {
                    Ok((header, payload)) => {
                        let resolved = header.flags & ACK_FLAG != 0
                            && transport.resolve_ack(header.destination, header.message_id);
                        dispatcher.on_frame(&header, payload, resolved).await;
                    }
                    Err(e) => log_warn(&format!("dropping frame ({}): {e}", hex::encode(&raw))),
                },
                Err(JeeNetError::Shutdown) => break,
                Err(e) => {
                    log_error(&format!("link read failed: {e}"));
                    break;
                }
            },
        }
    }
}

/// Inbound command subscriber: `cmd/<name>` topics carry JSON bodies of the
/// form `{"command": ..., "args": {...}}`. Construction errors are reported
/// here and produce no wire traffic.
async fn run_commands(
    mut rx: mpsc::UnboundedReceiver<BusMessage>,
    dispatcher: Arc<Dispatcher>,
    transport: Arc<Transport>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            message = rx.recv() => match message {
                Some(message) => handle_command(&dispatcher, &transport, message).await,
                None => break,
            },
        }
    }
}

async fn handle_command(dispatcher: &Dispatcher, transport: &Transport, message: BusMessage) {
    let Some(name) = message
        .topic
        .strip_prefix(TOPIC_CMD_PREFIX)
        .and_then(|rest| rest.strip_prefix('/'))
    else {
        return;
    };

    let Some(command) = message.payload.get("command").and_then(|c| c.as_str()) else {
        log_warn(&format!("{}: command request without a command", message.topic));
        return;
    };
    let mut args = Vec::new();
    if let Some(object) = message.payload.get("args").and_then(|a| a.as_object()) {
        for (field, value) in object {
            match Value::from_json(value) {
                Some(v) => args.push((field.clone(), v)),
                None => {
                    log_warn(&format!("{}: unusable argument {field}", message.topic));
                    return;
                }
            }
        }
    }

    let Some((node, model)) = dispatcher.find_by_name(name) else {
        log_warn(&format!("{}: no such node", message.topic));
        return;
    };
    let request = match model.build_command(command, &args) {
        Ok(request) => request,
        Err(e) => {
            log_warn(&format!("{}: {e}", message.topic));
            return;
        }
    };
    match transport.send_command(node, &request).await {
        Ok((_, SendOutcome::DeliveryFailed)) => {
            log_warn(&format!("{name}: {command} not acknowledged"))
        }
        Ok(_) => {}
        Err(e) => log_warn(&format!("{name}: {command} failed: {e}")),
    }
}
