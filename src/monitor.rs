//! # Liveness Monitor
//!
//! Tracks per-node silence. A scan every `check_period` flips nodes that
//! have been quiet for longer than `dead_time` to dead, publishing a single
//! "node down" event; the dispatcher flips them back alive (and publishes
//! "node up") the moment any frame arrives, regardless of scan timing.
//!
//! Monitoring is passive: it rides on whatever traffic the scheduler and
//! the nodes themselves generate. `probe_silent` optionally originates a
//! minimal keep-alive poll to nodes with no scheduler-driven traffic so
//! purely event-driven devices are not falsely declared dead.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::device::Dispatcher;
use crate::logging::{log_debug, log_info};
use crate::transport::Transport;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// How often the silence scan runs.
    pub check_period: Duration,
    /// Silence threshold after which a node is presumed dead.
    pub dead_time: Duration,
    /// Send keep-alive polls to nodes the scheduler never polls.
    pub probe_silent: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            check_period: Duration::from_secs(10),
            dead_time: Duration::from_secs(20),
            probe_silent: false,
        }
    }
}

/// Scans the node table for silence and emits liveness events.
pub struct Monitor {
    config: MonitorConfig,
    dispatcher: Arc<Dispatcher>,
    transport: Arc<Transport>,
}

impl Monitor {
    pub fn new(
        config: MonitorConfig,
        dispatcher: Arc<Dispatcher>,
        transport: Arc<Transport>,
    ) -> Monitor {
        Monitor {
            config,
            dispatcher,
            transport,
        }
    }

    /// Runs until the shutdown signal fires.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.check_period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.scan(Instant::now()).await,
                _ = shutdown.changed() => break,
            }
        }
    }

    /// One monitor pass: declare newly silent nodes dead, optionally probe
    /// the ones nothing else talks to.
    pub async fn scan(&self, now: Instant) {
        for event in self.dispatcher.scan_liveness(now, self.config.dead_time) {
            log_info(&format!("node {} ({}) is down", event.node_id, event.name));
            self.dispatcher
                .publish_liveness(event.node_id, &event.name, false)
                .await;
        }

        if self.config.probe_silent {
            for node in self.dispatcher.unpolled_nodes() {
                log_debug(&format!("keep-alive poll to node {node}"));
                let _ = self.transport.poll(node).await;
            }
        }
    }
}
