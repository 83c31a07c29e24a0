//! # Poll Scheduler
//!
//! A single fixed-period tick walks the instance table and sends a poll
//! request to every device whose own poll period has elapsed. Devices with
//! no poll period are never proactively polled. Ordering across devices
//! within one tick is not guaranteed.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::device::Dispatcher;
use crate::logging::log_debug;
use crate::transport::Transport;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Timer tick driving the poll-period checks.
    pub tick: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            tick: Duration::from_millis(100),
        }
    }
}

/// Drives periodic polling of attached devices.
pub struct Scheduler {
    config: SchedulerConfig,
    dispatcher: Arc<Dispatcher>,
    transport: Arc<Transport>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        dispatcher: Arc<Dispatcher>,
        transport: Arc<Transport>,
    ) -> Scheduler {
        Scheduler {
            config,
            dispatcher,
            transport,
        }
    }

    /// Runs until the shutdown signal fires.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick(Instant::now()).await,
                _ = shutdown.changed() => break,
            }
        }
    }

    /// One scheduler pass: poll every device whose period has elapsed.
    pub async fn tick(&self, now: Instant) {
        for node in self.dispatcher.due_for_poll(now) {
            log_debug(&format!("polling node {node}"));
            if let Err(e) = self.transport.poll(node).await {
                log_debug(&format!("node {node}: poll failed: {e}"));
            }
        }
    }
}
