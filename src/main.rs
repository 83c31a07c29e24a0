use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use jeenet_rs::{
    connect_with_config, init_logger, log_info, Gateway, GatewayConfig, MemoryBus, Registry,
    SerialConfig,
};

#[derive(Parser)]
#[command(name = "jeenet-gateway")]
#[command(about = "Gateway bridging JeeNode radio nodes to a pub/sub event bus")]
struct Cli {
    /// Serial device of the radio board; falls back through the usual
    /// candidates when omitted
    port: Option<String>,

    #[arg(long, default_value = "57600")]
    baudrate: u32,

    /// Scheduler tick in milliseconds
    #[arg(long, default_value = "100")]
    tick_ms: u64,

    /// Monitor scan period in seconds
    #[arg(long, default_value = "10")]
    check_period: u64,

    /// Silence threshold in seconds before a node is declared dead
    #[arg(long, default_value = "20")]
    dead_time: u64,

    /// Send keep-alive polls to nodes the scheduler never polls
    #[arg(long)]
    probe_silent: bool,
}

fn pick_port(cli: &Cli) -> String {
    if let Some(port) = &cli.port {
        return port.clone();
    }
    for candidate in jeenet_rs::constants::DEFAULT_DEVICE_PATHS {
        if Path::new(candidate).exists() {
            return candidate.to_string();
        }
    }
    jeenet_rs::constants::DEFAULT_DEVICE_PATHS
        .last()
        .expect("candidate list is non-empty")
        .to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    let cli = Cli::parse();
    let port = pick_port(&cli);

    let serial = SerialConfig {
        baudrate: cli.baudrate,
        ..SerialConfig::default()
    };
    let link = connect_with_config(&port, serial)
        .await
        .with_context(|| format!("opening radio link on {port}"))?;
    log_info(&format!("radio link open on {port}"));

    let mut config = GatewayConfig::default();
    config.scheduler.tick = Duration::from_millis(cli.tick_ms);
    config.monitor.check_period = Duration::from_secs(cli.check_period);
    config.monitor.dead_time = Duration::from_secs(cli.dead_time);
    config.monitor.probe_silent = cli.probe_silent;

    let bus = Arc::new(MemoryBus::new());
    let gateway = Gateway::start(Arc::new(link), Registry::with_builtin(), bus, config).await;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for interrupt")?;
    log_info("interrupt received, shutting down");
    gateway.shutdown().await;

    Ok(())
}
