//! lagmgrd - LAG state manager daemon
//!
//! Entry point for the lagmgrd daemon.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use sonic_lagmgrd::{
    ChannelPublisher, EventWorkers, KernelWatcher, LagConfigTable, LagMgrConfig, LagOrch,
    LinkSocket, ShellKernelGateway, DEFAULT_CONFIG_PATH,
};
use sonic_sai::{LinkState, NpuPort, VirtualLagApi};

/// SONiC LAG state manager
#[derive(Parser, Debug)]
#[command(name = "lagmgrd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Record kernel commands instead of executing them
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn init_logging(log_level: &str, format: LogFormat) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(fmt::layer().with_target(true).with_thread_names(true).json())
            .init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_target(true).with_thread_names(true))
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level, args.log_format);

    let mut config = LagMgrConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if args.dry_run {
        config.daemon.dry_run = true;
    }
    config.validate().context("invalid configuration")?;

    let npu_id = config.daemon.npu_id;
    info!(
        npu_id,
        ports = config.ports.len(),
        lags = config.lags.len(),
        dry_run = config.daemon.dry_run,
        "--- Starting lagmgrd ---"
    );

    let npu = Arc::new(VirtualLagApi::new(npu_id, config.daemon.max_lags));
    for port in &config.ports {
        npu.set_link_state(
            NpuPort::new(npu_id, port.npu_port),
            LinkState::from_up(port.link_up),
        );
    }
    let kernel = Arc::new(ShellKernelGateway::new(
        config.port_mappings(),
        config.daemon.dry_run,
    ));

    let (notify_tx, mut notify_rx) = mpsc::unbounded_channel();
    let orch = Arc::new(LagOrch::new(
        npu_id,
        npu.clone(),
        kernel.clone(),
        Arc::new(ChannelPublisher::new(notify_tx)),
    ));
    let notifier = tokio::spawn(async move {
        while let Some(notification) = notify_rx.recv().await {
            match serde_json::to_string(&notification) {
                Ok(json) => info!(target: "lagmgrd::notify", "{}", json),
                Err(e) => warn!(error = %e, "Failed to encode notification"),
            }
        }
    });

    let table = Arc::new(LagConfigTable::new(
        orch.clone(),
        config.ports.iter().map(|p| (p.name.clone(), p.ifindex)),
    ));
    let (senders, workers) = EventWorkers::spawn(table, config.daemon.event_queue_depth)
        .context("failed to start event workers")?;
    npu.set_link_listener(senders.link_listener(orch.clone()));

    for request in config.bootstrap_requests() {
        senders
            .config
            .send(request)
            .await
            .context("config worker stopped")?;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watcher = if config.daemon.dry_run {
        info!("Dry run: kernel association watcher disabled");
        None
    } else {
        let socket = LinkSocket::open().context("failed to subscribe to link notifications")?;
        let watcher = KernelWatcher::new(kernel.clone(), senders.kernel.clone());
        Some(tokio::spawn(watcher.run(socket, shutdown_rx)))
    };

    signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Received shutdown signal");

    let _ = shutdown_tx.send(true);
    if let Some(watcher) = watcher {
        watcher.await.context("kernel watcher task failed")?;
    }

    npu.clear_link_listener();
    drop(senders);
    tokio::task::spawn_blocking(move || workers.join())
        .await
        .context("event workers failed to stop")?;

    info!(stats = ?orch.stats(), groups = orch.all_groups().len(), "lagmgrd exiting");
    drop(orch);
    notifier.await.context("notification task failed")?;
    Ok(())
}
