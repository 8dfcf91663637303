use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use duck_daemon::bridge::BridgeBrowser;
use duck_daemon::{socket, CoordinatorCore, CoordinatorEvent};
use duck_proto::config::Config;
use duck_proto::mode::FileModeStore;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Lowers (or pauses) the music player tab while a video plays in another tab.
#[derive(Parser, Debug)]
#[command(name = "duckd", version, about)]
struct Args {
    /// Config file to use instead of the default location.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address the bridge connects to, e.g. 127.0.0.1:9877.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // File logging + stderr
    let data_dir = duck_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("daemon.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,duck_daemon=debug")),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config_path = args.config.clone().unwrap_or_else(Config::config_path);
    let config = Config::load_from(&config_path)?;
    info!("Config loaded from: {:?}", config_path);

    let mode_store = Arc::new(FileModeStore::new(config.mode.store_file.clone()));

    // Event channel: all external inputs funnel into CoordinatorCore
    let (event_tx, event_rx) = tokio::sync::mpsc::channel::<CoordinatorEvent>(256);

    let bridge = Arc::new(BridgeBrowser::new());
    let core = CoordinatorCore::new(&config, bridge.clone(), mode_store, event_tx.clone())?;

    let bind = args.bind.unwrap_or_else(|| config.bridge.address());
    let _socket_handle = socket::start_server(bind, bridge, event_tx);

    info!("Coordinator initialised, running event loop");
    core.run(event_rx).await?;

    Ok(())
}
