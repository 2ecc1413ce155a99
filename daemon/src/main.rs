//! iotlink Daemon
//!
//! Accepts device WebSocket sessions and serves the management API.

use anyhow::Result;
use clap::Parser;
use iotlink_daemon::config::DaemonConfig;
use iotlink_daemon::{Daemon, build_store, metrics};
use tracing::{Level, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// iotlink Daemon - device connection registry and command router
#[derive(Parser, Debug)]
#[command(name = "iotlinkd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "daemon.toml")]
    config: String,

    /// Additional configuration merged over the first
    #[arg(long)]
    overlay: Option<String>,

    /// Run in verbose mode
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging; RUST_LOG overrides --verbose
    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("iotlink daemon v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config = DaemonConfig::load(&args.config).await?;
    info!("Loaded configuration from {}", args.config);

    if let Some(overlay) = &args.overlay {
        config.load_merge(overlay).await?;
        info!("Merged configuration from {}", overlay);
    }

    // Start metrics server
    let metrics_handle = metrics::start_server(&config.monitoring);

    let store = build_store(&config.store).await?;
    let daemon = Daemon::new(config, store)?;

    info!(
        "Devices on {}{}, management API on {}",
        daemon.config.server.bind, daemon.config.server.path, daemon.config.management.bind
    );

    let result = daemon.run().await;

    // Cleanup
    metrics_handle.abort();

    result
}
