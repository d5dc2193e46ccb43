//! Gateway router daemon.
//!
//! Loads the configuration, builds the routing core and keeps backend health
//! and the backend list current until asked to stop.
//!
//! ```text
//!   gateway.toml ──▶ loader ──▶ Gateway::build ──▶ RoutingManager
//!        │                                             ▲
//!        └── watcher ──▶ catalog.replace               │
//!                                                      │
//!   backends /v1/info ◀── ClusterMonitor ── stats ─────┘
//! ```

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use gateway_router::config::{load_config, watcher::apply_backend_reloads, ConfigWatcher};
use gateway_router::lifecycle::{wait_for_signal, Gateway, Shutdown, StartupError};
use gateway_router::observability::{logging, metrics};

#[derive(Debug, Parser)]
#[command(name = "gateway-router", version, about = "Backend routing core for a SQL query gateway")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "gateway.toml")]
    config: PathBuf,

    /// Do not reload the backend list when the config file changes.
    #[arg(long)]
    no_watch: bool,

    /// Seconds to wait for background tasks on shutdown.
    #[arg(long, default_value_t = 10)]
    drain_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = load_config(&args.config).map_err(StartupError::from)?;
    logging::init_logging(&config.observability.log_level);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?args.config,
        "gateway-router starting"
    );

    if config.observability.metrics_enabled {
        let address = config.observability.metrics_address.clone();
        let addr: SocketAddr = address
            .parse()
            .map_err(|source| StartupError::MetricsAddress { address: address.clone(), source })?;
        metrics::init_metrics(addr).map_err(StartupError::from)?;
        tracing::info!(address = %addr, "Metrics endpoint listening");
    }

    let gateway = Gateway::build(config)?;
    let shutdown = Shutdown::new();

    let monitor = gateway.cluster_monitor()?;
    tokio::spawn(monitor.run(shutdown.subscribe()));

    // Keeps the file watch alive for the lifetime of main.
    let _watcher = if args.no_watch {
        None
    } else {
        let (watcher, updates) = ConfigWatcher::new(&args.config);
        match watcher.run() {
            Ok(handle) => {
                tokio::spawn(apply_backend_reloads(
                    gateway.catalog().clone(),
                    updates,
                    shutdown.subscribe(),
                ));
                Some(handle)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Config watcher unavailable, backend list is static");
                None
            }
        }
    };

    let signal = wait_for_signal().await;
    tracing::info!(signal = signal, "Shutdown requested");

    shutdown.trigger();
    shutdown
        .wait_for_drain(Duration::from_secs(args.drain_timeout_secs))
        .await;

    tracing::info!("Shutdown complete");
    Ok(())
}
