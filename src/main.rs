//! node-daemon
//!
//! Resilient access to an execution client and a beacon node pair.
//!
//! # Architecture Overview
//!
//! ```text
//!   ┌──────────────────────────────────────────────────────────────┐
//!   │                        SERVICE PROVIDER                      │
//!   │                                                              │
//!   │   ┌──────────────┐   ┌────────────────────┐                  │
//!   │   │ QueryManager │   │ TransactionManager │                  │
//!   │   │  (multicall) │   │ est → sign → send  │                  │
//!   │   └──────┬───────┘   └─────────┬──────────┘                  │
//!   │          └──────────┬──────────┘                             │
//!   │                     ▼                                        │
//!   │        ┌─────────────────────────┐  ┌──────────────────────┐ │
//!   │        │ ClientManager<Execution>│  │ ClientManager<Beacon>│ │
//!   │        └──────┬───────────┬──────┘  └──────┬─────────┬─────┘ │
//!   └───────────────┼───────────┼────────────────┼─────────┼───────┘
//!                   ▼           ▼                ▼         ▼
//!               primary     fallback         primary   fallback
//! ```

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;

use node_daemon::clients::RoutingFlags;
use node_daemon::config::{load_config, DaemonConfig};
use node_daemon::lifecycle::{signals, CancelToken};
use node_daemon::observability::{logging, metrics};
use node_daemon::services::{ClientStatusReport, ServiceProvider};

#[derive(Parser)]
#[command(name = "node-daemon")]
#[command(about = "Primary/fallback access to Ethereum execution and beacon clients", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "node-daemon.toml")]
    config: PathBuf,

    /// Route to lagging clients as long as they are reachable
    #[arg(long)]
    ignore_sync_check: bool,

    /// Prefer the fallback clients whenever they are reachable
    #[arg(long)]
    force_fallback: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe all clients once and print the status as JSON
    Status,
    /// Monitor client status until interrupted
    Run,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let (config, from_file) = read_config(&cli.config)?;
    logging::init_logging(&config.observability.log_level);

    if from_file {
        tracing::info!(path = %cli.config.display(), "Configuration loaded");
    } else {
        tracing::warn!(path = %cli.config.display(), "Configuration file not found, using defaults");
    }

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let provider = ServiceProvider::from_config(config)?;
    provider.set_routing_flags(RoutingFlags {
        ignore_sync_check: cli.ignore_sync_check,
        force_fallback: cli.force_fallback,
    });

    match cli.command {
        Commands::Status => {
            let report = provider.client_status().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Run => run(provider).await,
    }

    Ok(())
}

/// A missing file means defaults; anything else wrong with it is fatal.
fn read_config(path: &Path) -> Result<(DaemonConfig, bool), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Ok((DaemonConfig::default(), false));
    }
    Ok((load_config(path)?, true))
}

async fn run(provider: ServiceProvider) {
    let cancel = CancelToken::new();
    let signal_task = signals::cancel_on_shutdown(cancel.clone());

    tracing::info!(
        chain_id = provider.config().chain_id,
        version = env!("CARGO_PKG_VERSION"),
        "node-daemon starting"
    );

    match provider.verify_chain_id(&cancel).await {
        Ok(()) => tracing::info!("Execution client chain verified"),
        Err(e) => tracing::warn!(error = %e, "Chain verification failed"),
    }

    let period = Duration::from_secs(provider.config().monitor.status_interval_secs);
    let mut ticker = tokio::time::interval(period);
    let mut last: Option<ClientStatusReport> = None;

    while cancel.run_until_cancelled(ticker.tick()).await.is_some() {
        let Some(report) = cancel.run_until_cancelled(provider.client_status()).await else {
            break;
        };
        log_status(&report, last.as_ref());
        last = Some(report);
    }

    signal_task.abort();
    tracing::info!("Shutdown complete");
}

fn log_status(report: &ClientStatusReport, previous: Option<&ClientStatusReport>) {
    let changed = previous.map_or(true, |prev| {
        !prev.execution.same_state(&report.execution) || !prev.beacon.same_state(&report.beacon)
    });

    for status in [&report.execution, &report.beacon] {
        if changed {
            tracing::info!(
                layer = %status.layer,
                primary = %status.primary.health,
                fallback = %status.fallback.as_ref().map(|f| f.health.to_string()).unwrap_or_else(|| "none".into()),
                active = ?status.active,
                "Client status"
            );
        } else {
            tracing::debug!(layer = %status.layer, active = ?status.active, "Client status unchanged");
        }
    }

    if !report.is_healthy() {
        tracing::warn!("No usable client on at least one layer");
    }
}
