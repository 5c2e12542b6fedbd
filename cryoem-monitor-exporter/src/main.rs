//! Prometheus exporter for Health Monitor XML exports.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

use cryoem_monitor_common::{CONFIG_ENV, XML_PATH_ENV, init_tracing};
use cryoem_monitor_exporter::{CollectionDriver, ExporterConfig, HttpServer, MetricsExporter};

/// Prometheus exporter for electron microscope Health Monitor exports.
#[derive(Parser, Debug)]
#[command(name = "cryoem-monitor-exporter")]
#[command(about = "Export Health Monitor XML parameters as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long, env = CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Health Monitor XML file, or directory holding it.
    #[arg(short, long, env = XML_PATH_ENV)]
    path: Option<PathBuf>,

    /// Serve metrics on this port on all interfaces.
    #[arg(short, long, conflicts_with = "listen")]
    server: Option<u16>,

    /// HTTP listen address (overrides config).
    #[arg(long)]
    listen: Option<String>,

    /// Seconds between collection cycles (overrides config).
    #[arg(short, long)]
    interval: Option<u64>,

    /// Device name (overrides the instrument name in the XML).
    #[arg(short, long)]
    device: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        ExporterConfig::load_from_file(config_path)
            .with_context(|| format!("Failed to load {}", config_path.display()))?
    } else {
        let mut config = ExporterConfig::default();
        config.schema.discover = true;
        config
    };

    // Command line overrides
    if let Some(path) = args.path {
        config.source.path = Some(path);
    }
    if let Some(port) = args.server {
        config.prometheus.listen = SocketAddr::from(([0, 0, 0, 0], port)).to_string();
    }
    if let Some(listen) = args.listen {
        config.prometheus.listen = listen;
    }
    if let Some(interval) = args.interval {
        config.source.interval_secs = interval;
    }
    if let Some(device) = args.device {
        config.device.name = Some(device);
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    config.validate()?;

    init_tracing(&config.logging)?;

    info!("Starting CryoEM Monitor Prometheus Exporter");

    let path = config.source.path.clone().with_context(|| {
        format!(
            "No XML source: pass --path, set {} or configure source.path",
            XML_PATH_ENV
        )
    })?;

    // Parse listen address
    let listen_addr: SocketAddr = config
        .prometheus
        .listen
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let config = Arc::new(config);
    let exporter = Arc::new(MetricsExporter::new(config.prometheus.prefix.clone()));

    // Create components
    let driver = CollectionDriver::new(&config, path, exporter.clone());
    let http_server = HttpServer::new(exporter.clone(), config.clone(), listen_addr);

    // Start collection driver
    let driver_task = tokio::spawn(driver.run(shutdown_rx.clone()));

    // Start HTTP server
    let http_shutdown = shutdown_rx.clone();
    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.run(http_shutdown).await {
            error!("HTTP server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate() => {
            info!("Received SIGTERM, shutting down...");
        }
    }

    // Signal shutdown
    shutdown_tx.send(true)?;

    // Wait for tasks to complete
    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        let _ = driver_task.await;
        let _ = http_task.await;
    })
    .await;

    // Print final stats
    let stats = exporter.stats();
    info!(
        cycles = stats.cycles_total,
        updates = stats.updates_total,
        failures = stats.failures.values().sum::<u64>(),
        series_count = exporter.snapshot().measurements.len(),
        "Final statistics"
    );

    info!("Exporter stopped");
    Ok(())
}

/// Resolves on SIGTERM (never on non-Unix platforms).
async fn terminate() {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        std::future::pending::<()>().await;
    }
}
