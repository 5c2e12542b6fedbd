//! Grafana dashboard generator for Health Monitor parameters.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cryoem_monitor_common::{
    CONFIG_ENV, LogFormat, LoggingConfig, ParameterSchema, XML_PATH_ENV, read_document,
};
use cryoem_monitor_grafana::{
    GrafanaConfig, apply_document_limits, default_output_path, generate, write_dashboard,
};

/// Generate a Grafana dashboard for one microscope.
#[derive(Parser, Debug)]
#[command(name = "cryoem-monitor-grafana")]
#[command(about = "Generate a Grafana dashboard for Health Monitor metrics")]
#[command(version)]
struct Args {
    /// Device name, as exported in the `device` label.
    #[arg(short, long)]
    device: String,

    /// Path to configuration file (JSON5 format).
    #[arg(short, long, env = CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Health Monitor XML file or directory used to discover parameters and limits.
    #[arg(short, long, env = XML_PATH_ENV)]
    xml: Option<PathBuf>,

    /// Output file (default: grafana/grafana_<device>.json).
    #[arg(short, long, conflicts_with = "stdout")]
    output: Option<PathBuf>,

    /// Print the dashboard instead of writing a file.
    #[arg(long)]
    stdout: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => GrafanaConfig::load_from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => GrafanaConfig::default(),
    };
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    config.validate()?;

    init_logging(&config.logging)?;

    let document = match &args.xml {
        Some(path) => {
            let (file, document) = read_document(path, "*.xml")?;
            info!(path = %file.display(), "Read health monitor document");
            Some(document)
        }
        None => None,
    };

    let mut schema = config.schema.parameters.clone();
    match &document {
        Some(document) if schema.is_empty() => {
            schema = ParameterSchema::discover(document);
            schema.validate()?;
            info!(parameters = schema.len(), "Discovered parameters");
        }
        Some(document) => apply_document_limits(&mut schema, document),
        None if schema.is_empty() => {
            anyhow::bail!(
                "No parameters: configure schema.parameters or pass --xml (or set {})",
                XML_PATH_ENV
            );
        }
        None => {}
    }

    let dashboard = generate(&args.device, &schema, &config.to_options());

    if args.stdout {
        println!("{}", dashboard.to_json()?);
        return Ok(());
    }

    let output = args
        .output
        .unwrap_or_else(|| default_output_path(&args.device));
    write_dashboard(&dashboard, &output)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    info!(
        path = %output.display(),
        panels = dashboard.panels.len(),
        "Dashboard written"
    );
    Ok(())
}

/// Logs go to stderr so `--stdout` output stays valid JSON.
fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .with_context(|| format!("Invalid log level: {}", config.level))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let result = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
    result.map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))
}
