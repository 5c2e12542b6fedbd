//! CryoEM Monitor Common Library
//!
//! Shared types and utilities for the CryoEM health monitor tools:
//!
//! - [`healthxml`] - Health Monitor XML model and reader
//! - [`schema`] - Parameter schema (`ParameterSchema`, `ParameterSpec`, `Limits`)
//! - [`measurement`] - Exported sample model (`Measurement`, `MetricKind`)
//! - [`units`] - Unit normalization and conversion
//! - [`naming`] - Prometheus metric and label naming
//! - [`config`] - Configuration loading (JSON5 format)
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod healthxml;
pub mod measurement;
pub mod naming;
pub mod schema;
pub mod units;

// Re-export commonly used types at the crate root
pub use config::{
    CONFIG_ENV, LogFormat, LoggingConfig, XML_PATH_ENV, load_config, parse_config,
};
pub use error::{Error, Result};
pub use healthxml::{HealthDocument, ParameterDecl, ValueSeries, parse_document, read_document};
pub use measurement::{DEVICE_LABEL, Measurement, MetricKind, SUBSYSTEM_LABEL};
pub use naming::{
    is_valid_metric_name, metric_name, sanitize_label_name, sanitize_metric_name,
};
pub use schema::{Limits, PanelType, ParameterSchema, ParameterSpec, SchemaConfig};

/// Initialize tracing with the given configuration.
///
/// Supports two output formats:
/// - `LogFormat::Text` (default): Human-readable text format
/// - `LogFormat::Json`: Structured JSON format for log aggregation systems
///
/// `RUST_LOG` takes precedence over the configured level.
///
/// # Example
///
/// ```ignore
/// use cryoem_monitor_common::{LoggingConfig, LogFormat, init_tracing};
///
/// let config = LoggingConfig {
///     level: "info".to_string(),
///     format: LogFormat::Json,
/// };
/// init_tracing(&config)?;
/// ```
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
    }

    Ok(())
}
