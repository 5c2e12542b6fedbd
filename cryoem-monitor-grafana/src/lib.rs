//! Grafana dashboard generation for the CryoEM health monitor exporter.
//!
//! The generator reads the same parameter schema as the exporter and emits a
//! dashboard with one panel per parameter, queried by device.

pub mod config;
pub mod dashboard;
pub mod thresholds;

pub use config::{ConfigError, GrafanaConfig};
pub use dashboard::{
    Dashboard, DashboardOptions, Panel, apply_document_limits, default_output_path, generate,
    write_dashboard,
};
pub use thresholds::{Color, ThresholdStep, threshold_steps};
