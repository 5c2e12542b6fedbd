//! Configuration for the dashboard generator.
//!
//! Shares the `schema`, `prometheus` and `logging` sections with the exporter
//! configuration; keys only the exporter understands are ignored.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use cryoem_monitor_common::{LoggingConfig, SchemaConfig, is_valid_metric_name};

use crate::dashboard::DashboardOptions;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete generator configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GrafanaConfig {
    /// Parameters to draw. May be empty when discovered from an XML file.
    #[serde(default)]
    pub schema: SchemaConfig,

    /// Metric naming, must match the exporter.
    #[serde(default)]
    pub prometheus: PrometheusNaming,

    /// Dashboard settings.
    #[serde(default)]
    pub grafana: DashboardSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// The subset of the exporter's `prometheus` section that affects queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusNaming {
    /// Metric name prefix (default: "cryoem").
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_prefix() -> String {
    "cryoem".to_string()
}

impl Default for PrometheusNaming {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardSettings {
    /// Grafana datasource plugin type (default: "prometheus").
    #[serde(default = "default_datasource_type")]
    pub datasource_type: String,

    /// Datasource UID; Grafana's default datasource when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datasource_uid: Option<String>,

    /// Dashboard auto-refresh interval (default: "1m").
    #[serde(default = "default_refresh")]
    pub refresh: String,

    /// Start of the default time range (default: "now-6h").
    #[serde(default = "default_time_from")]
    pub time_from: String,

    /// Panels per row (default: 2).
    #[serde(default = "default_columns")]
    pub columns: u32,
}

fn default_datasource_type() -> String {
    "prometheus".to_string()
}

fn default_refresh() -> String {
    "1m".to_string()
}

fn default_time_from() -> String {
    "now-6h".to_string()
}

fn default_columns() -> u32 {
    2
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            datasource_type: default_datasource_type(),
            datasource_uid: None,
            refresh: default_refresh(),
            time_from: default_time_from(),
            columns: default_columns(),
        }
    }
}

impl GrafanaConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: GrafanaConfig = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// An empty schema is accepted since it may be discovered later.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=24).contains(&self.grafana.columns) {
            return Err(ConfigError::Validation(format!(
                "columns must be between 1 and 24, got {}",
                self.grafana.columns
            )));
        }

        let prefix = &self.prometheus.prefix;
        if !prefix.is_empty() && !is_valid_metric_name(prefix) {
            return Err(ConfigError::Validation(format!(
                "Invalid metric prefix: {}",
                prefix
            )));
        }

        if self.grafana.datasource_type.trim().is_empty() {
            return Err(ConfigError::Validation(
                "datasource_type must not be empty".to_string(),
            ));
        }

        self.schema
            .parameters
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        Ok(())
    }

    /// Generator options derived from this configuration.
    pub fn to_options(&self) -> DashboardOptions {
        DashboardOptions {
            prefix: self.prometheus.prefix.clone(),
            datasource_type: self.grafana.datasource_type.clone(),
            datasource_uid: self.grafana.datasource_uid.clone(),
            refresh: self.grafana.refresh.clone(),
            time_from: self.grafana.time_from.clone(),
            columns: self.grafana.columns,
        }
    }
}
