//! Configuration for the Prometheus exporter.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use cryoem_monitor_common::{LoggingConfig, SchemaConfig, is_valid_metric_name};

/// Paths served by the HTTP server besides the metrics endpoint.
pub const RESERVED_PATHS: [&str; 3] = ["/health", "/ready", "/config"];

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

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Where and how often to read the health monitor XML.
    #[serde(default)]
    pub source: SourceConfig,

    /// Device naming.
    #[serde(default)]
    pub device: DeviceConfig,

    /// Prometheus exporter settings.
    #[serde(default)]
    pub prometheus: PrometheusConfig,

    /// Exported parameters.
    #[serde(default)]
    pub schema: SchemaConfig,

    /// Mapper behaviour.
    #[serde(default)]
    pub mapping: MappingConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Health monitor XML source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// XML file, or directory holding the export.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Glob pattern used when `path` is a directory (default: "*.xml").
    #[serde(default = "default_file_pattern")]
    pub file_pattern: String,

    /// Seconds between collection cycles (default: 60).
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Command run before each read to regenerate the export (argv form).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub refresh_command: Vec<String>,

    /// Maximum runtime of the refresh command in seconds (default: 30).
    #[serde(default = "default_refresh_timeout")]
    pub refresh_timeout_secs: u64,
}

fn default_file_pattern() -> String {
    "*.xml".to_string()
}

fn default_interval() -> u64 {
    60
}

fn default_refresh_timeout() -> u64 {
    30
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            path: None,
            file_pattern: default_file_pattern(),
            interval_secs: default_interval(),
            refresh_command: Vec::new(),
            refresh_timeout_secs: default_refresh_timeout(),
        }
    }
}

/// Device naming.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Overrides the instrument name found in the XML.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Prometheus HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    /// Address to listen on (default: "0.0.0.0:9090").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,

    /// Default labels to add to all parameter series.
    #[serde(default)]
    pub default_labels: BTreeMap<String, String>,

    /// Metric name prefix (default: "cryoem").
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_listen() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_path() -> String {
    "/metrics".to_string()
}

fn default_prefix() -> String {
    "cryoem".to_string()
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
            default_labels: BTreeMap::new(),
            prefix: default_prefix(),
        }
    }
}

/// What to do when a parameter's value does not fit its schema entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchPolicy {
    /// Drop the offending parameter, export the rest.
    #[default]
    SkipParameter,
    /// Fail the whole cycle.
    SkipCycle,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MappingConfig {
    #[serde(default)]
    pub on_mismatch: MismatchPolicy,
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// The source path is not required here since it may come from the
    /// command line or the environment.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.interval_secs == 0 {
            return Err(ConfigError::Validation(
                "interval_secs must be > 0".to_string(),
            ));
        }

        if self.source.refresh_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "refresh_timeout_secs must be > 0".to_string(),
            ));
        }

        if glob::Pattern::new(&self.source.file_pattern).is_err() {
            return Err(ConfigError::Validation(format!(
                "Invalid file pattern: {}",
                self.source.file_pattern
            )));
        }

        if let Some(name) = &self.device.name
            && name.trim().is_empty()
        {
            return Err(ConfigError::Validation(
                "device name must not be empty".to_string(),
            ));
        }

        // Validate listen address format
        if self
            .prometheus
            .listen
            .parse::<std::net::SocketAddr>()
            .is_err()
        {
            return Err(ConfigError::Validation(format!(
                "Invalid listen address: {}",
                self.prometheus.listen
            )));
        }

        // Validate path starts with /
        if !self.prometheus.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        if RESERVED_PATHS.contains(&self.prometheus.path.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Metrics path {} is already served by the exporter",
                self.prometheus.path
            )));
        }

        let prefix = &self.prometheus.prefix;
        if !prefix.is_empty() && !is_valid_metric_name(prefix) {
            return Err(ConfigError::Validation(format!(
                "Invalid metric prefix: {}",
                prefix
            )));
        }

        self.schema
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cryoem_monitor_common::{LogFormat, PanelType};

    #[test]
    fn test_parse_minimal_config() {
        let json = "{ schema: { discover: true } }";
        let config = ExporterConfig::parse(json).unwrap();

        assert_eq!(config.source.path, None);
        assert_eq!(config.source.file_pattern, "*.xml");
        assert_eq!(config.source.interval_secs, 60);
        assert_eq!(config.source.refresh_timeout_secs, 30);
        assert_eq!(config.prometheus.listen, "0.0.0.0:9090");
        assert_eq!(config.prometheus.path, "/metrics");
        assert_eq!(config.prometheus.prefix, "cryoem");
        assert_eq!(config.mapping.on_mismatch, MismatchPolicy::SkipParameter);
        assert!(config.schema.discover);
    }

    #[test]
    fn test_parse_full_config() {
        let json = r#"{
            source: {
                path: "/data/HealthMonitor",
                file_pattern: "HM_*.xml",
                interval_secs: 30,
                refresh_command: ["hm-export", "--out", "/data/HealthMonitor"],
                refresh_timeout_secs: 10,
            },
            device: { name: "krios-1" },
            prometheus: {
                listen: "127.0.0.1:9091",
                path: "/prometheus/metrics",
                prefix: "em",
                default_labels: {
                    site: "building-b",
                },
            },
            schema: {
                parameters: {
                    temperature: { display_label: "Lens temperature", unit: "°C", source: "LensTemperature" },
                    autoloader: { panel: "state", states: { "0": "Idle", "1": "Loading" } },
                },
            },
            mapping: { on_mismatch: "skip_cycle" },
            logging: {
                level: "debug",
                format: "json",
            },
        }"#;

        let config = ExporterConfig::parse(json).unwrap();

        assert_eq!(
            config.source.path.as_deref(),
            Some(Path::new("/data/HealthMonitor"))
        );
        assert_eq!(config.source.file_pattern, "HM_*.xml");
        assert_eq!(config.source.refresh_command.len(), 3);
        assert_eq!(config.device.name.as_deref(), Some("krios-1"));
        assert_eq!(config.prometheus.listen, "127.0.0.1:9091");
        assert_eq!(config.prometheus.path, "/prometheus/metrics");
        assert_eq!(config.prometheus.prefix, "em");
        assert_eq!(
            config.prometheus.default_labels.get("site"),
            Some(&"building-b".to_string())
        );
        assert_eq!(config.schema.parameters.len(), 2);
        assert_eq!(
            config.schema.parameters.get("autoloader").unwrap().panel,
            PanelType::State
        );
        assert_eq!(config.mapping.on_mismatch, MismatchPolicy::SkipCycle);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_validate_requires_schema_or_discovery() {
        let result = ExporterConfig::parse("{}");
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("discovery disabled")
        );
    }

    #[test]
    fn test_validate_invalid_listen() {
        let json = r#"{
            schema: { discover: true },
            prometheus: { listen: "not-an-address" }
        }"#;

        let result = ExporterConfig::parse(json);
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Invalid listen address")
        );
    }

    #[test]
    fn test_validate_invalid_path() {
        let json = r#"{
            schema: { discover: true },
            prometheus: { path: "no-leading-slash" }
        }"#;

        let result = ExporterConfig::parse(json);
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("must start with /")
        );
    }

    #[test]
    fn test_validate_reserved_path() {
        for path in RESERVED_PATHS {
            let json = format!(
                "{{ schema: {{ discover: true }}, prometheus: {{ path: \"{}\" }} }}",
                path
            );
            let err = ExporterConfig::parse(&json).unwrap_err();
            assert!(err.to_string().contains("already served"), "{}", path);
        }
    }

    #[test]
    fn test_validate_prefix() {
        let json = r#"{ schema: { discover: true }, prometheus: { prefix: "cryo-em" } }"#;
        let err = ExporterConfig::parse(json).unwrap_err();
        assert!(err.to_string().contains("Invalid metric prefix"));

        let json = r#"{ schema: { discover: true }, prometheus: { prefix: "" } }"#;
        assert!(ExporterConfig::parse(json).is_ok());
    }

    #[test]
    fn test_validate_colliding_parameters() {
        let json = r#"{
            schema: {
                parameters: {
                    "lens-temp": { unit: "°C" },
                    "lens temp": { unit: "K" },
                },
            },
        }"#;
        let err = ExporterConfig::parse(json).unwrap_err();
        assert!(err.to_string().contains("both map to metric name"));
    }

    #[test]
    fn test_validate_zero_interval() {
        let json = r#"{
            schema: { discover: true },
            source: { interval_secs: 0 }
        }"#;

        assert!(ExporterConfig::parse(json).is_err());
    }

    #[test]
    fn test_validate_bad_limits() {
        let json = r#"{
            schema: {
                parameters: {
                    t: { limits: { warning_max: 10, caution_max: 20 } },
                },
            },
        }"#;

        let err = ExporterConfig::parse(json).unwrap_err();
        assert!(err.to_string().contains("invalid limits"));
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let json = r#"{
            schema: { discover: true },
            grafana: { columns: 3 },
        }"#;

        assert!(ExporterConfig::parse(json).is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.json5");
        std::fs::write(&path, "{ schema: { discover: true }, source: { interval_secs: 5 } }")
            .unwrap();

        let config = ExporterConfig::load_from_file(&path).unwrap();
        assert_eq!(config.source.interval_secs, 5);

        assert!(matches!(
            ExporterConfig::load_from_file(dir.path().join("missing.json5")),
            Err(ConfigError::Io(_))
        ));
    }
}
