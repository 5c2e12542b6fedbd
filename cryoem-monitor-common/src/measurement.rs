use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single named, typed, labeled numeric sample produced by one collection cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Canonical parameter name (e.g., "temperature", "vacuum").
    pub name: String,

    /// The measured value, already converted to the schema unit.
    pub value: f64,

    /// Unit of `value` (e.g., "°C", "Pa").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    /// How the metrics backend should treat the value.
    #[serde(default)]
    pub kind: MetricKind,

    /// Context labels (e.g., device, subsystem).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl Measurement {
    /// Create a new gauge measurement without unit or labels.
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            unit: None,
            kind: MetricKind::Gauge,
            labels: BTreeMap::new(),
        }
    }

    /// Set the unit of this measurement.
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Set the metric kind of this measurement.
    pub fn with_kind(mut self, kind: MetricKind) -> Self {
        self.kind = kind;
        self
    }

    /// Add a label to this measurement.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Add multiple labels to this measurement.
    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels.extend(labels);
        self
    }

    /// Value of the `device` label, if any.
    pub fn device(&self) -> Option<&str> {
        self.labels.get(DEVICE_LABEL).map(String::as_str)
    }
}

/// Label carrying the instrument name.
pub const DEVICE_LABEL: &str = "device";

/// Label carrying the instrument component path.
pub const SUBSYSTEM_LABEL: &str = "subsystem";

/// Metric semantics of a parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Can go up or down (temperatures, pressures, states).
    #[default]
    Gauge,
    /// Monotonically increasing (autoloader loads, autofill count).
    Counter,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
