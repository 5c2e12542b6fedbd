//! Parameter schema: which instrument parameters are exported and how.
//!
//! The schema is configuration. It is either listed explicitly in the config
//! file or derived once from a health monitor document with
//! [`ParameterSchema::discover`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use tracing::warn;

use crate::error::{Error, Result};
use crate::healthxml::HealthDocument;
use crate::measurement::MetricKind;
use crate::naming::{RESERVED_METRIC_NAMES, sanitize_metric_name};

/// Dashboard panel used to visualize a parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PanelType {
    /// Single-value gauge with thresholds.
    #[default]
    Gauge,
    /// State timeline for enumerated values.
    State,
    /// Time series graph.
    Timeseries,
}

/// The six instrument limits, from most severe low to most severe high.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critical_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caution_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caution_max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning_max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critical_max: Option<f64>,
}

impl Limits {
    /// True when no limit is set.
    pub fn is_empty(&self) -> bool {
        self.ordered().iter().all(|(_, v)| v.is_none())
    }

    /// True when at least one lower limit is set.
    pub fn has_lower(&self) -> bool {
        self.critical_min.is_some() || self.warning_min.is_some() || self.caution_min.is_some()
    }

    /// Set a limit by its instrument threshold name (e.g. "WarningMin").
    ///
    /// Returns false for unknown names.
    pub fn set_by_name(&mut self, name: &str, value: f64) -> bool {
        let slot = match name {
            "CriticalMin" => &mut self.critical_min,
            "WarningMin" => &mut self.warning_min,
            "CautionMin" => &mut self.caution_min,
            "CautionMax" => &mut self.caution_max,
            "WarningMax" => &mut self.warning_max,
            "CriticalMax" => &mut self.critical_max,
            _ => return false,
        };
        *slot = Some(value);
        true
    }

    /// Limits in ascending severity order: critical_min up to critical_max.
    pub fn ordered(&self) -> [(&'static str, Option<f64>); 6] {
        [
            ("critical_min", self.critical_min),
            ("warning_min", self.warning_min),
            ("caution_min", self.caution_min),
            ("caution_max", self.caution_max),
            ("warning_max", self.warning_max),
            ("critical_max", self.critical_max),
        ]
    }

    /// Check that the configured limits are non-decreasing.
    pub fn validate(&self) -> std::result::Result<(), String> {
        let mut previous: Option<(&str, f64)> = None;
        for (name, value) in self.ordered() {
            let Some(value) = value else { continue };
            if value.is_nan() {
                return Err(format!("{} is NaN", name));
            }
            if let Some((prev_name, prev)) = previous
                && value < prev
            {
                return Err(format!(
                    "{} ({}) is below {} ({})",
                    name, value, prev_name, prev
                ));
            }
            previous = Some((name, value));
        }
        Ok(())
    }
}

/// How one instrument parameter is exported.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Human-readable label (panel title, HELP text).
    #[serde(default)]
    pub display_label: String,

    /// Unit the value is exported in. `None` keeps the document's unit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    /// Panel type in the generated dashboard.
    #[serde(default)]
    pub panel: PanelType,

    /// Metric semantics.
    #[serde(default)]
    pub kind: MetricKind,

    /// XML parameter name or ID to read. Defaults to the canonical name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Free-form description used as metric HELP text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Threshold limits for the dashboard.
    #[serde(default, skip_serializing_if = "Limits::is_empty")]
    pub limits: Limits,

    /// Labels of enumerated values keyed by the raw value (state panels).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub states: BTreeMap<String, String>,
}

impl ParameterSpec {
    /// Create a gauge spec with a label and unit.
    pub fn gauge(display_label: impl Into<String>, unit: Option<&str>) -> Self {
        Self {
            display_label: display_label.into(),
            unit: unit.map(str::to_string),
            ..Default::default()
        }
    }
}

/// Static mapping from canonical parameter name to its spec.
///
/// Backed by a `BTreeMap` so iteration order is stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSchema {
    parameters: BTreeMap<String, ParameterSpec>,
}

impl ParameterSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter, builder style.
    pub fn with(mut self, name: impl Into<String>, spec: ParameterSpec) -> Self {
        self.insert(name, spec);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, spec: ParameterSpec) {
        self.parameters.insert(name.into(), spec);
    }

    pub fn get(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.get(name)
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Iterate parameters in canonical-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParameterSpec)> {
        self.parameters.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// XML name or ID to look up for a parameter.
    pub fn source_of<'a>(name: &'a str, spec: &'a ParameterSpec) -> &'a str {
        spec.source.as_deref().unwrap_or(name)
    }

    /// Display label, falling back to the canonical name.
    pub fn label_of<'a>(name: &'a str, spec: &'a ParameterSpec) -> &'a str {
        if spec.display_label.is_empty() {
            name
        } else {
            &spec.display_label
        }
    }

    /// Validate names and limits.
    ///
    /// Distinct parameters must map to distinct metric names, none of which
    /// may be one of the exporter's own series.
    pub fn validate(&self) -> Result<()> {
        let mut metric_names: BTreeMap<String, &str> = BTreeMap::new();
        for (name, spec) in &self.parameters {
            if name.trim().is_empty() {
                return Err(Error::Config(
                    "schema parameter names must not be empty".to_string(),
                ));
            }
            let metric = sanitize_metric_name(name);
            if RESERVED_METRIC_NAMES.contains(&metric.as_str()) {
                return Err(Error::Config(format!(
                    "parameter '{}' maps to reserved metric name '{}'",
                    name, metric
                )));
            }
            if let Some(other) = metric_names.insert(metric.clone(), name) {
                return Err(Error::Config(format!(
                    "parameters '{}' and '{}' both map to metric name '{}'",
                    other, name, metric
                )));
            }
            spec.limits.validate().map_err(|reason| {
                Error::Config(format!("invalid limits for parameter '{}': {}", name, reason))
            })?;
        }
        Ok(())
    }

    /// Derive a schema from the `Instruments` section of a document.
    ///
    /// Every declared parameter becomes `<Name>_<ID>`, read by ID, exported
    /// in its storage unit. Parameters whose type names a declared
    /// enumeration become state panels labelled with the enumeration's
    /// literals. Limits come from the latest `Limit` in the `Values` section;
    /// limits that are NaN or out of order are dropped.
    pub fn discover(document: &HealthDocument) -> Self {
        let mut schema = Self::new();

        for decl in &document.parameters {
            let enumeration = decl
                .data_type
                .as_deref()
                .and_then(|t| document.enumerations.get(t));

            let (panel, states) = match enumeration {
                Some(e) => (
                    PanelType::State,
                    e.literals
                        .iter()
                        .map(|l| (l.value.to_string(), l.name.clone()))
                        .collect(),
                ),
                None => (PanelType::Gauge, BTreeMap::new()),
            };

            let mut limits = document
                .series_for(&decl.id)
                .map(|s| s.limits)
                .unwrap_or_default();
            if let Err(reason) = limits.validate() {
                warn!(parameter = %decl.name, %reason, "Ignoring invalid limits");
                limits = Limits::default();
            }

            let spec = ParameterSpec {
                display_label: decl
                    .display_name
                    .clone()
                    .unwrap_or_else(|| decl.name.clone()),
                unit: decl.storage_unit.clone(),
                panel,
                kind: MetricKind::Gauge,
                source: Some(decl.id.clone()),
                description: Some(format!("{} ({})", decl.name, decl.subsystem)),
                limits,
                states,
            };

            schema.insert(format!("{}_{}", decl.name, decl.id), spec);
        }

        schema
    }
}

impl FromIterator<(String, ParameterSpec)> for ParameterSchema {
    fn from_iter<I: IntoIterator<Item = (String, ParameterSpec)>>(iter: I) -> Self {
        Self {
            parameters: iter.into_iter().collect(),
        }
    }
}

/// Schema section of a configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// Explicit parameter list.
    #[serde(default)]
    pub parameters: ParameterSchema,

    /// Derive the schema from the first document read when `parameters` is empty.
    #[serde(default)]
    pub discover: bool,
}

impl SchemaConfig {
    pub fn validate(&self) -> Result<()> {
        if self.parameters.is_empty() && !self.discover {
            return Err(Error::Config(
                "schema: no parameters configured and discovery disabled".to_string(),
            ));
        }
        self.parameters.validate()
    }
}
