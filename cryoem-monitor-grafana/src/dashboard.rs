//! Grafana dashboard model and generator.
//!
//! [`generate`] is a pure function of the device name, the schema and the
//! options. Every map in the model is ordered, so the serialized JSON is
//! byte-identical for identical inputs.

use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use cryoem_monitor_common::naming::escape_label_value;
use cryoem_monitor_common::{
    HealthDocument, Limits, PanelType, ParameterSchema, ParameterSpec, Result, metric_name, units,
};
use tracing::debug;

use crate::thresholds::{ThresholdStep, threshold_steps};

/// Grafana version the panel options were written against.
const PLUGIN_VERSION: &str = "11.1.0";

/// Dashboard JSON schema version.
const SCHEMA_VERSION: u32 = 39;

/// Grid width in Grafana's 24-column layout.
const GRID_COLUMNS: u32 = 24;

const PANEL_HEIGHT: u32 = 8;

const UID_MAX_LEN: usize = 40;

/// Generator settings.
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardOptions {
    /// Metric name prefix used by the exporter.
    pub prefix: String,
    pub datasource_type: String,
    pub datasource_uid: Option<String>,
    pub refresh: String,
    pub time_from: String,
    /// Panels per row.
    pub columns: u32,
}

impl Default for DashboardOptions {
    fn default() -> Self {
        Self {
            prefix: "cryoem".to_string(),
            datasource_type: "prometheus".to_string(),
            datasource_uid: None,
            refresh: "1m".to_string(),
            time_from: "now-6h".to_string(),
            columns: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub uid: String,
    pub title: String,
    pub tags: Vec<String>,
    pub timezone: String,
    pub editable: bool,
    pub schema_version: u32,
    pub version: u32,
    pub refresh: String,
    pub time: TimeRange,
    pub panels: Vec<Panel>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeRange {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Panel {
    pub id: u32,
    #[serde(rename = "type")]
    pub panel_type: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub datasource: Datasource,
    pub grid_pos: GridPos,
    pub field_config: FieldConfig,
    pub options: Value,
    pub plugin_version: String,
    pub targets: Vec<Target>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Datasource {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GridPos {
    pub h: u32,
    pub w: u32,
    pub x: u32,
    pub y: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldConfig {
    pub defaults: FieldDefaults,
    pub overrides: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDefaults {
    pub color: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub mappings: Vec<ValueMapping>,
    pub thresholds: Thresholds,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Thresholds {
    pub mode: String,
    pub steps: Vec<ThresholdStep>,
}

/// Raw value to text mapping for state panels.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueMapping {
    #[serde(rename = "type")]
    pub kind: String,
    pub options: BTreeMap<String, MappingResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MappingResult {
    pub text: String,
    pub index: usize,
}

/// A Prometheus query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    pub datasource: Datasource,
    pub disable_text_wrap: bool,
    pub editor_mode: String,
    pub expr: String,
    pub full_meta_search: bool,
    pub include_none_metadata: bool,
    pub instant: bool,
    pub legend_format: String,
    pub range: bool,
    pub ref_id: String,
    pub use_backend: bool,
}

impl Dashboard {
    /// Pretty-printed dashboard JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Build a dashboard with one panel per schema parameter, in schema order.
pub fn generate(device: &str, schema: &ParameterSchema, options: &DashboardOptions) -> Dashboard {
    let columns = options.columns.clamp(1, GRID_COLUMNS);
    let width = GRID_COLUMNS / columns;
    let datasource = Datasource {
        kind: options.datasource_type.clone(),
        uid: options.datasource_uid.clone(),
    };

    let panels = schema
        .iter()
        .enumerate()
        .map(|(index, (name, spec))| {
            let index = index as u32;
            let grid_pos = GridPos {
                h: PANEL_HEIGHT,
                w: width,
                x: (index % columns) * width,
                y: (index / columns) * PANEL_HEIGHT,
            };
            let expr = panel_query(&options.prefix, name, device);
            build_panel(index + 1, name, spec, grid_pos, &datasource, expr)
        })
        .collect();

    Dashboard {
        uid: dashboard_uid(device),
        title: format!("{} Health Monitor", device),
        tags: vec!["cryoem".to_string(), "health-monitor".to_string()],
        timezone: "browser".to_string(),
        editable: true,
        schema_version: SCHEMA_VERSION,
        version: 1,
        refresh: options.refresh.clone(),
        time: TimeRange {
            from: options.time_from.clone(),
            to: "now".to_string(),
        },
        panels,
    }
}

/// PromQL selecting one parameter of one device.
pub fn panel_query(prefix: &str, parameter: &str, device: &str) -> String {
    format!(
        "{}{{device=\"{}\"}}",
        metric_name(prefix, parameter),
        escape_label_value(device)
    )
}

/// Deterministic dashboard UID derived from the device name.
///
/// Grafana limits UIDs to 40 characters.
pub fn dashboard_uid(device: &str) -> String {
    let mut slug = String::with_capacity(device.len());
    for c in device.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-');
    let slug = if slug.is_empty() { "device" } else { slug };

    let mut uid = format!("cryoem-{}", slug);
    uid.truncate(UID_MAX_LEN);
    while uid.ends_with('-') {
        uid.pop();
    }
    uid
}

/// Grafana unit ID for a unit symbol.
///
/// Units Grafana has no ID for are shown as a suffix.
pub fn grafana_unit(unit: &str) -> String {
    let normalized = units::normalize(unit);
    let id = match normalized.as_str() {
        "°C" => "celsius",
        "°F" => "fahrenheit",
        "K" => "kelvin",
        "Pa" => "pressurepa",
        "hPa" => "pressurehpa",
        "kPa" => "pressurekpa",
        "mbar" => "pressurembar",
        "bar" => "pressurebar",
        "psi" => "pressurepsi",
        "V" => "volt",
        "mV" => "mvolt",
        "kV" => "kvolt",
        "A" => "amp",
        "mA" => "mamp",
        "W" => "watt",
        "mW" => "mwatt",
        "kW" => "kwatt",
        "Hz" => "hertz",
        "s" => "s",
        "ms" => "ms",
        "us" => "µs",
        "min" => "m",
        "h" => "h",
        "m" => "lengthm",
        "mm" => "lengthmm",
        "%" => "percent",
        "fraction" => "percentunit",
        "ppm" => "ppm",
        other => return format!("suffix: {}", other),
    };
    id.to_string()
}

fn build_panel(
    id: u32,
    name: &str,
    spec: &ParameterSpec,
    grid_pos: GridPos,
    datasource: &Datasource,
    expr: String,
) -> Panel {
    let (panel_type, color, custom, options) = match spec.panel {
        PanelType::Gauge => ("gauge", json!({ "mode": "thresholds" }), None, gauge_options()),
        PanelType::State => (
            "state-timeline",
            json!({ "mode": "thresholds" }),
            Some(state_custom()),
            state_options(),
        ),
        PanelType::Timeseries => (
            "timeseries",
            json!({ "mode": "palette-classic" }),
            Some(timeseries_custom()),
            timeseries_options(),
        ),
    };

    let mappings = if spec.states.is_empty() {
        Vec::new()
    } else {
        vec![state_mapping(&spec.states)]
    };

    let unit = match spec.panel {
        PanelType::State => None,
        _ => spec.unit.as_deref().map(grafana_unit),
    };

    Panel {
        id,
        panel_type: panel_type.to_string(),
        title: ParameterSchema::label_of(name, spec).to_string(),
        description: spec.description.clone(),
        datasource: datasource.clone(),
        grid_pos,
        field_config: FieldConfig {
            defaults: FieldDefaults {
                color,
                custom,
                unit,
                mappings,
                thresholds: Thresholds {
                    mode: "absolute".to_string(),
                    steps: threshold_steps(&spec.limits),
                },
            },
            overrides: Vec::new(),
        },
        options,
        plugin_version: PLUGIN_VERSION.to_string(),
        targets: vec![Target {
            datasource: datasource.clone(),
            disable_text_wrap: false,
            editor_mode: "builder".to_string(),
            expr,
            full_meta_search: false,
            include_none_metadata: true,
            instant: false,
            legend_format: "__auto".to_string(),
            range: true,
            ref_id: "A".to_string(),
            use_backend: false,
        }],
    }
}

/// Value mapping ordered by raw value, indexed in that order.
fn state_mapping(states: &BTreeMap<String, String>) -> ValueMapping {
    let mut entries: Vec<(&String, &String)> = states.iter().collect();
    entries.sort_by(|(a, _), (b, _)| match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x.total_cmp(&y),
        _ => a.cmp(b),
    });

    let options = entries
        .into_iter()
        .enumerate()
        .map(|(index, (raw, text))| {
            (
                raw.clone(),
                MappingResult {
                    text: text.clone(),
                    index,
                },
            )
        })
        .collect();

    ValueMapping {
        kind: "value".to_string(),
        options,
    }
}

fn gauge_options() -> Value {
    json!({
        "minVizHeight": 75,
        "minVizWidth": 75,
        "orientation": "auto",
        "reduceOptions": {
            "calcs": ["lastNotNull"],
            "fields": "",
            "values": false
        },
        "showThresholdLabels": false,
        "showThresholdMarkers": true,
        "sizing": "auto"
    })
}

fn state_custom() -> Value {
    json!({
        "fillOpacity": 70,
        "hideFrom": { "legend": false, "tooltip": false, "viz": false },
        "insertNulls": false,
        "lineWidth": 0,
        "spanNulls": false
    })
}

fn state_options() -> Value {
    json!({
        "alignValue": "left",
        "legend": { "displayMode": "list", "placement": "bottom", "showLegend": true },
        "mergeValues": true,
        "rowHeight": 0.9,
        "showValue": "auto",
        "tooltip": { "mode": "single", "sort": "none" }
    })
}

fn timeseries_custom() -> Value {
    json!({
        "drawStyle": "line",
        "fillOpacity": 0,
        "lineWidth": 1,
        "pointSize": 5,
        "showPoints": "auto",
        "spanNulls": false,
        "thresholdsStyle": { "mode": "line" }
    })
}

fn timeseries_options() -> Value {
    json!({
        "legend": { "displayMode": "list", "placement": "bottom", "showLegend": true },
        "tooltip": { "mode": "single", "sort": "none" }
    })
}

/// Fill parameters without configured limits from the document's `Limit` blocks.
///
/// Document limits are in the storage unit and are converted to the
/// parameter's export unit; limits that cannot be converted are left unset.
pub fn apply_document_limits(schema: &mut ParameterSchema, document: &HealthDocument) {
    let updates: Vec<(String, ParameterSpec)> = schema
        .iter()
        .filter(|(_, spec)| spec.limits.is_empty())
        .filter_map(|(name, spec)| {
            let source = ParameterSchema::source_of(name, spec);
            let series = document.series_for(source)?;
            if series.limits.is_empty() {
                return None;
            }
            let storage_unit = document
                .declaration_for(series)
                .and_then(|decl| decl.storage_unit.as_deref());
            let limits = match (storage_unit, spec.unit.as_deref()) {
                (Some(from), Some(to)) => convert_limits(&series.limits, from, to)?,
                _ => series.limits,
            };
            let mut spec = spec.clone();
            spec.limits = limits;
            Some((name.to_string(), spec))
        })
        .collect();

    for (name, spec) in updates {
        debug!(parameter = %name, "Using limits from document");
        schema.insert(name, spec);
    }
}

fn convert_limits(limits: &Limits, from: &str, to: &str) -> Option<Limits> {
    let convert = |value: Option<f64>| -> Option<Option<f64>> {
        match value {
            Some(v) => units::convert(v, from, to).map(Some),
            None => Some(None),
        }
    };
    Some(Limits {
        critical_min: convert(limits.critical_min)?,
        warning_min: convert(limits.warning_min)?,
        caution_min: convert(limits.caution_min)?,
        caution_max: convert(limits.caution_max)?,
        warning_max: convert(limits.warning_max)?,
        critical_max: convert(limits.critical_max)?,
    })
}

/// Default output file for a device: `grafana/grafana_<device>.json`.
///
/// Characters outside `[A-Za-z0-9_-]` become `_`, so the device name always
/// stays a single file name inside `grafana/`.
pub fn default_output_path(device: &str) -> PathBuf {
    let stem: String = device
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    PathBuf::from("grafana").join(format!("grafana_{}.json", stem))
}

/// Write the dashboard JSON, creating parent directories.
pub fn write_dashboard(dashboard: &Dashboard, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let mut json = dashboard.to_json()?;
    json.push('\n');
    std::fs::write(path, json)?;
    Ok(())
}
