//! Metrics exporter holding the measurement set of the last good cycle.
//!
//! The current set lives in an immutable [`Snapshot`] that is swapped as a
//! whole, together with the cycle statistics, under one lock. An update only
//! swaps the pointer and bumps counters; a scrape copies both under the read
//! lock and renders after releasing it. A scrape therefore never waits on
//! rendering and never mixes values or statistics from two different cycles.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use cryoem_monitor_common::naming::{
    EXPORTER_CYCLE_FAILURES, EXPORTER_CYCLES, EXPORTER_LAST_SUCCESS, EXPORTER_MISMATCHES,
    EXPORTER_SERIES, PARAMETER_MISSING, escape_label_value,
};
use cryoem_monitor_common::{
    DEVICE_LABEL, Error, Measurement, ParameterSchema, metric_name, sanitize_label_name,
};

use crate::mapping::MappedCycle;

/// Failure reasons that are always rendered, even at zero.
const FAILURE_REASONS: [&str; 3] = ["source_unavailable", "malformed_source", "schema_mismatch"];

/// Measurements of one collection cycle.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Sequence number of the update that produced this snapshot (0 = none yet).
    pub sequence: u64,
    /// Device the measurements belong to.
    pub device: Option<String>,
    pub measurements: Vec<Measurement>,
    /// Schema parameters absent from the document.
    pub missing: Vec<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Exporter statistics.
#[derive(Debug, Clone, Default)]
pub struct ExporterStats {
    /// Collection cycles attempted (successful or not).
    pub cycles_total: u64,
    /// Successful updates.
    pub updates_total: u64,
    /// Skipped cycles by error kind.
    pub failures: BTreeMap<&'static str, u64>,
    /// Parameters dropped for not fitting the schema.
    pub mismatched_parameters: u64,
    /// Time of the last successful update.
    pub last_success: Option<DateTime<Utc>>,
}

/// Exposed snapshot and the statistics that go with it.
#[derive(Default)]
struct State {
    snapshot: Arc<Snapshot>,
    stats: ExporterStats,
}

/// Thread-safe holder of the exposed measurement set.
pub struct MetricsExporter {
    prefix: String,
    state: RwLock<State>,
    /// HELP text per canonical parameter name.
    help: RwLock<Arc<BTreeMap<String, String>>>,
}

/// Create a shareable exporter handle.
pub type SharedExporter = Arc<MetricsExporter>;

impl MetricsExporter {
    /// Create an exporter with an empty snapshot.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            state: RwLock::new(State::default()),
            help: RwLock::new(Arc::new(BTreeMap::new())),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Use schema labels and units as HELP text.
    pub fn describe(&self, schema: &ParameterSchema) {
        let help: BTreeMap<String, String> = schema
            .iter()
            .map(|(name, spec)| {
                let label = spec
                    .description
                    .as_deref()
                    .unwrap_or_else(|| ParameterSchema::label_of(name, spec));
                let text = match &spec.unit {
                    Some(unit) => format!("{} [{}]", label, unit),
                    None => label.to_string(),
                };
                (name.to_string(), text)
            })
            .collect();
        *self.help.write() = Arc::new(help);
    }

    /// Replace the exposed set with `measurements`.
    pub fn update(&self, measurements: Vec<Measurement>) {
        let device = measurements
            .iter()
            .find_map(|m| m.device())
            .map(str::to_string);
        self.publish(device, measurements, Vec::new(), 0);
    }

    /// Replace the exposed set with the result of a mapped cycle.
    pub fn update_cycle(&self, cycle: MappedCycle) {
        let mismatches = cycle.mismatches.len() as u64;
        self.publish(
            Some(cycle.device),
            cycle.measurements,
            cycle.missing,
            mismatches,
        );
    }

    fn publish(
        &self,
        device: Option<String>,
        measurements: Vec<Measurement>,
        missing: Vec<String>,
        mismatches: u64,
    ) {
        let now = Utc::now();
        let series = measurements.len();
        let missing_count = missing.len();

        let (sequence, previous) = {
            let mut state = self.state.write();
            state.stats.cycles_total += 1;
            state.stats.updates_total += 1;
            state.stats.mismatched_parameters += mismatches;
            state.stats.last_success = Some(now);

            let snapshot = Arc::new(Snapshot {
                sequence: state.stats.updates_total,
                device,
                measurements,
                missing,
                updated_at: Some(now),
            });
            let sequence = snapshot.sequence;
            (sequence, std::mem::replace(&mut state.snapshot, snapshot))
        };

        debug!(
            sequence,
            series,
            missing = missing_count,
            "Published snapshot"
        );
        drop(previous);
    }

    /// Count a skipped cycle. The exposed set is left unchanged.
    pub fn record_failure(&self, error: &Error) {
        let mut state = self.state.write();
        state.stats.cycles_total += 1;
        *state.stats.failures.entry(error.kind()).or_default() += 1;
    }

    /// The currently exposed snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.state.read().snapshot.clone()
    }

    /// Whether at least one cycle has succeeded.
    pub fn has_data(&self) -> bool {
        self.state.read().stats.updates_total > 0
    }

    pub fn stats(&self) -> ExporterStats {
        self.state.read().stats.clone()
    }

    /// Render the current snapshot in Prometheus text exposition format.
    pub fn scrape(&self) -> String {
        let (snapshot, stats) = {
            let state = self.state.read();
            (state.snapshot.clone(), state.stats.clone())
        };
        let help = self.help.read().clone();
        self.render(&snapshot, &help, &stats)
    }

    fn render(
        &self,
        snapshot: &Snapshot,
        help: &BTreeMap<String, String>,
        stats: &ExporterStats,
    ) -> String {
        let mut output = Vec::with_capacity(snapshot.measurements.len() * 100 + 1024);

        // Group by metric name for HELP/TYPE comments, sorted for stable output
        let mut by_name: BTreeMap<String, Vec<&Measurement>> = BTreeMap::new();
        for m in &snapshot.measurements {
            by_name
                .entry(metric_name(&self.prefix, &m.name))
                .or_default()
                .push(m);
        }

        for (name, series) in &by_name {
            let first = series[0];
            let text = help.get(&first.name).cloned().unwrap_or_else(|| match &first.unit {
                Some(unit) => format!("{} [{}]", first.name, unit),
                None => first.name.clone(),
            });
            writeln!(output, "# HELP {} {}", name, escape_help(&text)).ok();
            writeln!(output, "# TYPE {} {}", name, first.kind).ok();

            for m in series {
                writeln!(
                    output,
                    "{}{} {}",
                    name,
                    format_labels(&m.labels),
                    format_value(m.value)
                )
                .ok();
            }
        }

        if !snapshot.missing.is_empty() {
            let name = metric_name(&self.prefix, PARAMETER_MISSING);
            let device = snapshot.device.as_deref().unwrap_or_default();
            writeln!(
                output,
                "# HELP {} Schema parameter absent from the last health monitor export.",
                name
            )
            .ok();
            writeln!(output, "# TYPE {} gauge", name).ok();
            for parameter in &snapshot.missing {
                let mut labels = BTreeMap::new();
                labels.insert(DEVICE_LABEL.to_string(), device.to_string());
                labels.insert("parameter".to_string(), parameter.clone());
                writeln!(output, "{}{} 1", name, format_labels(&labels)).ok();
            }
        }

        // Exporter self-metrics
        let cycles = metric_name(&self.prefix, EXPORTER_CYCLES);
        writeln!(output).ok();
        writeln!(output, "# HELP {} Collection cycles attempted.", cycles).ok();
        writeln!(output, "# TYPE {} counter", cycles).ok();
        writeln!(output, "{} {}", cycles, stats.cycles_total).ok();

        let failures_name = metric_name(&self.prefix, EXPORTER_CYCLE_FAILURES);
        writeln!(
            output,
            "# HELP {} Collection cycles skipped, by reason.",
            failures_name
        )
        .ok();
        writeln!(output, "# TYPE {} counter", failures_name).ok();
        let mut failures: BTreeMap<&str, u64> =
            FAILURE_REASONS.iter().map(|reason| (*reason, 0)).collect();
        failures.extend(stats.failures.iter().map(|(k, v)| (*k, *v)));
        for (reason, count) in failures {
            writeln!(
                output,
                "{}{{reason=\"{}\"}} {}",
                failures_name, reason, count
            )
            .ok();
        }

        let mismatches = metric_name(&self.prefix, EXPORTER_MISMATCHES);
        writeln!(
            output,
            "# HELP {} Parameters dropped for not matching the schema.",
            mismatches
        )
        .ok();
        writeln!(output, "# TYPE {} counter", mismatches).ok();
        writeln!(output, "{} {}", mismatches, stats.mismatched_parameters).ok();

        if let Some(last) = stats.last_success {
            let name = metric_name(&self.prefix, EXPORTER_LAST_SUCCESS);
            writeln!(
                output,
                "# HELP {} Unix time of the last successful cycle.",
                name
            )
            .ok();
            writeln!(output, "# TYPE {} gauge", name).ok();
            writeln!(
                output,
                "{} {}",
                name,
                format_value(last.timestamp_millis() as f64 / 1000.0)
            )
            .ok();
        }

        let series = metric_name(&self.prefix, EXPORTER_SERIES);
        writeln!(output, "# HELP {} Parameter series currently exposed.", series).ok();
        writeln!(output, "# TYPE {} gauge", series).ok();
        writeln!(output, "{} {}", series, snapshot.measurements.len()).ok();

        String::from_utf8(output).unwrap_or_default()
    }
}

/// Escape HELP text (backslash and newline).
fn escape_help(text: &str) -> String {
    text.replace('\\', "\\\\").replace('\n', "\\n")
}

/// Format a floating point value for Prometheus.
fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}

/// Format labels for Prometheus exposition format.
fn format_labels(labels: &BTreeMap<String, String>) -> String {
    if labels.is_empty() {
        return String::new();
    }

    let parts: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", sanitize_label_name(k), escape_label_value(v)))
        .collect();

    format!("{{{}}}", parts.join(","))
}
