//! Prometheus-compatible naming shared by the exporter and the dashboard generator.

/// Sanitize a metric name to be Prometheus-compatible.
///
/// Prometheus metric names must match `[a-zA-Z_:][a-zA-Z0-9_:]*`.
/// Invalid characters become underscores, runs of underscores collapse,
/// and a leading digit gets an underscore prefix.
pub fn sanitize_metric_name(name: &str) -> String {
    let mut result = String::with_capacity(name.len() + 1);
    let mut last_was_underscore = false;

    if name.starts_with(|c: char| c.is_ascii_digit()) {
        result.push('_');
        last_was_underscore = true;
    }

    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == ':' {
            result.push(c);
            last_was_underscore = false;
        } else if !last_was_underscore {
            result.push('_');
            last_was_underscore = true;
        }
    }

    while result.ends_with('_') {
        result.pop();
    }

    if result.is_empty() {
        result.push_str("unnamed");
    }

    result
}

/// Sanitize a label name to be Prometheus-compatible.
///
/// Prometheus label names must match `[a-zA-Z_][a-zA-Z0-9_]*`.
/// Labels starting with `__` are reserved for internal use.
pub fn sanitize_label_name(name: &str) -> String {
    let mut result = String::with_capacity(name.len());
    let mut last_was_underscore = false;

    for (i, c) in name.chars().enumerate() {
        let valid = if i == 0 {
            c.is_ascii_alphabetic() || c == '_'
        } else {
            c.is_ascii_alphanumeric() || c == '_'
        };

        if valid {
            result.push(c);
            last_was_underscore = c == '_';
        } else if !last_was_underscore {
            result.push('_');
            last_was_underscore = true;
        }
    }

    while result.ends_with('_') {
        result.pop();
    }

    if result.is_empty() {
        return "label".to_string();
    }

    if result.starts_with("__") {
        result.insert(0, 'z');
    }

    result
}

/// Build the exported metric name of a schema parameter.
///
/// Format: `{prefix}_{parameter}`, or just the sanitized parameter when the
/// prefix is empty.
pub fn metric_name(prefix: &str, parameter: &str) -> String {
    let parameter = sanitize_metric_name(parameter);
    if prefix.is_empty() {
        parameter
    } else {
        format!("{}_{}", sanitize_metric_name(prefix), parameter)
    }
}

/// Exporter series for schema parameters absent from the document.
pub const PARAMETER_MISSING: &str = "parameter_missing";
pub const EXPORTER_CYCLES: &str = "exporter_cycles_total";
pub const EXPORTER_CYCLE_FAILURES: &str = "exporter_cycle_failures_total";
pub const EXPORTER_MISMATCHES: &str = "exporter_parameter_mismatches_total";
pub const EXPORTER_LAST_SUCCESS: &str = "exporter_last_success_timestamp_seconds";
pub const EXPORTER_SERIES: &str = "exporter_series_total";

/// Names the exporter uses for its own series. Parameters must not map onto them.
pub const RESERVED_METRIC_NAMES: [&str; 6] = [
    PARAMETER_MISSING,
    EXPORTER_CYCLES,
    EXPORTER_CYCLE_FAILURES,
    EXPORTER_MISMATCHES,
    EXPORTER_LAST_SUCCESS,
    EXPORTER_SERIES,
];

/// Whether `name` matches `[a-zA-Z_:][a-zA-Z0-9_:]*`.
pub fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// Escape special characters in label values.
pub fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}
