//! Mapping from a parsed Health Monitor document to Measurements.
//!
//! For every schema entry the mapper looks up the value series by XML
//! parameter name or ID, takes the newest sample, interprets it as a number,
//! boolean or enumeration literal, and converts it from the document's
//! storage unit to the schema unit. Schema entries without a series are
//! reported as missing, never exported as zero.

use std::collections::BTreeMap;

use tracing::{trace, warn};

use cryoem_monitor_common::healthxml::Sample;
use cryoem_monitor_common::{
    DEVICE_LABEL, Error, HealthDocument, Measurement, MetricKind, ParameterDecl, ParameterSchema,
    ParameterSpec, Result, SUBSYSTEM_LABEL, units,
};

use crate::config::MismatchPolicy;

/// Device name used when neither configuration nor the document names one.
pub const UNKNOWN_DEVICE: &str = "unknown";

/// Result of mapping one document.
#[derive(Debug, Default)]
pub struct MappedCycle {
    /// Resolved device name.
    pub device: String,
    /// Exported values, in schema order.
    pub measurements: Vec<Measurement>,
    /// Schema parameters with no value in the document.
    pub missing: Vec<String>,
    /// Parameters dropped because their value did not fit the schema.
    pub mismatches: Vec<Error>,
}

/// Converts documents into measurements according to a [`ParameterSchema`].
#[derive(Debug, Clone)]
pub struct ParameterMapper {
    schema: ParameterSchema,
    device_override: Option<String>,
    policy: MismatchPolicy,
    default_labels: BTreeMap<String, String>,
}

impl ParameterMapper {
    pub fn new(
        schema: ParameterSchema,
        device_override: Option<String>,
        policy: MismatchPolicy,
    ) -> Self {
        Self {
            schema,
            device_override,
            policy,
            default_labels: BTreeMap::new(),
        }
    }

    /// Labels added to every measurement. `device` and `subsystem` win on conflict.
    pub fn with_default_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.default_labels = labels;
        self
    }

    pub fn schema(&self) -> &ParameterSchema {
        &self.schema
    }

    /// Device name for a document: override, then instrument name.
    pub fn device_name(&self, document: &HealthDocument) -> String {
        self.device_override
            .clone()
            .or_else(|| document.instrument_name().map(str::to_string))
            .unwrap_or_else(|| UNKNOWN_DEVICE.to_string())
    }

    /// Map a document.
    ///
    /// With [`MismatchPolicy::SkipCycle`] the first mismatch is returned as
    /// the error; otherwise mismatches are collected in the result.
    pub fn map(&self, document: &HealthDocument) -> Result<MappedCycle> {
        let mut cycle = MappedCycle {
            device: self.device_name(document),
            ..Default::default()
        };

        for (name, spec) in self.schema.iter() {
            let source = ParameterSchema::source_of(name, spec);

            let Some((series, sample)) = document
                .series_for(source)
                .and_then(|series| series.latest_sample().map(|sample| (series, sample)))
            else {
                trace!(parameter = name, source, "Parameter absent from document");
                cycle.missing.push(name.to_string());
                continue;
            };

            let decl = document.declaration_for(series);
            match self.measure(name, spec, sample, decl, document, &cycle.device) {
                Ok(measurement) => cycle.measurements.push(measurement),
                Err(e) => match self.policy {
                    MismatchPolicy::SkipCycle => return Err(e),
                    MismatchPolicy::SkipParameter => {
                        warn!(parameter = name, error = %e, "Dropping mismatched parameter");
                        cycle.mismatches.push(e);
                    }
                },
            }
        }

        Ok(cycle)
    }

    fn measure(
        &self,
        name: &str,
        spec: &ParameterSpec,
        sample: &Sample,
        decl: Option<&ParameterDecl>,
        document: &HealthDocument,
        device: &str,
    ) -> Result<Measurement> {
        let raw = sample.raw.trim();
        let storage_unit = decl.and_then(|d| d.storage_unit.as_deref());

        let (value, unit) = match raw.parse::<f64>() {
            Ok(value) if !value.is_finite() => {
                return Err(Error::mismatch(name, format!("non-finite value '{}'", raw)));
            }
            Ok(value) => convert_unit(name, value, storage_unit, spec.unit.as_deref())?,
            Err(_) => {
                let value = parse_symbolic(raw, sample, decl, spec, document).ok_or_else(|| {
                    Error::mismatch(name, format!("cannot interpret '{}' as a number", raw))
                })?;
                (value, spec.unit.clone())
            }
        };

        if spec.kind == MetricKind::Counter && value < 0.0 {
            return Err(Error::mismatch(
                name,
                format!("negative value {} for a counter", value),
            ));
        }

        let mut measurement = Measurement::new(name, value)
            .with_kind(spec.kind)
            .with_labels(self.default_labels.clone())
            .with_label(DEVICE_LABEL, device);
        if let Some(decl) = decl.filter(|d| !d.subsystem.is_empty()) {
            measurement = measurement.with_label(SUBSYSTEM_LABEL, decl.subsystem.clone());
        }
        if let Some(unit) = unit {
            measurement = measurement.with_unit(unit);
        }
        Ok(measurement)
    }
}

/// Convert a numeric value from the storage unit to the schema unit.
///
/// A missing storage unit is taken to already be the schema unit.
fn convert_unit(
    name: &str,
    value: f64,
    from: Option<&str>,
    to: Option<&str>,
) -> Result<(f64, Option<String>)> {
    match (from, to) {
        (Some(from), Some(to)) => units::convert(value, from, to)
            .map(|converted| (converted, Some(to.to_string())))
            .ok_or_else(|| {
                Error::mismatch(name, format!("cannot convert from '{}' to '{}'", from, to))
            }),
        (Some(from), None) => Ok((value, Some(from.to_string()))),
        (None, to) => Ok((value, to.map(str::to_string))),
    }
}

/// Interpret a non-numeric value: boolean, enumeration literal, or state label.
fn parse_symbolic(
    raw: &str,
    sample: &Sample,
    decl: Option<&ParameterDecl>,
    spec: &ParameterSpec,
    document: &HealthDocument,
) -> Option<f64> {
    if raw.eq_ignore_ascii_case("true") {
        return Some(1.0);
    }
    if raw.eq_ignore_ascii_case("false") {
        return Some(0.0);
    }

    let type_names = [
        sample.value_type.as_deref(),
        decl.and_then(|d| d.data_type.as_deref()),
    ];
    let from_enumeration = type_names
        .into_iter()
        .flatten()
        .filter_map(|t| document.enumerations.get(t))
        .find_map(|e| e.literal_value(raw));
    if let Some(value) = from_enumeration {
        return Some(value as f64);
    }

    spec.states
        .iter()
        .find(|(_, label)| label.as_str() == raw)
        .and_then(|(key, _)| key.parse::<f64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cryoem_monitor_common::{PanelType, parse_document};
    use std::path::Path;

    const DOC: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<HealthMonitor>
  <Enumerations>
    <Enumeration Name="ValveState"><Literal Name="Closed">0</Literal><Literal Name="Open">1</Literal></Enumeration>
  </Enumerations>
  <Instruments>
    <Instrument Name="krios-2" DisplayName="Krios 2">
      <Component Name="Column">
        <Parameter ID="1" Name="temperature" Type="Float" StorageUnit="°C"/>
        <Parameter ID="2" Name="LensTemp" Type="Float" StorageUnit="K"/>
        <Parameter ID="3" Name="Valve" Type="ValveState"/>
      </Component>
      <Component Name="Detector">
        <Parameter ID="4" Name="Exposures" Type="Int32"/>
        <Parameter ID="5" Name="Gain" Type="Float" StorageUnit="V"/>
      </Component>
    </Instrument>
  </Instruments>
  <Values Instrument="krios-2">
    <ValueData ParameterID="1" Parameter="temperature">
      <ParameterValues>
        <ParameterValue Timestamp="2024-05-01T00:00:00"><Value Type="Float">20.5</Value></ParameterValue>
      </ParameterValues>
    </ValueData>
    <ValueData ParameterID="2" Parameter="LensTemp">
      <ParameterValues>
        <ParameterValue Timestamp="2024-05-01T00:10:00"><Value Type="Float">293.65</Value></ParameterValue>
        <ParameterValue Timestamp="2024-05-01T00:05:00"><Value Type="Float">280.00</Value></ParameterValue>
      </ParameterValues>
    </ValueData>
    <ValueData ParameterID="3" Parameter="Valve">
      <ParameterValues>
        <ParameterValue Timestamp="2024-05-01T00:00:00"><Value Type="ValveState">Open</Value></ParameterValue>
      </ParameterValues>
    </ValueData>
    <ValueData ParameterID="4" Parameter="Exposures">
      <ParameterValues>
        <ParameterValue Timestamp="2024-05-01T00:00:00"><Value Type="Int32">-3</Value></ParameterValue>
      </ParameterValues>
    </ValueData>
    <ValueData ParameterID="5" Parameter="Gain">
      <ParameterValues>
        <ParameterValue Timestamp="2024-05-01T00:00:00"><Value Type="String">saturated</Value></ParameterValue>
      </ParameterValues>
    </ValueData>
    <ValueData ParameterID="99" Parameter="Undeclared">
      <ParameterValues>
        <ParameterValue Timestamp="2024-05-01T00:00:00"><Value Type="Boolean">True</Value></ParameterValue>
      </ParameterValues>
    </ValueData>
  </Values>
</HealthMonitor>"#;

    fn doc() -> HealthDocument {
        parse_document(Path::new("test.xml"), DOC.as_bytes()).unwrap()
    }

    fn source(unit: Option<&str>, source: &str) -> ParameterSpec {
        ParameterSpec {
            source: Some(source.to_string()),
            ..ParameterSpec::gauge("", unit)
        }
    }

    #[test]
    fn test_present_parameters_only() {
        let schema = ParameterSchema::new()
            .with("temperature", ParameterSpec::gauge("Temperature", Some("°C")))
            .with("vacuum", ParameterSpec::gauge("Vacuum", Some("Pa")));
        let mapper = ParameterMapper::new(schema, None, MismatchPolicy::SkipParameter);

        let cycle = mapper.map(&doc()).unwrap();

        assert_eq!(cycle.measurements.len(), 1);
        let m = &cycle.measurements[0];
        assert_eq!(m.name, "temperature");
        assert_eq!(m.value, 20.5);
        assert_eq!(m.unit.as_deref(), Some("°C"));
        assert_eq!(cycle.missing, vec!["vacuum".to_string()]);
        assert!(cycle.mismatches.is_empty());
    }

    #[test]
    fn test_labels_device_and_subsystem() {
        let schema = ParameterSchema::new().with("temperature", ParameterSpec::default());
        let mut defaults = BTreeMap::new();
        defaults.insert("site".to_string(), "lab".to_string());
        defaults.insert(DEVICE_LABEL.to_string(), "ignored".to_string());
        let mapper = ParameterMapper::new(schema, None, MismatchPolicy::SkipParameter)
            .with_default_labels(defaults);

        let cycle = mapper.map(&doc()).unwrap();
        let m = &cycle.measurements[0];
        assert_eq!(cycle.device, "krios-2");
        assert_eq!(m.device(), Some("krios-2"));
        assert_eq!(m.labels.get(SUBSYSTEM_LABEL).map(String::as_str), Some("Column"));
        assert_eq!(m.labels.get("site").map(String::as_str), Some("lab"));
        // Storage unit is kept when the schema names none
        assert_eq!(m.unit.as_deref(), Some("°C"));
    }

    #[test]
    fn test_device_override() {
        let schema = ParameterSchema::new().with("temperature", ParameterSpec::default());
        let mapper = ParameterMapper::new(
            schema,
            Some("scope-a".to_string()),
            MismatchPolicy::SkipParameter,
        );
        let cycle = mapper.map(&doc()).unwrap();
        assert_eq!(cycle.device, "scope-a");
        assert_eq!(cycle.measurements[0].device(), Some("scope-a"));

        let mapper = ParameterMapper::new(ParameterSchema::new(), None, MismatchPolicy::SkipParameter);
        assert_eq!(mapper.device_name(&HealthDocument::default()), UNKNOWN_DEVICE);
    }

    #[test]
    fn test_unit_conversion_uses_latest_sample() {
        let schema = ParameterSchema::new().with("lens_temperature", source(Some("°C"), "LensTemp"));
        let mapper = ParameterMapper::new(schema, None, MismatchPolicy::SkipParameter);

        let cycle = mapper.map(&doc()).unwrap();
        let m = &cycle.measurements[0];
        assert!((m.value - 20.5).abs() < 1e-9);
        assert_eq!(m.unit.as_deref(), Some("°C"));
    }

    #[test]
    fn test_incompatible_unit_is_mismatch() {
        let schema = ParameterSchema::new()
            .with("lens_temperature", source(Some("Pa"), "2"))
            .with("temperature", ParameterSpec::default());
        let mapper = ParameterMapper::new(schema, None, MismatchPolicy::SkipParameter);

        let cycle = mapper.map(&doc()).unwrap();
        assert_eq!(cycle.measurements.len(), 1);
        assert_eq!(cycle.measurements[0].name, "temperature");
        assert_eq!(cycle.mismatches.len(), 1);
        assert!(matches!(
            &cycle.mismatches[0],
            Error::SchemaMismatch { parameter, .. } if parameter == "lens_temperature"
        ));
    }

    #[test]
    fn test_skip_cycle_policy() {
        let schema = ParameterSchema::new()
            .with("gain", source(None, "Gain"))
            .with("temperature", ParameterSpec::default());
        let mapper = ParameterMapper::new(schema, None, MismatchPolicy::SkipCycle);

        let err = mapper.map(&doc()).unwrap_err();
        assert_eq!(err.kind(), "schema_mismatch");
        assert!(err.to_string().contains("saturated"));
    }

    #[test]
    fn test_enumeration_literal_and_boolean() {
        let schema = ParameterSchema::new()
            .with(
                "valve",
                ParameterSpec {
                    panel: PanelType::State,
                    ..source(None, "3")
                },
            )
            .with("flag", source(None, "Undeclared"));
        let mapper = ParameterMapper::new(schema, None, MismatchPolicy::SkipParameter);

        let cycle = mapper.map(&doc()).unwrap();
        let by_name: BTreeMap<_, _> = cycle
            .measurements
            .iter()
            .map(|m| (m.name.as_str(), m))
            .collect();
        assert_eq!(by_name["valve"].value, 1.0);
        assert_eq!(by_name["flag"].value, 1.0);
        assert!(!by_name["flag"].labels.contains_key(SUBSYSTEM_LABEL));
    }

    #[test]
    fn test_state_label_fallback() {
        let mut states = BTreeMap::new();
        states.insert("7".to_string(), "saturated".to_string());
        let schema = ParameterSchema::new().with(
            "gain",
            ParameterSpec {
                states,
                ..source(None, "Gain")
            },
        );
        let mapper = ParameterMapper::new(schema, None, MismatchPolicy::SkipCycle);
        let cycle = mapper.map(&doc()).unwrap();
        assert_eq!(cycle.measurements[0].value, 7.0);
    }

    #[test]
    fn test_negative_counter_is_mismatch() {
        let schema = ParameterSchema::new()
            .with(
                "exposures",
                ParameterSpec {
                    kind: MetricKind::Counter,
                    ..source(None, "Exposures")
                },
            )
            .with("exposures_gauge", source(None, "Exposures"));
        let mapper = ParameterMapper::new(schema, None, MismatchPolicy::SkipParameter);

        let cycle = mapper.map(&doc()).unwrap();
        assert_eq!(cycle.measurements.len(), 1);
        assert_eq!(cycle.measurements[0].name, "exposures_gauge");
        assert_eq!(cycle.measurements[0].value, -3.0);
        assert_eq!(cycle.mismatches.len(), 1);
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let mapper = ParameterMapper::new(
            ParameterSchema::new().with("temperature", ParameterSpec::default()),
            None,
            MismatchPolicy::SkipCycle,
        );
        let cycle = mapper.map(&doc()).unwrap();
        assert_eq!(cycle.measurements.len(), 1);
        assert!(cycle.missing.is_empty());
    }
}
