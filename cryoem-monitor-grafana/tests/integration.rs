//! Dashboard generation against the shared health monitor fixture.

use std::path::{Path, PathBuf};

use serde_json::Value;

use cryoem_monitor_common::{ParameterSchema, read_document};
use cryoem_monitor_grafana::{
    Color, DashboardOptions, GrafanaConfig, apply_document_limits, generate, write_dashboard,
};

fn fixture_path() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../cryoem-monitor-common/tests/fixtures/health_monitor.xml")
}

fn discovered_schema() -> ParameterSchema {
    let (_, document) = read_document(&fixture_path(), "*.xml").unwrap();
    ParameterSchema::discover(&document)
}

#[test]
fn test_one_panel_per_discovered_parameter() {
    let schema = discovered_schema();
    let dashboard = generate("3594", &schema, &DashboardOptions::default());

    assert_eq!(dashboard.panels.len(), schema.len());
    assert_eq!(dashboard.panels.len(), 6);

    let exprs: Vec<&str> = dashboard
        .panels
        .iter()
        .map(|p| p.targets[0].expr.as_str())
        .collect();
    assert!(exprs.contains(&r#"cryoem_LensTemperature_1041{device="3594"}"#));
    assert!(exprs.contains(&r#"cryoem_CameraTemperature_4001{device="3594"}"#));
}

#[test]
fn test_generation_is_deterministic() {
    let options = DashboardOptions {
        datasource_uid: Some("prom".to_string()),
        ..Default::default()
    };

    let first = generate("Talos Arctica", &discovered_schema(), &options)
        .to_json()
        .unwrap();
    let second = generate("Talos Arctica", &discovered_schema(), &options)
        .to_json()
        .unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_fixture_limits_become_thresholds() {
    let schema = discovered_schema();
    let dashboard = generate("3594", &schema, &DashboardOptions::default());

    let lens = dashboard
        .panels
        .iter()
        .find(|p| p.targets[0].expr.starts_with("cryoem_LensTemperature_1041"))
        .unwrap();
    assert_eq!(lens.panel_type, "gauge");
    assert_eq!(lens.field_config.defaults.unit.as_deref(), Some("kelvin"));

    let steps = &lens.field_config.defaults.thresholds.steps;
    let colors: Vec<Color> = steps.iter().map(|s| s.color).collect();
    assert_eq!(
        colors,
        vec![Color::Red, Color::Orange, Color::Green, Color::Orange, Color::Red]
    );
    assert_eq!(steps[0].value, None);
    assert_eq!(steps[1].value, Some(285.0));
    assert_eq!(steps[4].value, Some(303.0));

    let vacuum = dashboard
        .panels
        .iter()
        .find(|p| p.targets[0].expr.starts_with("cryoem_VacuumIGP1_2001"))
        .unwrap();
    let colors: Vec<Color> = vacuum
        .field_config
        .defaults
        .thresholds
        .steps
        .iter()
        .map(|s| s.color)
        .collect();
    assert_eq!(
        colors,
        vec![Color::Green, Color::Yellow, Color::Orange, Color::Red]
    );
}

#[test]
fn test_enumerations_become_state_panels() {
    let json: Value = serde_json::from_str(
        &generate("3594", &discovered_schema(), &DashboardOptions::default())
            .to_json()
            .unwrap(),
    )
    .unwrap();

    let panel = json["panels"]
        .as_array()
        .unwrap()
        .iter()
        .find(|p| {
            p["targets"][0]["expr"]
                .as_str()
                .unwrap()
                .starts_with("cryoem_AutoloaderState_3001")
        })
        .unwrap();

    assert_eq!(panel["type"], "state-timeline");
    let options = &panel["fieldConfig"]["defaults"]["mappings"][0]["options"];
    assert_eq!(options["0"]["text"], "Idle");
    assert_eq!(options["1"]["text"], "Loading");
    assert_eq!(options["2"]["text"], "Error");
    assert_eq!(panel["options"]["mergeValues"], true);
}

#[test]
fn test_configured_schema_takes_document_limits() {
    let config = GrafanaConfig::parse(
        r#"{
            prometheus: { prefix: "em" },
            schema: {
                parameters: {
                    temperature: { display_label: "Lens temperature", unit: "°C", source: "LensTemperature" },
                    loads: { kind: "counter", source: "CassetteLoads" },
                },
            },
            grafana: { columns: 1 },
        }"#,
    )
    .unwrap();

    let (_, document) = read_document(&fixture_path(), "*.xml").unwrap();
    let mut schema = config.schema.parameters.clone();
    apply_document_limits(&mut schema, &document);

    // 285 K .. 303 K, exported in °C
    let limits = schema.get("temperature").unwrap().limits;
    assert!((limits.critical_min.unwrap() - 11.85).abs() < 1e-9);
    assert!((limits.critical_max.unwrap() - 29.85).abs() < 1e-9);
    assert!(schema.get("loads").unwrap().limits.is_empty());

    let dashboard = generate("krios", &schema, &config.to_options());
    assert_eq!(dashboard.panels.len(), 2);
    assert!(dashboard.panels.iter().all(|p| p.grid_pos.w == 24));
    assert_eq!(dashboard.panels[1].grid_pos.y, 8);
    assert_eq!(
        dashboard.panels[1].targets[0].expr,
        r#"em_temperature{device="krios"}"#
    );
}

#[test]
fn test_write_dashboard_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("grafana").join("grafana_3594.json");

    let dashboard = generate("3594", &discovered_schema(), &DashboardOptions::default());
    write_dashboard(&dashboard, &path).unwrap();

    let json: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(json["title"], "3594 Health Monitor");
    assert_eq!(json["uid"], "cryoem-3594");
    assert_eq!(json["panels"].as_array().unwrap().len(), 6);
}
