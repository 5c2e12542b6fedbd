//! Integration tests for the Prometheus exporter.
//!
//! These tests run the collection driver against real files and scrape the
//! result through the HTTP server.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use cryoem_monitor_common::{Error, ParameterSchema, ParameterSpec};
use cryoem_monitor_exporter::{
    CollectionDriver, ExporterConfig, HttpServer, MetricsExporter, MismatchPolicy, SharedExporter,
};

const CONFIG: &str = r#"{
    source: { interval_secs: 1 },
    prometheus: { listen: "127.0.0.1:0", default_labels: { site: "lab-1" } },
    schema: {
        parameters: {
            temperature: { display_label: "Lens temperature", unit: "°C", source: "LensTemperature" },
            vacuum: { display_label: "Column vacuum", unit: "Pa", source: "2001" },
            autoloader_state: { panel: "state", source: "AutoloaderState" },
            cassette_loads: { kind: "counter", source: "CassetteLoads" },
            camera_temperature: { unit: "°C", source: "CameraTemperature" },
        },
    },
}"#;

fn fixture_path() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../cryoem-monitor-common/tests/fixtures/health_monitor.xml")
}

/// Helper to parse a Prometheus text line into (series, value).
fn parse_prometheus_line(line: &str) -> Option<(&str, f64)> {
    if line.starts_with('#') || line.trim().is_empty() {
        return None;
    }
    let (series, value) = line.rsplit_once(' ')?;
    Some((series, value.parse().ok()?))
}

fn value_of(output: &str, prefix: &str) -> Option<f64> {
    output
        .lines()
        .filter_map(parse_prometheus_line)
        .find(|(series, _)| series.starts_with(prefix))
        .map(|(_, value)| value)
}

fn setup(path: PathBuf) -> (Arc<ExporterConfig>, SharedExporter, CollectionDriver) {
    let config = Arc::new(ExporterConfig::parse(CONFIG).unwrap());
    let exporter = Arc::new(MetricsExporter::new(config.prometheus.prefix.clone()));
    let driver = CollectionDriver::new(&config, path, exporter.clone());
    (config, exporter, driver)
}

#[tokio::test]
async fn test_fixture_cycle_exports_converted_values() {
    let (_, exporter, mut driver) = setup(fixture_path());

    assert_eq!(driver.run_cycle().await.unwrap(), 4);
    let output = exporter.scrape();

    // 293.65 K -> 20.5 °C
    let temperature = value_of(&output, "cryoem_temperature{").unwrap();
    assert!((temperature - 20.5).abs() < 1e-9);
    assert!(output.contains("# HELP cryoem_temperature Lens temperature [°C]"));
    assert!(output.contains(
        "cryoem_temperature{device=\"3594\",site=\"lab-1\",subsystem=\"Column/ObjectiveLens\"}"
    ));

    // 2.5e-7 mbar -> 2.5e-5 Pa
    let vacuum = value_of(&output, "cryoem_vacuum{").unwrap();
    assert!((vacuum - 2.5e-5).abs() < 1e-15);

    assert_eq!(value_of(&output, "cryoem_autoloader_state{"), Some(0.0));
    assert!(output.contains("# TYPE cryoem_cassette_loads counter"));
    assert_eq!(value_of(&output, "cryoem_cassette_loads{"), Some(128.0));

    // Declared but without values: absent, never zero
    assert!(!output.contains("cryoem_camera_temperature{"));
    assert!(output.contains(
        "cryoem_parameter_missing{device=\"3594\",parameter=\"camera_temperature\"} 1"
    ));
    assert_eq!(value_of(&output, "cryoem_exporter_series_total"), Some(4.0));
}

#[tokio::test]
async fn test_file_replaced_between_cycles() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("HealthMonitor.xml");
    let full = std::fs::read_to_string(fixture_path()).unwrap();
    std::fs::write(&path, &full).unwrap();

    let (_, exporter, mut driver) = setup(path.clone());
    driver.run_cycle().await.unwrap();
    let first = exporter.snapshot();

    // Partial write in progress
    std::fs::write(&path, &full.as_bytes()[..full.len() * 2 / 3]).unwrap();
    assert!(matches!(
        driver.run_cycle().await,
        Err(Error::MalformedSource { .. })
    ));
    assert!(Arc::ptr_eq(&first, &exporter.snapshot()));

    // Export rewritten with a newer lens temperature sample
    let updated = full.replace(
        r#"<ParameterValue Timestamp="2024-05-01T00:45:00"><Value Type="Float">293.65</Value></ParameterValue>"#,
        r#"<ParameterValue Timestamp="2024-05-01T00:45:00"><Value Type="Float">293.65</Value></ParameterValue>
        <ParameterValue Timestamp="2024-05-01T00:55:00"><Value Type="Float">294.15</Value></ParameterValue>"#,
    );
    std::fs::write(&path, updated).unwrap();
    driver.run_cycle().await.unwrap();

    let output = exporter.scrape();
    let temperature = value_of(&output, "cryoem_temperature{").unwrap();
    assert!((temperature - 21.0).abs() < 1e-9);
    assert!(output.contains("cryoem_exporter_cycle_failures_total{reason=\"malformed_source\"} 1"));
    assert_eq!(value_of(&output, "cryoem_exporter_cycles_total"), Some(3.0));
}

#[tokio::test]
async fn test_skip_cycle_policy_keeps_previous_state() {
    let mut config = ExporterConfig::parse(CONFIG).unwrap();
    config.mapping.on_mismatch = MismatchPolicy::SkipCycle;
    config.schema.parameters = ParameterSchema::new()
        .with(
            "temperature",
            ParameterSpec {
                source: Some("LensTemperature".to_string()),
                ..ParameterSpec::gauge("Lens temperature", Some("°C"))
            },
        )
        .with(
            "vacuum_in_volts",
            ParameterSpec {
                source: Some("2001".to_string()),
                ..ParameterSpec::gauge("Vacuum", Some("V"))
            },
        );

    let exporter = Arc::new(MetricsExporter::new("cryoem"));
    let mut driver = CollectionDriver::new(&config, fixture_path(), exporter.clone());

    let err = driver.run_cycle().await.unwrap_err();
    assert_eq!(err.kind(), "schema_mismatch");
    assert!(!exporter.has_data());
    assert!(!exporter.scrape().contains("cryoem_temperature"));
}

#[tokio::test]
async fn test_http_server_serves_driver_output() {
    let (config, exporter, driver) = setup(fixture_path());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = HttpServer::new(exporter.clone(), config.clone(), addr);
    let server_handle = tokio::spawn(server.serve(listener, shutdown_rx.clone()));
    let driver_handle = tokio::spawn(driver.run(shutdown_rx));

    // First tick runs immediately
    for _ in 0..100 {
        if exporter.has_data() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let client = reqwest::Client::new();

    let ready = client
        .get(format!("http://{}/ready", addr))
        .send()
        .await
        .unwrap();
    assert!(ready.status().is_success());

    let response = client
        .get(format!("http://{}/metrics", addr))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let body = response.text().await.unwrap();
    assert!(body.contains("cryoem_temperature{"));
    assert!(body.contains("cryoem_exporter_cycles_total"));

    let config_text = client
        .get(format!("http://{}/config", addr))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let config_json: serde_json::Value = serde_json::from_str(&config_text).unwrap();
    assert_eq!(config_json["source"]["interval_secs"], 1);

    shutdown_tx.send(true).unwrap();
    let stopped = tokio::time::timeout(Duration::from_secs(5), async {
        let _ = server_handle.await;
        let _ = driver_handle.await;
    })
    .await;
    assert!(stopped.is_ok(), "server and driver should stop on shutdown");
}
