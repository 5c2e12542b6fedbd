//! Prometheus exporter for electron microscope Health Monitor exports.
//!
//! The exporter periodically reads the instrument's Health Monitor XML file,
//! maps the configured parameters to measurements and exposes them via an
//! HTTP `/metrics` endpoint.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │ Health Monitor  │────>│ Collection      │────>│ Metrics         │────>│   HTTP Server   │
//! │ XML export      │     │ Driver + Mapper │     │ Exporter (swap) │     │   (/metrics)    │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! cryoem-monitor-exporter --config monitor.json5 --path /data/HealthMonitor.xml --server 9090
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod config;
pub mod driver;
pub mod exporter;
pub mod http;
pub mod mapping;

pub use config::{ExporterConfig, MismatchPolicy};
pub use driver::CollectionDriver;
pub use exporter::{MetricsExporter, SharedExporter, Snapshot};
pub use http::HttpServer;
pub use mapping::{MappedCycle, ParameterMapper};
