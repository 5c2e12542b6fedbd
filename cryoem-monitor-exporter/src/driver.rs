//! Collection driver: periodic read, map and publish.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use cryoem_monitor_common::{Error, HealthDocument, ParameterSchema, Result, read_document};

use crate::config::{ExporterConfig, SourceConfig};
use crate::exporter::SharedExporter;
use crate::mapping::ParameterMapper;

/// Runs collection cycles on a fixed interval and feeds the exporter.
pub struct CollectionDriver {
    path: PathBuf,
    source: SourceConfig,
    /// `None` until the schema has been discovered from a document.
    mapper: Option<ParameterMapper>,
    config: ExporterConfig,
    exporter: SharedExporter,
    cycle: u64,
}

impl CollectionDriver {
    /// Create a driver reading `path` (file or directory).
    pub fn new(config: &ExporterConfig, path: PathBuf, exporter: SharedExporter) -> Self {
        let mapper = if config.schema.parameters.is_empty() {
            None
        } else {
            exporter.describe(&config.schema.parameters);
            Some(Self::build_mapper(config, config.schema.parameters.clone()))
        };

        Self {
            path,
            source: config.source.clone(),
            mapper,
            config: config.clone(),
            exporter,
            cycle: 0,
        }
    }

    fn build_mapper(config: &ExporterConfig, schema: ParameterSchema) -> ParameterMapper {
        ParameterMapper::new(schema, config.device.name.clone(), config.mapping.on_mismatch)
            .with_default_labels(config.prometheus.default_labels.clone())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Schema in use, once known.
    pub fn schema(&self) -> Option<&ParameterSchema> {
        self.mapper.as_ref().map(ParameterMapper::schema)
    }

    /// Run cycles until the shutdown signal flips to `true`.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let period = Duration::from_secs(self.source.interval_secs);
        info!(
            path = %self.path.display(),
            interval_secs = self.source.interval_secs,
            "Starting collection driver"
        );

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    // Failures are logged and counted inside run_cycle
                    let _ = self.run_cycle().await;
                }
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(cycles = self.cycle, "Collection driver stopped");
    }

    /// Run one collection cycle.
    ///
    /// Returns the number of published measurements. On error the exporter
    /// keeps its previous state and the failure is counted.
    pub async fn run_cycle(&mut self) -> Result<usize> {
        self.cycle += 1;
        let cycle = self.cycle;

        match self.collect().await {
            Ok(published) => {
                debug!(cycle, published, "Collection cycle complete");
                Ok(published)
            }
            Err(e) => {
                warn!(
                    cycle,
                    kind = e.kind(),
                    error = %e,
                    "Skipping collection cycle"
                );
                self.exporter.record_failure(&e);
                Err(e)
            }
        }
    }

    async fn collect(&mut self) -> Result<usize> {
        self.refresh().await;

        let (resolved, document) = self.read().await?;

        if self.mapper.is_none() {
            let schema = ParameterSchema::discover(&document);
            if schema.is_empty() {
                return Err(Error::malformed(
                    &resolved,
                    "no parameters declared, cannot discover schema",
                ));
            }
            schema
                .validate()
                .map_err(|e| Error::malformed(&resolved, e.to_string()))?;
            info!(
                path = %resolved.display(),
                parameters = schema.len(),
                "Discovered parameter schema"
            );
            self.exporter.describe(&schema);
            self.mapper = Some(Self::build_mapper(&self.config, schema));
        }

        let Some(mapper) = self.mapper.as_ref() else {
            return Ok(0);
        };

        let mapped = mapper.map(&document)?;
        let published = mapped.measurements.len();
        if !mapped.missing.is_empty() {
            debug!(missing = ?mapped.missing, "Schema parameters absent from document");
        }
        self.exporter.update_cycle(mapped);
        Ok(published)
    }

    /// Read and parse the source off the async runtime.
    async fn read(&self) -> Result<(PathBuf, HealthDocument)> {
        let path = self.path.clone();
        let pattern = self.source.file_pattern.clone();

        tokio::task::spawn_blocking(move || read_document(&path, &pattern))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?
    }

    /// Run the configured refresh command, if any.
    ///
    /// A failing or hanging command is logged; the read still happens.
    async fn refresh(&self) {
        let Some((program, args)) = self.source.refresh_command.split_first() else {
            return;
        };

        let timeout = Duration::from_secs(self.source.refresh_timeout_secs);
        let mut command = tokio::process::Command::new(program);
        command.args(args).kill_on_drop(true);

        match tokio::time::timeout(timeout, command.status()).await {
            Ok(Ok(status)) if status.success() => {
                debug!(command = %program, "Refresh command complete");
            }
            Ok(Ok(status)) => {
                warn!(command = %program, %status, "Refresh command failed");
            }
            Ok(Err(e)) => {
                warn!(command = %program, error = %e, "Failed to run refresh command");
            }
            Err(_) => {
                warn!(
                    command = %program,
                    timeout_secs = self.source.refresh_timeout_secs,
                    "Refresh command timed out"
                );
            }
        }
    }
}
