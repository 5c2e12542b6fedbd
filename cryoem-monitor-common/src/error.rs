use std::path::PathBuf;

use thiserror::Error;

/// Common error type for CryoEM monitor components.
#[derive(Debug, Error)]
pub enum Error {
    /// The health monitor XML file is missing or cannot be read.
    #[error("Source unavailable '{}': {source}", path.display())]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The health monitor XML could not be parsed (includes partially written files).
    #[error("Malformed source '{}': {reason}", path.display())]
    MalformedSource { path: PathBuf, reason: String },

    /// A schema parameter is present in the document but its value has the wrong type or unit.
    #[error("Schema mismatch for parameter '{parameter}': {reason}")]
    SchemaMismatch { parameter: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a `SourceUnavailable` error for the given path.
    pub fn unavailable(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::SourceUnavailable {
            path: path.into(),
            source,
        }
    }

    /// Create a `MalformedSource` error for the given path.
    pub fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::MalformedSource {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a `SchemaMismatch` error for the given parameter.
    pub fn mismatch(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::SchemaMismatch {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }

    /// Stable short name, used as a log field and metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::SourceUnavailable { .. } => "source_unavailable",
            Error::MalformedSource { .. } => "malformed_source",
            Error::SchemaMismatch { .. } => "schema_mismatch",
            Error::Config(_) => "config",
            Error::Json(_) => "json",
            Error::Io(_) => "io",
        }
    }

    /// Whether a collection cycle can simply be retried on the next tick.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::SourceUnavailable { .. }
                | Error::MalformedSource { .. }
                | Error::SchemaMismatch { .. }
        )
    }
}

/// Result type alias using the monitor's Error.
pub type Result<T> = std::result::Result<T, Error>;
