// ⚠️ Pipeline Errors - one typed enum per boundary
// Stage-level failures abort the run; row-level ones live in the reports.

use std::path::PathBuf;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

// ============================================================================
// INGESTION
// ============================================================================

#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("credentials for dataset source rejected: {0}")]
    Authentication(String),

    #[error("dataset '{dataset}' not found under {root}")]
    DatasetNotFound { dataset: String, root: PathBuf },

    #[error("file '{file}' not found in dataset '{dataset}'")]
    FileNotFound { dataset: String, file: String },

    #[error("dataset '{dataset}' does not contain a CSV file")]
    NoCsvFile { dataset: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed CSV in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("{path} is missing required column '{column}'")]
    MissingColumn { path: PathBuf, column: &'static str },
}

// ============================================================================
// SINK
// ============================================================================

#[derive(Debug, Error)]
pub enum SinkError {
    /// Destination store unreachable. Fatal for the stage that hits it.
    #[error("cannot reach store at {location}: {source}")]
    Connection {
        location: String,
        #[source]
        source: BoxError,
    },

    #[error("invalid identifier '{0}'")]
    InvalidIdentifier(String),

    #[error("schema '{0}' is not attached to this store")]
    UnknownSchema(String),

    #[error("table {schema}.{table} declares no key columns, upsert needs one")]
    MissingKey { schema: String, table: String },

    #[error("statement on {schema}.{table} failed: {source}")]
    Query {
        schema: String,
        table: String,
        #[source]
        source: rusqlite::Error,
    },
}

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("environment variable {key} has invalid value '{value}'")]
    InvalidEnv { key: String, value: String },

    #[error("failed to load category rules from {path}: {message}")]
    Rules { path: PathBuf, message: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// DIMENSIONAL MODELING
// ============================================================================

/// A fact row needed a dimension row that could not be built, and the
/// dimension carries no sentinel to fall back on.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("cannot resolve {dimension} for natural key {natural_key:?}: {reason}")]
pub struct DimensionResolutionError {
    pub dimension: &'static str,
    pub natural_key: Option<String>,
    pub reason: String,
}

// ============================================================================
// PIPELINE
// ============================================================================

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Ingestion(#[from] IngestionError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("run {0} has no rows in the raw store")]
    UnknownRun(String),

    #[error("failed to write run output {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize {what}: {source}")]
    Serialize {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}
