//! Error types for the shopsync core library.
//!
//! Uses `thiserror` for one error enum per component boundary (configuration,
//! fetch, transform, schema, load) plus a backend-level `WarehouseError`.
//! The pipeline composes them into a single `PipelineError` that records the
//! entity type and step that failed.

use std::fmt;
use std::path::PathBuf;

use crate::schema::EntityType;

/// Top-level error type for the sync core.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Transform error: {0}")]
    Transform(#[from] TransformError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Load error: {0}")]
    Load(#[from] LoadError),
}

impl SyncError {
    /// The error category, for callers that want to branch on it.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Config(_) => ErrorKind::Configuration,
            SyncError::Fetch(_) => ErrorKind::Fetch,
            SyncError::Transform(_) => ErrorKind::Transform,
            SyncError::Schema(_) => ErrorKind::Schema,
            SyncError::Load(_) => ErrorKind::Load,
        }
    }
}

/// Coarse error category exposed to calling layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Fetch,
    Transform,
    Schema,
    Load,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Fetch => "fetch",
            ErrorKind::Transform => "transform",
            ErrorKind::Schema => "schema",
            ErrorKind::Load => "load",
        };
        f.write_str(s)
    }
}

/// Errors from resolving and validating run configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required fields: {}", fields.join(", "))]
    MissingFields { fields: Vec<String> },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },

    #[error("Failed to read warehouse credentials from {path}: {message}")]
    Credentials { path: PathBuf, message: String },
}

/// Errors from pulling a resource collection off the source API.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Request for {resource} failed: {source}")]
    Transport {
        resource: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Request for {resource} returned HTTP {status}: {body}")]
    Status {
        resource: String,
        status: u16,
        body: String,
    },

    #[error("Response for {resource} is not valid: {message}")]
    InvalidBody { resource: String, message: String },

    #[error("Response for {resource} has no '{key}' array")]
    MissingKey { resource: String, key: String },

    #[error("Invalid source URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },
}

impl FetchError {
    /// Name of the resource collection the failed request targeted.
    pub fn resource(&self) -> Option<&str> {
        match self {
            FetchError::Transport { resource, .. }
            | FetchError::Status { resource, .. }
            | FetchError::InvalidBody { resource, .. }
            | FetchError::MissingKey { resource, .. } => Some(resource),
            FetchError::InvalidUrl { .. } => None,
        }
    }
}

/// Errors from mapping raw records into typed rows.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("{entity} record {index}: missing required field '{field}'")]
    MissingField {
        entity: EntityType,
        index: usize,
        field: String,
    },

    #[error("{entity} record {index}: invalid value for '{field}': {message}")]
    InvalidField {
        entity: EntityType,
        index: usize,
        field: String,
        message: String,
    },

    #[error("{entity} record {index}: duplicate key '{key}' in batch")]
    DuplicateKey {
        entity: EntityType,
        index: usize,
        key: String,
    },
}

/// Errors from provisioning datasets and tables.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Failed to ensure dataset {dataset}: {source}")]
    Dataset {
        dataset: String,
        #[source]
        source: WarehouseError,
    },

    #[error("Failed to ensure table {table}: {source}")]
    Table {
        table: String,
        #[source]
        source: WarehouseError,
    },
}

/// The warehouse write or read sub-step a load failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStep {
    StageLoad,
    Merge,
    Cleanup,
    /// Bounded read of the main table after the load.
    ReadBack,
}

impl fmt::Display for LoadStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoadStep::StageLoad => "stage-load",
            LoadStep::Merge => "merge",
            LoadStep::Cleanup => "cleanup",
            LoadStep::ReadBack => "read-back",
        };
        f.write_str(s)
    }
}

/// Errors from the stage-and-merge loader.
#[derive(Debug, thiserror::Error)]
#[error("{step} failed for {table}: {source}")]
pub struct LoadError {
    pub step: LoadStep,
    pub table: String,
    #[source]
    pub source: WarehouseError,
}

impl LoadError {
    pub fn new(step: LoadStep, table: impl Into<String>, source: WarehouseError) -> Self {
        Self {
            step,
            table: table.into(),
            source,
        }
    }
}

/// Backend-level errors raised by a warehouse implementation.
#[derive(Debug, thiserror::Error)]
pub enum WarehouseError {
    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Already exists: {resource}")]
    AlreadyExists { resource: String },

    #[error("HTTP error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Warehouse API returned HTTP {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Warehouse job failed: {message}")]
    Job { message: String },

    #[error("Warehouse authentication failed: {message}")]
    Auth { message: String },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to decode warehouse response: {message}")]
    Decode { message: String },

    #[error("Invalid identifier: '{ident}'")]
    InvalidIdentifier { ident: String },

    #[error("Blocking task failed: {message}")]
    Blocking { message: String },
}

impl WarehouseError {
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn already_exists(resource: impl Into<String>) -> Self {
        Self::AlreadyExists {
            resource: resource.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, WarehouseError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, WarehouseError::AlreadyExists { .. })
    }
}

/// The pipeline step a run failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStep {
    Configure,
    EnsureDataset,
    EnsureTables,
    Fetch,
    Transform,
    Load,
    ReadBack,
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineStep::Configure => "configure",
            PipelineStep::EnsureDataset => "ensure-dataset",
            PipelineStep::EnsureTables => "ensure-tables",
            PipelineStep::Fetch => "fetch",
            PipelineStep::Transform => "transform",
            PipelineStep::Load => "load",
            PipelineStep::ReadBack => "read-back",
        };
        f.write_str(s)
    }
}

/// The single failure value a pipeline run returns.
#[derive(Debug, thiserror::Error)]
#[error(
    "Pipeline failed at {step}{}: {source}",
    .entity.map(|e| format!(" for {e}")).unwrap_or_default()
)]
pub struct PipelineError {
    /// `None` for steps that are not tied to an entity type.
    pub entity: Option<EntityType>,
    pub step: PipelineStep,
    #[source]
    pub source: SyncError,
}

impl PipelineError {
    pub fn new(entity: Option<EntityType>, step: PipelineStep, source: impl Into<SyncError>) -> Self {
        Self {
            entity,
            step,
            source: source.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }

    /// Format with the full `source()` chain, one cause per line.
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);
        let mut source = std::error::Error::source(&self.source);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }
        output
    }
}

/// A type alias for results using the top-level `SyncError`.
pub type Result<T> = std::result::Result<T, SyncError>;
