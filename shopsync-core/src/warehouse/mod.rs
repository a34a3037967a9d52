//! Warehouse abstraction and its BigQuery and SQLite backends.
//!
//! Every call is a blocking round-trip from the pipeline's point of view: jobs
//! are awaited to completion before the call returns.

pub mod auth;
pub mod bigquery;
pub mod sql;
pub mod sqlite;

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

use crate::config::{WarehouseBackend, WarehouseConfig};
use crate::error::{ConfigError, WarehouseError};
use crate::schema::SchemaDefinition;
use crate::transform::TypedRow;

pub use bigquery::BigQueryWarehouse;
pub use sql::{Dialect, Statement};
pub use sqlite::SqliteWarehouse;

/// One row read back from the warehouse, keyed by column name.
pub type QueryRow = Map<String, Value>;

/// A dataset identified by `project.dataset`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatasetRef {
    pub project: String,
    pub dataset: String,
}

impl DatasetRef {
    pub fn new(project: impl Into<String>, dataset: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            dataset: dataset.into(),
        }
    }

    pub fn table(&self, table: impl Into<String>) -> TableRef {
        TableRef::new(self.project.clone(), self.dataset.clone(), table)
    }
}

impl fmt::Display for DatasetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.project, self.dataset)
    }
}

/// A table identified by its `(project, dataset, table)` triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    pub fn new(
        project: impl Into<String>,
        dataset: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            dataset: dataset.into(),
            table: table.into(),
        }
    }

    pub fn dataset_ref(&self) -> DatasetRef {
        DatasetRef::new(self.project.clone(), self.dataset.clone())
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

/// Operations the pipeline needs from an analytical warehouse.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// SQL dialect statements for this warehouse must be built in.
    fn dialect(&self) -> Dialect;

    async fn dataset_exists(&self, dataset: &DatasetRef) -> Result<bool, WarehouseError>;

    /// Create a dataset. Returns `AlreadyExists` if another caller won the race.
    async fn create_dataset(&self, dataset: &DatasetRef, location: &str)
    -> Result<(), WarehouseError>;

    async fn table_exists(&self, table: &TableRef) -> Result<bool, WarehouseError>;

    /// Create a table. `key` is the natural-key column. Returns `AlreadyExists`
    /// if the table is already there.
    async fn create_table(
        &self,
        table: &TableRef,
        schema: &SchemaDefinition,
        key: &str,
    ) -> Result<(), WarehouseError>;

    /// Replace the full content of `table` with `rows` (truncate-write).
    async fn load_truncate(
        &self,
        table: &TableRef,
        schema: &SchemaDefinition,
        key: &str,
        rows: &[TypedRow],
    ) -> Result<u64, WarehouseError>;

    /// Run a DML statement to completion. Returns affected rows when known.
    async fn execute(&self, statement: &Statement) -> Result<Option<u64>, WarehouseError>;

    /// Run a query to completion and return its rows. Timestamps come back as
    /// ISO-8601 strings.
    async fn query(&self, statement: &Statement) -> Result<Vec<QueryRow>, WarehouseError>;

    /// Drop a table. Returns `false` if it did not exist.
    async fn delete_table(&self, table: &TableRef) -> Result<bool, WarehouseError>;
}

/// Build the warehouse a config points at.
pub async fn connect(
    config: &WarehouseConfig,
    timeout_secs: u64,
) -> Result<Arc<dyn Warehouse>, ConfigError> {
    match config.backend {
        WarehouseBackend::Bigquery => {
            let warehouse = BigQueryWarehouse::from_config(config, timeout_secs)?;
            Ok(Arc::new(warehouse))
        }
        WarehouseBackend::Sqlite => {
            let warehouse = match &config.sqlite_path {
                Some(path) => SqliteWarehouse::open(path).await,
                None => SqliteWarehouse::open_in_memory().await,
            }
            .map_err(|e| ConfigError::Invalid {
                message: format!("cannot open SQLite warehouse: {e}"),
            })?;
            Ok(Arc::new(warehouse))
        }
    }
}
