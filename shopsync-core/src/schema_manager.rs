//! Create-if-absent provisioning of the dataset and entity tables.
//!
//! Existing tables are trusted as-is: there is no schema diffing or migration.
//! Losing a create race to another caller counts as success.

use tracing::{debug, info};

use crate::error::{SchemaError, WarehouseError};
use crate::schema::SchemaDefinition;
use crate::warehouse::{DatasetRef, TableRef, Warehouse};

/// Make sure `dataset` exists, creating it in `location` if needed.
pub async fn ensure_dataset(
    warehouse: &dyn Warehouse,
    dataset: &DatasetRef,
    location: &str,
) -> Result<(), SchemaError> {
    let wrap = |source: WarehouseError| SchemaError::Dataset {
        dataset: dataset.to_string(),
        source,
    };

    if warehouse.dataset_exists(dataset).await.map_err(wrap)? {
        debug!(dataset = %dataset, "Dataset already present");
        return Ok(());
    }

    match warehouse.create_dataset(dataset, location).await {
        Ok(()) => {
            info!(dataset = %dataset, location, "Created dataset");
            Ok(())
        }
        Err(e) if e.is_already_exists() => {
            debug!(dataset = %dataset, "Dataset created concurrently");
            Ok(())
        }
        Err(e) => Err(wrap(e)),
    }
}

/// Make sure `table` exists with `schema`, keyed on `key`.
pub async fn ensure_table(
    warehouse: &dyn Warehouse,
    table: &TableRef,
    schema: &SchemaDefinition,
    key: &str,
) -> Result<(), SchemaError> {
    let wrap = |source: WarehouseError| SchemaError::Table {
        table: table.to_string(),
        source,
    };

    if warehouse.table_exists(table).await.map_err(wrap)? {
        debug!(table = %table, "Table already present");
        return Ok(());
    }

    match warehouse.create_table(table, schema, key).await {
        Ok(()) => {
            info!(table = %table, columns = schema.len(), "Created table");
            Ok(())
        }
        Err(e) if e.is_already_exists() => {
            debug!(table = %table, "Table created concurrently");
            Ok(())
        }
        Err(e) => Err(wrap(e)),
    }
}
