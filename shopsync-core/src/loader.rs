//! Stage-and-merge loading of typed rows into a main table.
//!
//! The full batch is truncate-written to a staging table, merged into the main
//! table on the natural key in one set-based statement, and the staging table
//! is dropped. Merge only starts after staging succeeded, and cleanup is tried
//! after every attempt that got as far as staging.

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{LoadError, LoadStep};
use crate::schema::{EntityType, SchemaDefinition};
use crate::transform::TypedRow;
use crate::warehouse::{DatasetRef, TableRef, Warehouse};

/// Where one entity type's rows land.
#[derive(Debug, Clone)]
pub struct LoadTarget {
    pub main: TableRef,
    pub staging: TableRef,
    pub schema: SchemaDefinition,
    pub key: &'static str,
}

impl LoadTarget {
    pub fn for_entity(dataset: &DatasetRef, entity: EntityType) -> Self {
        Self {
            main: dataset.table(entity.table_name()),
            staging: dataset.table(entity.staging_table_name()),
            schema: entity.schema(),
            key: entity.key_column(),
        }
    }
}

/// Outcome of a successful load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    /// Rows written to the staging table.
    pub staged: u64,
    /// Rows inserted or updated by the merge, when the warehouse reports it.
    pub merged: Option<u64>,
    /// Whether the staging table was confirmed gone afterwards.
    pub staging_removed: bool,
    /// Cleanup failure message; cleanup problems never fail the load.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup_error: Option<String>,
}

/// Upsert `rows` into `target.main` through `target.staging`.
///
/// On a merge failure the staging table is still dropped and the merge error
/// is returned; the main table keeps its previous content.
pub async fn stage_and_merge(
    warehouse: &dyn Warehouse,
    target: &LoadTarget,
    rows: &[TypedRow],
) -> Result<LoadReport, LoadError> {
    let staged = match warehouse
        .load_truncate(&target.staging, &target.schema, target.key, rows)
        .await
    {
        Ok(staged) => staged,
        Err(source) => {
            cleanup(warehouse, &target.staging).await;
            return Err(LoadError::new(
                LoadStep::StageLoad,
                target.staging.to_string(),
                source,
            ));
        }
    };
    info!(table = %target.staging, rows = staged, "Staged rows");

    let merged = match merge(warehouse, target).await {
        Ok(merged) => merged,
        Err(err) => {
            cleanup(warehouse, &target.staging).await;
            return Err(err);
        }
    };
    info!(table = %target.main, rows = ?merged, "Merge completed");

    let (staging_removed, cleanup_error) = match cleanup(warehouse, &target.staging).await {
        Ok(()) => (true, None),
        Err(err) => (false, Some(err.to_string())),
    };

    Ok(LoadReport {
        staged,
        merged,
        staging_removed,
        cleanup_error,
    })
}

async fn merge(warehouse: &dyn Warehouse, target: &LoadTarget) -> Result<Option<u64>, LoadError> {
    let wrap = |source| LoadError::new(LoadStep::Merge, target.main.to_string(), source);
    let statement = warehouse
        .dialect()
        .upsert(&target.main, &target.staging, &target.schema, target.key)
        .map_err(wrap)?;
    warehouse.execute(&statement).await.map_err(wrap)
}

/// Drop the staging table. Failures are logged and handed back for the
/// report, never propagated as a load failure.
async fn cleanup(warehouse: &dyn Warehouse, staging: &TableRef) -> Result<(), LoadError> {
    match warehouse.delete_table(staging).await {
        Ok(existed) => {
            info!(table = %staging, existed, "Deleted staging table");
            Ok(())
        }
        Err(source) => {
            let err = LoadError::new(LoadStep::Cleanup, staging.to_string(), source);
            warn!(table = %staging, error = %err, "Staging cleanup failed");
            Err(err)
        }
    }
}
