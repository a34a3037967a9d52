//! Pipeline orchestration: one run syncs every entity type and reads back a
//! bounded sample of each main table.
//!
//! Per entity type the order is fixed: ensure tables, fetch, transform, then
//! stage, merge and clean up. An empty fetch skips the load for that entity
//! type. Any failure ends the run with a `PipelineError` naming the step.

use serde::Serialize;
use serde_json::{Value, json};
use tracing::{Instrument, info, info_span};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::error::{ConfigError, LoadError, LoadStep, PipelineError, PipelineStep, SyncError};
use crate::loader::{LoadReport, LoadTarget, stage_and_merge};
use crate::schema::EntityType;
use crate::schema_manager::{ensure_dataset, ensure_table};
use crate::source::{ResourceFetcher, ShopifyClient};
use crate::transform::transform;
use crate::warehouse::{self, DatasetRef, QueryRow, Warehouse};

/// Project label used for backends that have no project concept.
const LOCAL_PROJECT: &str = "local";

/// What happened to one entity type during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityReport {
    pub entity: EntityType,
    pub pages: usize,
    pub fetched: usize,
    pub loaded: usize,
    /// Nothing was fetched, so no load ran.
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load: Option<LoadReport>,
}

/// Result of a successful run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineOutput {
    pub customers: Vec<QueryRow>,
    pub products: Vec<QueryRow>,
    pub report: Vec<EntityReport>,
}

impl PipelineOutput {
    pub fn rows(&self, entity: EntityType) -> &[QueryRow] {
        match entity {
            EntityType::Customers => &self.customers,
            EntityType::Products => &self.products,
        }
    }

    /// Up to `n` rows per entity type, keyed by entity name.
    pub fn analysis_context(&self, n: usize) -> Value {
        let take = |rows: &[QueryRow]| -> Vec<Value> {
            rows.iter().take(n).cloned().map(Value::Object).collect()
        };
        json!({
            "customers": take(&self.customers),
            "products": take(&self.products),
        })
    }

    pub fn report_for(&self, entity: EntityType) -> Option<&EntityReport> {
        self.report.iter().find(|r| r.entity == entity)
    }
}

/// Shared inputs for the steps of one run.
pub struct PipelineRunContext<'a> {
    pub run_id: Uuid,
    pub config: &'a SyncConfig,
    pub fetcher: &'a dyn ResourceFetcher,
    pub warehouse: &'a dyn Warehouse,
    pub dataset: DatasetRef,
}

impl<'a> PipelineRunContext<'a> {
    pub fn new(
        config: &'a SyncConfig,
        fetcher: &'a dyn ResourceFetcher,
        warehouse: &'a dyn Warehouse,
    ) -> Self {
        let project = if config.warehouse.project_id.trim().is_empty() {
            LOCAL_PROJECT.to_string()
        } else {
            config.warehouse.project_id.clone()
        };
        Self {
            run_id: Uuid::new_v4(),
            config,
            fetcher,
            warehouse,
            dataset: DatasetRef::new(project, config.warehouse.dataset_id.clone()),
        }
    }

    async fn sync_entity(&self, entity: EntityType) -> Result<EntityReport, PipelineError> {
        let target = LoadTarget::for_entity(&self.dataset, entity);

        for table in [&target.main, &target.staging] {
            ensure_table(self.warehouse, table, &target.schema, target.key)
                .await
                .map_err(at(entity, PipelineStep::EnsureTables))?;
        }

        let collection = self
            .fetcher
            .fetch_all(entity.resource_path(), entity.response_key())
            .await
            .map_err(at(entity, PipelineStep::Fetch))?;

        if collection.is_empty() {
            info!(entity = %entity, "No records fetched, skipping load");
            return Ok(EntityReport {
                entity,
                pages: collection.pages,
                fetched: 0,
                loaded: 0,
                skipped: true,
                load: None,
            });
        }

        let rows =
            transform(&collection.records, entity).map_err(at(entity, PipelineStep::Transform))?;

        let load = stage_and_merge(self.warehouse, &target, &rows)
            .await
            .map_err(at(entity, PipelineStep::Load))?;

        Ok(EntityReport {
            entity,
            pages: collection.pages,
            fetched: collection.len(),
            loaded: rows.len(),
            skipped: false,
            load: Some(load),
        })
    }

    async fn read_back(&self, entity: EntityType) -> Result<Vec<QueryRow>, PipelineError> {
        let main = self.dataset.table(entity.table_name());
        let wrap = |source| {
            PipelineError::new(
                Some(entity),
                PipelineStep::ReadBack,
                LoadError::new(LoadStep::ReadBack, main.to_string(), source),
            )
        };
        let statement = self
            .warehouse
            .dialect()
            .select_limit(&main, &entity.schema(), self.config.pipeline.sample_limit)
            .map_err(wrap)?;
        let rows = self.warehouse.query(&statement).await.map_err(wrap)?;
        info!(entity = %entity, rows = rows.len(), "Read back rows");
        Ok(rows)
    }

    async fn run(&self) -> Result<PipelineOutput, PipelineError> {
        info!(
            source = self.fetcher.source_name(),
            dataset = %self.dataset,
            concurrent = self.config.pipeline.concurrent_entities,
            "Starting pipeline run"
        );

        ensure_dataset(self.warehouse, &self.dataset, &self.config.warehouse.location)
            .await
            .map_err(|e| PipelineError::new(None, PipelineStep::EnsureDataset, e))?;

        let report = if self.config.pipeline.concurrent_entities {
            // Every entity runs to completion; the first error in entity order wins.
            futures::future::join_all(EntityType::ALL.map(|entity| self.sync_entity(entity)))
                .await
                .into_iter()
                .collect::<Result<Vec<_>, _>>()?
        } else {
            let mut report = Vec::with_capacity(EntityType::ALL.len());
            for entity in EntityType::ALL {
                report.push(self.sync_entity(entity).await?);
            }
            report
        };

        let output = PipelineOutput {
            customers: self.read_back(EntityType::Customers).await?,
            products: self.read_back(EntityType::Products).await?,
            report,
        };
        info!(
            customers = output.customers.len(),
            products = output.products.len(),
            "Pipeline run complete"
        );
        Ok(output)
    }
}

fn at<E: Into<SyncError>>(
    entity: EntityType,
    step: PipelineStep,
) -> impl FnOnce(E) -> PipelineError {
    move |e| PipelineError::new(Some(entity), step, e)
}

/// Run the pipeline against the source and warehouse `config` points at.
pub async fn run_pipeline(config: &SyncConfig) -> Result<PipelineOutput, PipelineError> {
    let configure = |e: ConfigError| PipelineError::new(None, PipelineStep::Configure, e);

    config.validate().map_err(configure)?;
    let fetcher = ShopifyClient::new(&config.shop, &config.http).map_err(|e| {
        configure(ConfigError::Invalid {
            message: e.to_string(),
        })
    })?;
    let warehouse = warehouse::connect(&config.warehouse, config.http.timeout_secs)
        .await
        .map_err(configure)?;

    run_with(config, &fetcher, warehouse.as_ref()).await
}

/// Run the pipeline with caller-supplied source and warehouse.
pub async fn run_with(
    config: &SyncConfig,
    fetcher: &dyn ResourceFetcher,
    warehouse: &dyn Warehouse,
) -> Result<PipelineOutput, PipelineError> {
    let ctx = PipelineRunContext::new(config, fetcher, warehouse);
    let span = info_span!("pipeline_run", run_id = %ctx.run_id);
    ctx.run().instrument(span).await
}
