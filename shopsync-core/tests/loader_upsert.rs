//! Stage-and-merge behaviour against the SQLite warehouse.

use async_trait::async_trait;
use serde_json::{Value, json};
use shopsync_core::error::{LoadStep, WarehouseError};
use shopsync_core::loader::{LoadTarget, stage_and_merge};
use shopsync_core::schema::{EntityType, SchemaDefinition};
use shopsync_core::schema_manager::{ensure_dataset, ensure_table};
use shopsync_core::source::RawRecord;
use shopsync_core::transform::{TypedRow, transform};
use shopsync_core::warehouse::{
    DatasetRef, Dialect, QueryRow, SqliteWarehouse, Statement, TableRef, Warehouse,
};

fn customer_rows(values: Vec<Value>) -> Vec<TypedRow> {
    let records: Vec<RawRecord> = values
        .into_iter()
        .map(|v| RawRecord::from_value(v).unwrap())
        .collect();
    transform(&records, EntityType::Customers).unwrap()
}

async fn prepared() -> (SqliteWarehouse, LoadTarget) {
    let wh = SqliteWarehouse::open_in_memory().await.unwrap();
    let dataset = DatasetRef::new("local", "shopify_data");
    ensure_dataset(&wh, &dataset, "US").await.unwrap();
    let target = LoadTarget::for_entity(&dataset, EntityType::Customers);
    ensure_table(&wh, &target.main, &target.schema, target.key)
        .await
        .unwrap();
    ensure_table(&wh, &target.staging, &target.schema, target.key)
        .await
        .unwrap();
    (wh, target)
}

async fn main_rows(wh: &dyn Warehouse, target: &LoadTarget) -> Vec<QueryRow> {
    let stmt = wh
        .dialect()
        .select_limit(&target.main, &target.schema, 1000)
        .unwrap();
    let mut rows = wh.query(&stmt).await.unwrap();
    rows.sort_by(|a, b| {
        a["customer_id"]
            .as_str()
            .unwrap_or_default()
            .cmp(b["customer_id"].as_str().unwrap_or_default())
    });
    rows
}

#[tokio::test]
async fn test_upsert_updates_matched_and_inserts_new() {
    let (wh, target) = prepared().await;
    stage_and_merge(
        &wh,
        &target,
        &customer_rows(vec![
            json!({"id": 1, "email": "old@example.com", "orders_count": 1}),
            json!({"id": 3, "email": "keep@example.com", "orders_count": 9}),
        ]),
    )
    .await
    .unwrap();

    stage_and_merge(
        &wh,
        &target,
        &customer_rows(vec![
            json!({"id": 1, "email": "new@example.com", "orders_count": 2}),
            json!({"id": 2, "email": "added@example.com"}),
        ]),
    )
    .await
    .unwrap();

    let rows = main_rows(&wh, &target).await;
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0]["customer_id"], json!("1"));
    assert_eq!(rows[0]["email"], json!("new@example.com"));
    assert_eq!(rows[0]["orders_count"], json!(2));
    assert_eq!(rows[1]["customer_id"], json!("2"));
    assert_eq!(rows[1]["email"], json!("added@example.com"));
    assert_eq!(rows[2]["customer_id"], json!("3"));
    assert_eq!(rows[2]["email"], json!("keep@example.com"));
    assert_eq!(rows[2]["orders_count"], json!(9));
}

#[tokio::test]
async fn test_same_batch_twice_is_idempotent() {
    let (wh, target) = prepared().await;
    let batch = customer_rows(vec![
        json!({"id": 1, "email": "a@example.com", "created_at": "2024-01-02T09:00:00-05:00"}),
        json!({"id": 2, "email": "b@example.com", "total_spent": "10.00"}),
    ]);

    stage_and_merge(&wh, &target, &batch).await.unwrap();
    let first = main_rows(&wh, &target).await;
    stage_and_merge(&wh, &target, &batch).await.unwrap();
    let second = main_rows(&wh, &target).await;

    assert_eq!(first, second);
    assert_eq!(first[0]["created_at"], json!("2024-01-02T14:00:00Z"));
}

#[tokio::test]
async fn test_staging_dropped_after_success() {
    let (wh, target) = prepared().await;
    let report = stage_and_merge(&wh, &target, &customer_rows(vec![json!({"id": 1})]))
        .await
        .unwrap();

    assert_eq!(report.staged, 1);
    assert!(report.staging_removed);
    assert!(report.cleanup_error.is_none());
    assert!(!wh.table_exists(&target.staging).await.unwrap());
}

#[tokio::test]
async fn test_load_recreates_missing_staging_table() {
    let (wh, target) = prepared().await;
    stage_and_merge(&wh, &target, &customer_rows(vec![json!({"id": 1})]))
        .await
        .unwrap();
    stage_and_merge(&wh, &target, &customer_rows(vec![json!({"id": 2})]))
        .await
        .unwrap();
    assert_eq!(main_rows(&wh, &target).await.len(), 2);
}

/// Delegates to SQLite but fails the chosen operation.
struct Faulty {
    inner: SqliteWarehouse,
    fail_load: bool,
    fail_execute: bool,
    fail_delete: bool,
}

impl Faulty {
    fn new(inner: SqliteWarehouse) -> Self {
        Self {
            inner,
            fail_load: false,
            fail_execute: false,
            fail_delete: false,
        }
    }
}

fn injected(step: &str) -> WarehouseError {
    WarehouseError::Job {
        message: format!("injected {step} failure"),
    }
}

#[async_trait]
impl Warehouse for Faulty {
    fn dialect(&self) -> Dialect {
        self.inner.dialect()
    }

    async fn dataset_exists(&self, dataset: &DatasetRef) -> Result<bool, WarehouseError> {
        self.inner.dataset_exists(dataset).await
    }

    async fn create_dataset(
        &self,
        dataset: &DatasetRef,
        location: &str,
    ) -> Result<(), WarehouseError> {
        self.inner.create_dataset(dataset, location).await
    }

    async fn table_exists(&self, table: &TableRef) -> Result<bool, WarehouseError> {
        self.inner.table_exists(table).await
    }

    async fn create_table(
        &self,
        table: &TableRef,
        schema: &SchemaDefinition,
        key: &str,
    ) -> Result<(), WarehouseError> {
        self.inner.create_table(table, schema, key).await
    }

    async fn load_truncate(
        &self,
        table: &TableRef,
        schema: &SchemaDefinition,
        key: &str,
        rows: &[TypedRow],
    ) -> Result<u64, WarehouseError> {
        if self.fail_load {
            return Err(injected("load"));
        }
        self.inner.load_truncate(table, schema, key, rows).await
    }

    async fn execute(&self, statement: &Statement) -> Result<Option<u64>, WarehouseError> {
        if self.fail_execute {
            return Err(injected("merge"));
        }
        self.inner.execute(statement).await
    }

    async fn query(&self, statement: &Statement) -> Result<Vec<QueryRow>, WarehouseError> {
        self.inner.query(statement).await
    }

    async fn delete_table(&self, table: &TableRef) -> Result<bool, WarehouseError> {
        if self.fail_delete {
            return Err(injected("delete"));
        }
        self.inner.delete_table(table).await
    }
}

#[tokio::test]
async fn test_merge_failure_still_drops_staging() {
    let (wh, target) = prepared().await;
    let original = customer_rows(vec![json!({"id": 1, "email": "kept@example.com"})]);
    stage_and_merge(&wh, &target, &original).await.unwrap();

    let mut faulty = Faulty::new(wh);
    faulty.fail_execute = true;
    let err = stage_and_merge(
        &faulty,
        &target,
        &customer_rows(vec![json!({"id": 1, "email": "lost@example.com"})]),
    )
    .await
    .unwrap_err();

    assert_eq!(err.step, LoadStep::Merge);
    assert_eq!(err.table, target.main.to_string());
    assert!(!faulty.table_exists(&target.staging).await.unwrap());

    let rows = main_rows(&faulty, &target).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["email"], json!("kept@example.com"));
}

#[tokio::test]
async fn test_stage_failure_names_staging_table() {
    let (wh, target) = prepared().await;
    let mut faulty = Faulty::new(wh);
    faulty.fail_load = true;
    let err = stage_and_merge(&faulty, &target, &customer_rows(vec![json!({"id": 1})]))
        .await
        .unwrap_err();

    assert_eq!(err.step, LoadStep::StageLoad);
    assert_eq!(err.table, target.staging.to_string());
    assert!(main_rows(&faulty, &target).await.is_empty());
}

#[tokio::test]
async fn test_cleanup_failure_is_not_fatal() {
    let (wh, target) = prepared().await;
    let mut faulty = Faulty::new(wh);
    faulty.fail_delete = true;
    let report = stage_and_merge(&faulty, &target, &customer_rows(vec![json!({"id": 1})]))
        .await
        .unwrap();

    assert!(!report.staging_removed);
    assert!(report.cleanup_error.unwrap().contains("cleanup failed"));
    assert_eq!(main_rows(&faulty, &target).await.len(), 1);
}
