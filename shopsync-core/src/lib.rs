//! # shopsync-core — Shopify to warehouse sync
//!
//! Pulls complete customer and product collections from the Shopify Admin REST
//! API, maps them onto fixed warehouse schemas, and upserts them into BigQuery
//! (or a local SQLite warehouse) through a staging table and a keyed merge.
//!
//! ## Run shape
//!
//! 1. **Fetch**: follow `Link: rel="next"` until the collection is exhausted.
//! 2. **Transform**: one raw record to one typed row, defaults for absent fields.
//! 3. **Load**: truncate-write to staging, merge on the natural key, drop staging.
//! 4. **Read back**: a bounded sample of each main table for the caller.

// Foundation
pub mod config;
pub mod error;
pub mod schema;

// Source side
pub mod source;
pub mod transform;

// Warehouse side
pub mod loader;
pub mod schema_manager;
pub mod warehouse;

// Orchestration
pub mod pipeline;

// Re-exports
pub use config::{SyncConfig, load_config};
pub use error::{ErrorKind, PipelineError, PipelineStep, SyncError};
pub use pipeline::{EntityReport, PipelineOutput, run_pipeline, run_with};
pub use schema::EntityType;
pub use source::{RawRecord, ResourceFetcher, ShopifyClient};
pub use transform::{TypedRow, transform};
pub use warehouse::{BigQueryWarehouse, SqliteWarehouse, Warehouse};
