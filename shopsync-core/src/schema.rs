//! Static table schemas and the per-entity catalogue.
//!
//! Each entity type owns one `SchemaDefinition`, shared by its staging and
//! main tables so the two can never drift apart.

use serde::Serialize;
use std::fmt;

/// Warehouse column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    String,
    Integer,
    Float,
    Timestamp,
}

impl ColumnType {
    /// BigQuery standard SQL type name.
    pub fn bigquery_name(&self) -> &'static str {
        match self {
            ColumnType::String => "STRING",
            ColumnType::Integer => "INTEGER",
            ColumnType::Float => "FLOAT",
            ColumnType::Timestamp => "TIMESTAMP",
        }
    }

    /// SQLite storage class used for this column.
    pub fn sqlite_name(&self) -> &'static str {
        match self {
            ColumnType::String | ColumnType::Timestamp => "TEXT",
            ColumnType::Integer => "INTEGER",
            ColumnType::Float => "REAL",
        }
    }
}

/// Schema for a single column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ColumnSchema {
    pub name: &'static str,
    pub dtype: ColumnType,
    pub required: bool,
}

impl ColumnSchema {
    const fn required(name: &'static str, dtype: ColumnType) -> Self {
        Self {
            name,
            dtype,
            required: true,
        }
    }

    const fn nullable(name: &'static str, dtype: ColumnType) -> Self {
        Self {
            name,
            dtype,
            required: false,
        }
    }
}

/// Ordered column list for one entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SchemaDefinition {
    pub columns: &'static [ColumnSchema],
}

impl SchemaDefinition {
    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.name).collect()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

pub const CUSTOMERS_SCHEMA: SchemaDefinition = SchemaDefinition {
    columns: &[
        ColumnSchema::required("customer_id", ColumnType::String),
        ColumnSchema::nullable("email", ColumnType::String),
        ColumnSchema::nullable("first_name", ColumnType::String),
        ColumnSchema::nullable("last_name", ColumnType::String),
        ColumnSchema::nullable("created_at", ColumnType::Timestamp),
        ColumnSchema::nullable("updated_at", ColumnType::Timestamp),
        ColumnSchema::nullable("orders_count", ColumnType::Integer),
        ColumnSchema::nullable("total_spent", ColumnType::Float),
    ],
};

pub const PRODUCTS_SCHEMA: SchemaDefinition = SchemaDefinition {
    columns: &[
        ColumnSchema::required("product_id", ColumnType::String),
        ColumnSchema::nullable("title", ColumnType::String),
        ColumnSchema::nullable("vendor", ColumnType::String),
        ColumnSchema::nullable("product_type", ColumnType::String),
        ColumnSchema::nullable("created_at", ColumnType::Timestamp),
        ColumnSchema::nullable("updated_at", ColumnType::Timestamp),
        ColumnSchema::nullable("price", ColumnType::Float),
    ],
};

/// The entity types a run syncs, in run order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Customers,
    Products,
}

impl EntityType {
    /// Fixed run order: customers, then products.
    pub const ALL: [EntityType; 2] = [EntityType::Customers, EntityType::Products];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Customers => "customers",
            EntityType::Products => "products",
        }
    }

    /// Path of the collection relative to the source API base.
    pub fn resource_path(&self) -> &'static str {
        match self {
            EntityType::Customers => "customers.json",
            EntityType::Products => "products.json",
        }
    }

    /// Name of the array field holding records in each response page.
    pub fn response_key(&self) -> &'static str {
        self.as_str()
    }

    /// Natural-key column used as the merge key.
    pub fn key_column(&self) -> &'static str {
        match self {
            EntityType::Customers => "customer_id",
            EntityType::Products => "product_id",
        }
    }

    pub fn table_name(&self) -> &'static str {
        self.as_str()
    }

    pub fn staging_table_name(&self) -> String {
        format!("{}_staging", self.table_name())
    }

    pub fn schema(&self) -> SchemaDefinition {
        match self {
            EntityType::Customers => CUSTOMERS_SCHEMA,
            EntityType::Products => PRODUCTS_SCHEMA,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
