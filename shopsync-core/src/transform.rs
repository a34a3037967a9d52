//! Raw record to typed row mapping.
//!
//! One raw record always yields exactly one row, in the same order. Absent or
//! null optional fields take the schema default; a record that breaks the
//! source contract aborts the whole batch.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::info;

use crate::error::TransformError;
use crate::schema::EntityType;
use crate::source::{FieldError, RawRecord};

/// One typed cell, in warehouse terms.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    String(String),
    Integer(i64),
    Float(f64),
    Timestamp(DateTime<Utc>),
}

impl CellValue {
    fn timestamp(value: Option<DateTime<Utc>>) -> Self {
        value.map(CellValue::Timestamp).unwrap_or(CellValue::Null)
    }

    /// JSON form used for batch loads and read-back. Timestamps are ISO-8601 in UTC.
    pub fn to_json(&self) -> Value {
        match self {
            CellValue::Null => Value::Null,
            CellValue::String(s) => Value::String(s.clone()),
            CellValue::Integer(n) => Value::from(*n),
            CellValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            CellValue::Timestamp(ts) => {
                Value::String(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
        }
    }
}

/// A customers-table row.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomerRow {
    pub customer_id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub orders_count: i64,
    pub total_spent: f64,
}

/// A products-table row.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductRow {
    pub product_id: String,
    pub title: String,
    pub vendor: String,
    pub product_type: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub price: f64,
}

/// A fixed-schema row for one entity type.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedRow {
    Customer(CustomerRow),
    Product(ProductRow),
}

impl TypedRow {
    pub fn entity(&self) -> EntityType {
        match self {
            TypedRow::Customer(_) => EntityType::Customers,
            TypedRow::Product(_) => EntityType::Products,
        }
    }

    /// Natural key.
    pub fn key(&self) -> &str {
        match self {
            TypedRow::Customer(row) => &row.customer_id,
            TypedRow::Product(row) => &row.product_id,
        }
    }

    /// Cells in the column order of `self.entity().schema()`.
    pub fn cells(&self) -> Vec<CellValue> {
        match self {
            TypedRow::Customer(row) => vec![
                CellValue::String(row.customer_id.clone()),
                CellValue::String(row.email.clone()),
                CellValue::String(row.first_name.clone()),
                CellValue::String(row.last_name.clone()),
                CellValue::timestamp(row.created_at),
                CellValue::timestamp(row.updated_at),
                CellValue::Integer(row.orders_count),
                CellValue::Float(row.total_spent),
            ],
            TypedRow::Product(row) => vec![
                CellValue::String(row.product_id.clone()),
                CellValue::String(row.title.clone()),
                CellValue::String(row.vendor.clone()),
                CellValue::String(row.product_type.clone()),
                CellValue::timestamp(row.created_at),
                CellValue::timestamp(row.updated_at),
                CellValue::Float(row.price),
            ],
        }
    }

    /// Row as a JSON object keyed by column name.
    pub fn to_json(&self) -> Map<String, Value> {
        self.entity()
            .schema()
            .columns
            .iter()
            .zip(self.cells())
            .map(|(column, cell)| (column.name.to_string(), cell.to_json()))
            .collect()
    }
}

/// Transform a fetched collection into typed rows for `entity`.
pub fn transform(records: &[RawRecord], entity: EntityType) -> Result<Vec<TypedRow>, TransformError> {
    let mut rows = Vec::with_capacity(records.len());
    let mut seen = HashSet::with_capacity(records.len());

    for (index, record) in records.iter().enumerate() {
        let fields = Fields {
            record,
            entity,
            index,
        };
        let row = match entity {
            EntityType::Customers => TypedRow::Customer(transform_customer(&fields)?),
            EntityType::Products => TypedRow::Product(transform_product(&fields)?),
        };
        if !seen.insert(row.key().to_string()) {
            return Err(TransformError::DuplicateKey {
                entity,
                index,
                key: row.key().to_string(),
            });
        }
        rows.push(row);
    }

    info!(entity = %entity, rows = rows.len(), "Transformed records");
    Ok(rows)
}

/// Field lookups on one record, with errors tagged by entity and index.
struct Fields<'a> {
    record: &'a RawRecord,
    entity: EntityType,
    index: usize,
}

impl Fields<'_> {
    fn invalid(&self, field: &str, err: FieldError) -> TransformError {
        TransformError::InvalidField {
            entity: self.entity,
            index: self.index,
            field: field.to_string(),
            message: err.to_string(),
        }
    }

    fn key(&self) -> Result<String, TransformError> {
        self.record
            .id_field("id")
            .map_err(|e| self.invalid("id", e))?
            .ok_or_else(|| TransformError::MissingField {
                entity: self.entity,
                index: self.index,
                field: "id".to_string(),
            })
    }

    fn string(&self, field: &str) -> Result<String, TransformError> {
        Ok(self
            .record
            .str_field(field)
            .map_err(|e| self.invalid(field, e))?
            .unwrap_or_default()
            .to_string())
    }

    fn timestamp(&self, field: &str) -> Result<Option<DateTime<Utc>>, TransformError> {
        self.record
            .timestamp_field(field)
            .map_err(|e| self.invalid(field, e))
    }

    fn integer(&self, field: &str) -> Result<i64, TransformError> {
        Ok(self
            .record
            .i64_field(field)
            .map_err(|e| self.invalid(field, e))?
            .unwrap_or(0))
    }

    fn money(&self, record: &RawRecord, field: &str) -> Result<f64, TransformError> {
        let value = record
            .f64_field(field)
            .map_err(|e| self.invalid(field, e))?
            .unwrap_or(0.0);
        if !value.is_finite() {
            return Err(TransformError::InvalidField {
                entity: self.entity,
                index: self.index,
                field: field.to_string(),
                message: format!("{value} is not a finite amount"),
            });
        }
        Ok(value)
    }
}

fn transform_customer(f: &Fields<'_>) -> Result<CustomerRow, TransformError> {
    Ok(CustomerRow {
        customer_id: f.key()?,
        email: f.string("email")?,
        first_name: f.string("first_name")?,
        last_name: f.string("last_name")?,
        created_at: f.timestamp("created_at")?,
        updated_at: f.timestamp("updated_at")?,
        orders_count: f.integer("orders_count")?,
        total_spent: f.money(f.record, "total_spent")?,
    })
}

fn transform_product(f: &Fields<'_>) -> Result<ProductRow, TransformError> {
    let first_variant = f
        .record
        .first_in_array("variants")
        .map_err(|e| f.invalid("variants", e))?;
    let price = match &first_variant {
        Some(variant) => f.money(variant, "price")?,
        None => 0.0,
    };

    Ok(ProductRow {
        product_id: f.key()?,
        title: f.string("title")?,
        vendor: f.string("vendor")?,
        product_type: f.string("product_type")?,
        created_at: f.timestamp("created_at")?,
        updated_at: f.timestamp("updated_at")?,
        price,
    })
}
