//! Statement builder for the warehouse dialects.
//!
//! Statements are assembled only from validated identifiers taken from a
//! static `SchemaDefinition` and a `TableRef`; no row data is ever
//! interpolated. Staging and main tables share one column list, so the
//! UPDATE and INSERT halves of an upsert always line up.

use std::fmt;

use super::TableRef;
use crate::error::WarehouseError;
use crate::schema::SchemaDefinition;

/// SQL flavour a warehouse speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// BigQuery standard SQL (`MERGE`).
    BigQuery,
    /// SQLite 3.24+ (`INSERT ... ON CONFLICT DO UPDATE`).
    Sqlite,
}

/// A statement ready to hand to `Warehouse::execute` or `Warehouse::query`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    sql: String,
}

impl Statement {
    pub fn sql(&self) -> &str {
        &self.sql
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// Validate a dataset, table or column name: `[A-Za-z_][A-Za-z0-9_]*`.
pub fn validate_ident(ident: &str) -> Result<&str, WarehouseError> {
    let mut chars = ident.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid && ident.len() <= 1024 {
        Ok(ident)
    } else {
        Err(WarehouseError::InvalidIdentifier {
            ident: ident.to_string(),
        })
    }
}

/// Validate a project id. Allows `-`, and `:`/`.` for domain-scoped projects.
pub fn validate_project(project: &str) -> Result<&str, WarehouseError> {
    let valid = !project.is_empty()
        && project
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.'))
        && project.chars().next().is_some_and(|c| c.is_ascii_alphanumeric());
    if valid {
        Ok(project)
    } else {
        Err(WarehouseError::InvalidIdentifier {
            ident: project.to_string(),
        })
    }
}

impl Dialect {
    pub fn quote_column(&self, column: &str) -> Result<String, WarehouseError> {
        let column = validate_ident(column)?;
        Ok(match self {
            Dialect::BigQuery => format!("`{column}`"),
            Dialect::Sqlite => format!("\"{column}\""),
        })
    }

    pub fn quote_table(&self, table: &TableRef) -> Result<String, WarehouseError> {
        let dataset = validate_ident(&table.dataset)?;
        let name = validate_ident(&table.table)?;
        Ok(match self {
            Dialect::BigQuery => {
                let project = validate_project(&table.project)?;
                format!("`{project}.{dataset}.{name}`")
            }
            // The dataset is an attached schema.
            Dialect::Sqlite => format!("\"{dataset}\".\"{name}\""),
        })
    }

    /// Keyed upsert of every staging row into the main table.
    ///
    /// Matched keys get all non-key columns overwritten from staging, unmatched
    /// keys are inserted, and main rows absent from staging are left alone.
    pub fn upsert(
        &self,
        main: &TableRef,
        staging: &TableRef,
        schema: &SchemaDefinition,
        key: &str,
    ) -> Result<Statement, WarehouseError> {
        if schema.column(key).is_none() {
            return Err(WarehouseError::InvalidIdentifier {
                ident: key.to_string(),
            });
        }
        let main_name = self.quote_table(main)?;
        let staging_name = self.quote_table(staging)?;
        let quoted_key = self.quote_column(key)?;
        let columns = schema
            .columns
            .iter()
            .map(|c| self.quote_column(c.name))
            .collect::<Result<Vec<_>, _>>()?;
        let non_key = schema
            .columns
            .iter()
            .filter(|c| c.name != key)
            .map(|c| self.quote_column(c.name))
            .collect::<Result<Vec<_>, _>>()?;

        let insert_cols = columns.join(", ");
        let sql = match self {
            Dialect::BigQuery => {
                let insert_vals = columns
                    .iter()
                    .map(|c| format!("S.{c}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                let mut sql = format!(
                    "MERGE INTO {main_name} T USING {staging_name} S ON T.{quoted_key} = S.{quoted_key}"
                );
                if !non_key.is_empty() {
                    let update_set = non_key
                        .iter()
                        .map(|c| format!("{c} = S.{c}"))
                        .collect::<Vec<_>>()
                        .join(", ");
                    sql.push_str(&format!(" WHEN MATCHED THEN UPDATE SET {update_set}"));
                }
                sql.push_str(&format!(
                    " WHEN NOT MATCHED THEN INSERT ({insert_cols}) VALUES ({insert_vals})"
                ));
                sql
            }
            Dialect::Sqlite => {
                // `WHERE true` keeps the parser from reading ON CONFLICT as a join clause.
                let mut sql = format!(
                    "INSERT INTO {main_name} ({insert_cols}) SELECT {insert_cols} FROM {staging_name} WHERE true ON CONFLICT({quoted_key}) DO "
                );
                if non_key.is_empty() {
                    sql.push_str("NOTHING");
                } else {
                    let update_set = non_key
                        .iter()
                        .map(|c| format!("{c} = excluded.{c}"))
                        .collect::<Vec<_>>()
                        .join(", ");
                    sql.push_str(&format!("UPDATE SET {update_set}"));
                }
                sql
            }
        };
        Ok(Statement { sql })
    }

    /// Bounded read of the schema's columns.
    pub fn select_limit(
        &self,
        table: &TableRef,
        schema: &SchemaDefinition,
        limit: usize,
    ) -> Result<Statement, WarehouseError> {
        let columns = schema
            .columns
            .iter()
            .map(|c| self.quote_column(c.name))
            .collect::<Result<Vec<_>, _>>()?
            .join(", ");
        let table = self.quote_table(table)?;
        Ok(Statement {
            sql: format!("SELECT {columns} FROM {table} LIMIT {limit}"),
        })
    }
}
