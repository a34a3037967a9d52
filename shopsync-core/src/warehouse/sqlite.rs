//! SQLite-backed warehouse for local runs.
//!
//! Each dataset is a database attached under its own schema name: a
//! `{dataset}.sqlite` file when a directory is configured, an in-memory
//! database otherwise. All calls run on the blocking pool.

use async_trait::async_trait;
use rusqlite::Connection;
use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

use super::sql::{Dialect, Statement, validate_ident};
use super::{DatasetRef, QueryRow, TableRef, Warehouse};
use crate::error::WarehouseError;
use crate::schema::SchemaDefinition;
use crate::transform::{CellValue, TypedRow};

/// Schema names SQLite reserves on every connection.
const RESERVED_SCHEMAS: [&str; 2] = ["main", "temp"];

pub struct SqliteWarehouse {
    conn: Arc<Mutex<Connection>>,
    data_dir: Option<PathBuf>,
}

impl SqliteWarehouse {
    /// Warehouse whose datasets live as files under `data_dir`.
    pub async fn open(data_dir: &Path) -> Result<Self, WarehouseError> {
        std::fs::create_dir_all(data_dir).map_err(|e| WarehouseError::Blocking {
            message: format!("cannot create {}: {e}", data_dir.display()),
        })?;
        Ok(Self {
            conn: Arc::new(Mutex::new(Connection::open_in_memory()?)),
            data_dir: Some(data_dir.to_path_buf()),
        })
    }

    /// Warehouse whose datasets vanish with the process.
    pub async fn open_in_memory() -> Result<Self, WarehouseError> {
        Ok(Self {
            conn: Arc::new(Mutex::new(Connection::open_in_memory()?)),
            data_dir: None,
        })
    }

    fn dataset_file(&self, dataset: &str) -> Option<PathBuf> {
        self.data_dir
            .as_ref()
            .map(|dir| dir.join(format!("{dataset}.sqlite")))
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, WarehouseError>
    where
        F: FnOnce(&mut Connection) -> Result<T, WarehouseError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| WarehouseError::Blocking {
                message: "SQLite connection lock poisoned".into(),
            })?;
            f(&mut guard)
        })
        .await
        .map_err(|e| WarehouseError::Blocking {
            message: e.to_string(),
        })?
    }
}

fn check_dataset(dataset: &str) -> Result<(), WarehouseError> {
    validate_ident(dataset)?;
    if RESERVED_SCHEMAS
        .iter()
        .any(|r| r.eq_ignore_ascii_case(dataset))
    {
        return Err(WarehouseError::InvalidIdentifier {
            ident: dataset.to_string(),
        });
    }
    Ok(())
}

fn is_attached(conn: &Connection, dataset: &str) -> Result<bool, WarehouseError> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_database_list")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names.iter().any(|n| n == dataset))
}

fn attach(conn: &Connection, dataset: &str, file: Option<&Path>) -> Result<(), WarehouseError> {
    let target = file
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|| ":memory:".to_string());
    conn.execute(&format!("ATTACH DATABASE ?1 AS \"{dataset}\""), [target])?;
    Ok(())
}

fn table_in(conn: &Connection, table: &TableRef) -> Result<bool, WarehouseError> {
    if !is_attached(conn, &table.dataset)? {
        return Ok(false);
    }
    let sql = format!(
        "SELECT COUNT(*) FROM \"{}\".sqlite_master WHERE type = 'table' AND name = ?1",
        validate_ident(&table.dataset)?
    );
    let count: i64 = conn.query_row(&sql, [&table.table], |row| row.get(0))?;
    Ok(count > 0)
}

fn map_ddl_error(err: rusqlite::Error, resource: &str) -> WarehouseError {
    let message = err.to_string();
    if message.contains("already exists") {
        WarehouseError::already_exists(resource)
    } else if message.contains("unknown database") || message.contains("no such table") {
        WarehouseError::not_found(resource)
    } else {
        WarehouseError::Sqlite(err)
    }
}

/// `CREATE TABLE` with `key` as primary key. Fails if the table exists.
fn create_table_sql(
    table: &TableRef,
    schema: &SchemaDefinition,
    key: &str,
) -> Result<String, WarehouseError> {
    let name = Dialect::Sqlite.quote_table(table)?;
    let mut defs = Vec::with_capacity(schema.len());
    for column in schema.columns {
        let mut def = format!(
            "{} {}",
            Dialect::Sqlite.quote_column(column.name)?,
            column.dtype.sqlite_name()
        );
        if column.required {
            def.push_str(" NOT NULL");
        }
        if column.name == key {
            def.push_str(" PRIMARY KEY");
        }
        defs.push(def);
    }
    Ok(format!("CREATE TABLE {name} ({})", defs.join(", ")))
}

/// Single-row insert with positional parameters in schema order.
fn insert_sql(table: &TableRef, schema: &SchemaDefinition) -> Result<String, WarehouseError> {
    let name = Dialect::Sqlite.quote_table(table)?;
    let columns = schema
        .columns
        .iter()
        .map(|c| Dialect::Sqlite.quote_column(c.name))
        .collect::<Result<Vec<_>, _>>()?
        .join(", ");
    let params = (1..=schema.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    Ok(format!("INSERT INTO {name} ({columns}) VALUES ({params})"))
}

fn to_sql_value(cell: &CellValue) -> SqlValue {
    match cell {
        CellValue::Timestamp(_) => match cell.to_json() {
            Value::String(s) => SqlValue::Text(s),
            _ => SqlValue::Null,
        },
        CellValue::Null => SqlValue::Null,
        CellValue::String(s) => SqlValue::Text(s.clone()),
        CellValue::Integer(n) => SqlValue::Integer(*n),
        CellValue::Float(f) => SqlValue::Real(*f),
    }
}

fn to_json_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(n) => Value::from(n),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
    }
}

#[async_trait]
impl Warehouse for SqliteWarehouse {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn dataset_exists(&self, dataset: &DatasetRef) -> Result<bool, WarehouseError> {
        check_dataset(&dataset.dataset)?;
        let name = dataset.dataset.clone();
        let file = self.dataset_file(&name);
        self.with_conn(move |conn| {
            if is_attached(conn, &name)? {
                return Ok(true);
            }
            // A dataset file from an earlier run is attached on first sight.
            match file {
                Some(path) if path.exists() => {
                    attach(conn, &name, Some(&path))?;
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
        .await
    }

    async fn create_dataset(
        &self,
        dataset: &DatasetRef,
        location: &str,
    ) -> Result<(), WarehouseError> {
        check_dataset(&dataset.dataset)?;
        debug!(dataset = %dataset, location, "SQLite datasets ignore location");
        let name = dataset.dataset.clone();
        let file = self.dataset_file(&name);
        self.with_conn(move |conn| {
            if is_attached(conn, &name)? || file.as_ref().is_some_and(|p| p.exists()) {
                return Err(WarehouseError::already_exists(name));
            }
            attach(conn, &name, file.as_deref())
        })
        .await
    }

    async fn table_exists(&self, table: &TableRef) -> Result<bool, WarehouseError> {
        let table = table.clone();
        self.with_conn(move |conn| table_in(conn, &table)).await
    }

    async fn create_table(
        &self,
        table: &TableRef,
        schema: &SchemaDefinition,
        key: &str,
    ) -> Result<(), WarehouseError> {
        let ddl = create_table_sql(table, schema, key)?;
        let resource = table.to_string();
        self.with_conn(move |conn| {
            conn.execute(&ddl, [])
                .map(|_| ())
                .map_err(|e| map_ddl_error(e, &resource))
        })
        .await
    }

    async fn load_truncate(
        &self,
        table: &TableRef,
        schema: &SchemaDefinition,
        key: &str,
        rows: &[TypedRow],
    ) -> Result<u64, WarehouseError> {
        let ddl = create_table_sql(table, schema, key)?;
        let insert = insert_sql(table, schema)?;
        let truncate = format!("DELETE FROM {}", Dialect::Sqlite.quote_table(table)?);
        let values: Vec<Vec<SqlValue>> = rows
            .iter()
            .map(|row| row.cells().iter().map(to_sql_value).collect())
            .collect();
        let table = table.clone();

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            if !table_in(&tx, &table)? {
                tx.execute(&ddl, [])
                    .map_err(|e| map_ddl_error(e, &table.to_string()))?;
            }
            tx.execute(&truncate, [])?;
            {
                let mut stmt = tx.prepare(&insert)?;
                for row in &values {
                    stmt.execute(rusqlite::params_from_iter(row.iter()))?;
                }
            }
            tx.commit()?;
            Ok(values.len() as u64)
        })
        .await
    }

    async fn execute(&self, statement: &Statement) -> Result<Option<u64>, WarehouseError> {
        let statement = statement.clone();
        self.with_conn(move |conn| {
            let changed = conn.execute(statement.sql(), [])?;
            Ok(Some(changed as u64))
        })
        .await
    }

    async fn query(&self, statement: &Statement) -> Result<Vec<QueryRow>, WarehouseError> {
        let statement = statement.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(statement.sql())?;
            let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
            let rows = stmt
                .query_map([], |row| {
                    let mut out = QueryRow::new();
                    for (i, name) in columns.iter().enumerate() {
                        out.insert(name.clone(), to_json_value(row.get_ref(i)?));
                    }
                    Ok(out)
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    async fn delete_table(&self, table: &TableRef) -> Result<bool, WarehouseError> {
        let drop = format!("DROP TABLE {}", Dialect::Sqlite.quote_table(table)?);
        let table = table.clone();
        self.with_conn(move |conn| {
            if !table_in(conn, &table)? {
                return Ok(false);
            }
            conn.execute(&drop, [])?;
            Ok(true)
        })
        .await
    }
}
