//! BigQuery backend over the v2 REST API.
//!
//! Datasets and tables are managed through the resource endpoints, batch loads
//! go through a multipart upload job, and statements run via `jobs.query` with
//! `getQueryResults` polling until the job completes.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, info};

use super::auth::{Credentials, ServiceAccountKey, TokenProvider};
use super::sql::{validate_ident, validate_project};
use super::{DatasetRef, Dialect, QueryRow, Statement, TableRef, Warehouse};
use crate::config::WarehouseConfig;
use crate::error::{ConfigError, WarehouseError};
use crate::schema::{ColumnType, SchemaDefinition};
use crate::transform::TypedRow;

pub const DEFAULT_API_BASE_URL: &str = "https://bigquery.googleapis.com";

/// Server-side wait per `getQueryResults` call.
const QUERY_WAIT_MS: u64 = 10_000;
const POLL_INITIAL: Duration = Duration::from_millis(250);
const POLL_MAX: Duration = Duration::from_secs(5);
/// Give up on a job that has not finished after this long.
const JOB_DEADLINE: Duration = Duration::from_secs(30 * 60);

pub struct BigQueryWarehouse {
    client: reqwest::Client,
    tokens: TokenProvider,
    base_url: String,
    /// Project jobs are billed to and run in.
    project: String,
    location: String,
}

impl std::fmt::Debug for BigQueryWarehouse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BigQueryWarehouse")
            .field("base_url", &self.base_url)
            .field("project", &self.project)
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

impl BigQueryWarehouse {
    /// Build a client from config. A static access token wins over a key file;
    /// an empty `project_id` falls back to the key's own project.
    pub fn from_config(config: &WarehouseConfig, timeout_secs: u64) -> Result<Self, ConfigError> {
        let (credentials, key_project) = match (&config.access_token, &config.credentials_path) {
            (Some(token), _) => (Credentials::StaticToken(token.clone()), None),
            (None, Some(path)) => {
                let key = ServiceAccountKey::from_file(path)?;
                let project = key.project_id.clone();
                (Credentials::ServiceAccount(key), project)
            }
            (None, None) => {
                return Err(ConfigError::MissingFields {
                    fields: vec!["warehouse.credentials_path".into()],
                });
            }
        };

        let project = if config.project_id.trim().is_empty() {
            key_project.unwrap_or_default()
        } else {
            config.project_id.clone()
        };
        validate_project(&project).map_err(|_| ConfigError::Invalid {
            message: format!("invalid warehouse.project_id '{project}'"),
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ConfigError::Invalid {
                message: format!("failed to build HTTP client: {e}"),
            })?;

        let base_url = config
            .api_base_url
            .as_deref()
            .unwrap_or(DEFAULT_API_BASE_URL)
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            tokens: TokenProvider::new(credentials, client.clone()),
            client,
            base_url,
            project,
            location: config.location.clone(),
        })
    }

    fn project_url(&self, project: &str) -> String {
        format!("{}/bigquery/v2/projects/{project}", self.base_url)
    }

    fn dataset_url(&self, dataset: &DatasetRef) -> Result<String, WarehouseError> {
        let project = validate_project(&dataset.project)?;
        let name = validate_ident(&dataset.dataset)?;
        Ok(format!("{}/datasets/{name}", self.project_url(project)))
    }

    fn table_url(&self, table: &TableRef) -> Result<String, WarehouseError> {
        let name = validate_ident(&table.table)?;
        Ok(format!("{}/tables/{name}", self.dataset_url(&table.dataset_ref())?))
    }

    /// Send an authorized request, mapping 404 and 409 to their error kinds.
    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        resource: &str,
    ) -> Result<reqwest::Response, WarehouseError> {
        let token = self.tokens.token().await?;
        let response = request.bearer_auth(token).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::NOT_FOUND => WarehouseError::not_found(resource),
            StatusCode::CONFLICT => WarehouseError::already_exists(resource),
            _ => WarehouseError::Api {
                status: status.as_u16(),
                message: api_error_message(&body),
            },
        })
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        resource: &str,
    ) -> Result<T, WarehouseError> {
        let response = self.send(request, resource).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| WarehouseError::decode(format!("{resource}: {e}")))
    }

    async fn exists(&self, url: String, resource: &str) -> Result<bool, WarehouseError> {
        match self.send(self.client.get(url), resource).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Poll a job until it reaches `DONE`, then surface its error result.
    async fn wait_for_job(&self, mut job: Job) -> Result<Job, WarehouseError> {
        let started = tokio::time::Instant::now();
        let mut delay = POLL_INITIAL;

        while !job.is_done() {
            if started.elapsed() > JOB_DEADLINE {
                return Err(WarehouseError::Job {
                    message: format!("job {} did not finish in time", job.job_reference.job_id),
                });
            }
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(POLL_MAX);

            let reference = &job.job_reference;
            let url = format!("{}/jobs/{}", self.project_url(&self.project), reference.job_id);
            let location = reference.location.as_deref().unwrap_or(&self.location);
            job = self
                .send_json(
                    self.client.get(url).query(&[("location", location)]),
                    &reference.job_id,
                )
                .await?;
        }

        if let Some(error) = job.status.as_ref().and_then(|s| s.error_result.as_ref()) {
            return Err(WarehouseError::Job {
                message: error.describe(),
            });
        }
        Ok(job)
    }

    /// Run a statement through `jobs.query` and collect every result page.
    async fn run_query(&self, statement: &Statement) -> Result<QueryResults, WarehouseError> {
        let url = format!("{}/queries", self.project_url(&self.project));
        let body = json!({
            "query": statement.sql(),
            "useLegacySql": false,
            "timeoutMs": QUERY_WAIT_MS,
            "location": self.location,
        });
        debug!(sql = %statement, "Submitting query job");

        let mut response: QueryResponse = self
            .send_json(self.client.post(url).json(&body), "query job")
            .await?;

        let started = tokio::time::Instant::now();
        let mut delay = POLL_INITIAL;
        while !response.job_complete {
            if started.elapsed() > JOB_DEADLINE {
                return Err(WarehouseError::Job {
                    message: "query did not finish in time".into(),
                });
            }
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(POLL_MAX);
            response = self.query_results(&response, None).await?;
        }

        let fields = response.schema.take().map(|s| s.fields).unwrap_or_default();
        let affected = response
            .num_dml_affected_rows
            .as_deref()
            .and_then(|n| n.parse::<u64>().ok());
        let mut rows = decode_rows(&fields, std::mem::take(&mut response.rows))?;

        while let Some(token) = response.page_token.take() {
            response = self.query_results(&response, Some(&token)).await?;
            rows.extend(decode_rows(&fields, std::mem::take(&mut response.rows))?);
        }

        Ok(QueryResults { rows, affected })
    }

    async fn query_results(
        &self,
        previous: &QueryResponse,
        page_token: Option<&str>,
    ) -> Result<QueryResponse, WarehouseError> {
        let reference = previous
            .job_reference
            .as_ref()
            .ok_or_else(|| WarehouseError::decode("query response without jobReference"))?;
        let url = format!(
            "{}/queries/{}",
            self.project_url(&self.project),
            reference.job_id
        );
        let location = reference.location.as_deref().unwrap_or(&self.location);
        let wait = QUERY_WAIT_MS.to_string();
        let mut params = vec![("location", location), ("timeoutMs", wait.as_str())];
        if let Some(token) = page_token {
            params.push(("pageToken", token));
        }
        self.send_json(self.client.get(url).query(&params), &reference.job_id)
            .await
    }
}

#[async_trait]
impl Warehouse for BigQueryWarehouse {
    fn dialect(&self) -> Dialect {
        Dialect::BigQuery
    }

    async fn dataset_exists(&self, dataset: &DatasetRef) -> Result<bool, WarehouseError> {
        let url = self.dataset_url(dataset)?;
        self.exists(url, &dataset.to_string()).await
    }

    async fn create_dataset(
        &self,
        dataset: &DatasetRef,
        location: &str,
    ) -> Result<(), WarehouseError> {
        let project = validate_project(&dataset.project)?;
        let name = validate_ident(&dataset.dataset)?;
        let url = format!("{}/datasets", self.project_url(project));
        let body = json!({
            "datasetReference": { "projectId": project, "datasetId": name },
            "location": location,
        });
        self.send(self.client.post(url).json(&body), &dataset.to_string())
            .await?;
        Ok(())
    }

    async fn table_exists(&self, table: &TableRef) -> Result<bool, WarehouseError> {
        let url = self.table_url(table)?;
        self.exists(url, &table.to_string()).await
    }

    async fn create_table(
        &self,
        table: &TableRef,
        schema: &SchemaDefinition,
        _key: &str,
    ) -> Result<(), WarehouseError> {
        let url = format!("{}/tables", self.dataset_url(&table.dataset_ref())?);
        let body = json!({
            "tableReference": {
                "projectId": table.project,
                "datasetId": table.dataset,
                "tableId": validate_ident(&table.table)?,
            },
            "schema": { "fields": schema_fields(schema) },
        });
        self.send(self.client.post(url).json(&body), &table.to_string())
            .await?;
        Ok(())
    }

    async fn load_truncate(
        &self,
        table: &TableRef,
        schema: &SchemaDefinition,
        _key: &str,
        rows: &[TypedRow],
    ) -> Result<u64, WarehouseError> {
        validate_project(&table.project)?;
        validate_ident(&table.dataset)?;
        validate_ident(&table.table)?;

        let job_id = format!("shopsync_load_{}", uuid::Uuid::new_v4().simple());
        let metadata = load_job_config(&self.project, &job_id, &self.location, table, schema);
        let data = to_ndjson(rows)?;
        let boundary = format!("shopsync_{}", uuid::Uuid::new_v4().simple());
        let body = multipart_related(&boundary, &metadata, &data)?;

        let url = format!(
            "{}/upload/bigquery/v2/projects/{}/jobs",
            self.base_url, self.project
        );
        let request = self
            .client
            .post(url)
            .query(&[("uploadType", "multipart")])
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={boundary}"),
            )
            .body(body);

        info!(table = %table, rows = rows.len(), job_id = %job_id, "Starting load job");
        let job: Job = self.send_json(request, &table.to_string()).await?;
        let job = self.wait_for_job(job).await?;

        let loaded = job
            .statistics
            .and_then(|s| s.load)
            .and_then(|l| l.output_rows)
            .and_then(|n| n.parse::<u64>().ok())
            .unwrap_or(rows.len() as u64);
        Ok(loaded)
    }

    async fn execute(&self, statement: &Statement) -> Result<Option<u64>, WarehouseError> {
        Ok(self.run_query(statement).await?.affected)
    }

    async fn query(&self, statement: &Statement) -> Result<Vec<QueryRow>, WarehouseError> {
        Ok(self.run_query(statement).await?.rows)
    }

    async fn delete_table(&self, table: &TableRef) -> Result<bool, WarehouseError> {
        let url = self.table_url(table)?;
        match self.send(self.client.delete(url), &table.to_string()).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

// --- wire types ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FieldSchema {
    name: String,
    #[serde(rename = "type")]
    field_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mode: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TableSchema {
    #[serde(default)]
    fields: Vec<FieldSchema>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl ErrorProto {
    fn describe(&self) -> String {
        match (&self.reason, &self.message) {
            (Some(reason), Some(message)) => format!("{reason}: {message}"),
            (None, Some(message)) => message.clone(),
            (Some(reason), None) => reason.clone(),
            (None, None) => "unknown error".into(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    state: String,
    #[serde(default)]
    error_result: Option<ErrorProto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadStatistics {
    #[serde(default)]
    output_rows: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JobStatistics {
    #[serde(default)]
    load: Option<LoadStatistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Job {
    job_reference: JobReference,
    #[serde(default)]
    status: Option<JobStatus>,
    #[serde(default)]
    statistics: Option<JobStatistics>,
}

impl Job {
    fn is_done(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.state == "DONE")
    }
}

#[derive(Debug, Deserialize)]
struct WireCell {
    #[serde(default)]
    v: Value,
}

#[derive(Debug, Deserialize)]
struct WireRow {
    #[serde(default)]
    f: Vec<WireCell>,
}

/// Shared shape of `jobs.query` and `jobs.getQueryResults` responses.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    #[serde(default)]
    job_reference: Option<JobReference>,
    #[serde(default)]
    schema: Option<TableSchema>,
    #[serde(default)]
    rows: Vec<WireRow>,
    #[serde(default)]
    page_token: Option<String>,
    #[serde(default)]
    num_dml_affected_rows: Option<String>,
}

struct QueryResults {
    rows: Vec<QueryRow>,
    affected: Option<u64>,
}

fn schema_fields(schema: &SchemaDefinition) -> Vec<FieldSchema> {
    schema
        .columns
        .iter()
        .map(|c| FieldSchema {
            name: c.name.to_string(),
            field_type: c.dtype.bigquery_name().to_string(),
            mode: Some(if c.required { "REQUIRED" } else { "NULLABLE" }.to_string()),
        })
        .collect()
}

fn load_job_config(
    project: &str,
    job_id: &str,
    location: &str,
    table: &TableRef,
    schema: &SchemaDefinition,
) -> Value {
    json!({
        "jobReference": { "projectId": project, "jobId": job_id, "location": location },
        "configuration": {
            "load": {
                "destinationTable": {
                    "projectId": table.project,
                    "datasetId": table.dataset,
                    "tableId": table.table,
                },
                "schema": { "fields": schema_fields(schema) },
                "sourceFormat": "NEWLINE_DELIMITED_JSON",
                "writeDisposition": "WRITE_TRUNCATE",
                "createDisposition": "CREATE_IF_NEEDED",
            }
        }
    })
}

fn to_ndjson(rows: &[TypedRow]) -> Result<Vec<u8>, WarehouseError> {
    let mut out = Vec::new();
    for row in rows {
        serde_json::to_writer(&mut out, &row.to_json())
            .map_err(|e| WarehouseError::decode(format!("failed to encode row: {e}")))?;
        out.push(b'\n');
    }
    Ok(out)
}

/// `multipart/related` body: job metadata part followed by the data part.
fn multipart_related(
    boundary: &str,
    metadata: &Value,
    data: &[u8],
) -> Result<Vec<u8>, WarehouseError> {
    let metadata = serde_json::to_vec(metadata)
        .map_err(|e| WarehouseError::decode(format!("failed to encode job: {e}")))?;
    let mut body = Vec::with_capacity(metadata.len() + data.len() + 256);
    body.extend_from_slice(
        format!("--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n").as_bytes(),
    );
    body.extend_from_slice(&metadata);
    body.extend_from_slice(
        format!("\r\n--{boundary}\r\nContent-Type: application/octet-stream\r\n\r\n").as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    Ok(body)
}

fn api_error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct Envelope {
        error: Detail,
    }
    #[derive(Deserialize)]
    struct Detail {
        message: String,
    }

    match serde_json::from_str::<Envelope>(body) {
        Ok(envelope) => envelope.error.message,
        Err(_) => body.chars().take(512).collect(),
    }
}

fn column_type(field_type: &str) -> Option<ColumnType> {
    match field_type {
        "STRING" => Some(ColumnType::String),
        "INTEGER" | "INT64" => Some(ColumnType::Integer),
        "FLOAT" | "FLOAT64" => Some(ColumnType::Float),
        "TIMESTAMP" => Some(ColumnType::Timestamp),
        _ => None,
    }
}

/// Decode `f`/`v` rows into JSON objects using the result schema.
fn decode_rows(fields: &[FieldSchema], rows: Vec<WireRow>) -> Result<Vec<QueryRow>, WarehouseError> {
    rows.into_iter()
        .map(|row| {
            if row.f.len() != fields.len() {
                return Err(WarehouseError::decode(format!(
                    "row has {} cells, schema has {} fields",
                    row.f.len(),
                    fields.len()
                )));
            }
            fields
                .iter()
                .zip(row.f)
                .map(|(field, cell)| {
                    decode_cell(field, cell.v).map(|value| (field.name.clone(), value))
                })
                .collect::<Result<QueryRow, WarehouseError>>()
        })
        .collect()
}

fn decode_cell(field: &FieldSchema, value: Value) -> Result<Value, WarehouseError> {
    let Value::String(raw) = value else {
        return Ok(value);
    };
    let invalid = |reason: &str, raw: &str| {
        WarehouseError::decode(format!("column '{}': {reason}: '{raw}'", field.name))
    };

    Ok(match column_type(&field.field_type) {
        Some(ColumnType::Integer) => match raw.parse::<i64>() {
            Ok(n) => Value::from(n),
            Err(_) => return Err(invalid("not an integer", &raw)),
        },
        Some(ColumnType::Float) => match raw.parse::<f64>() {
            Ok(f) => match serde_json::Number::from_f64(f) {
                Some(n) => Value::Number(n),
                None => Value::String(raw),
            },
            Err(_) => return Err(invalid("not a number", &raw)),
        },
        Some(ColumnType::Timestamp) => {
            // Epoch seconds with microsecond fraction, e.g. "1.7040972E9".
            let Ok(seconds) = raw.parse::<f64>() else {
                return Err(invalid("not a timestamp", &raw));
            };
            let micros = (seconds * 1_000_000.0).round() as i64;
            let Some(ts) = DateTime::from_timestamp_micros(micros) else {
                return Err(invalid("timestamp out of range", &raw));
            };
            Value::String(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
        }
        Some(ColumnType::String) | None => Value::String(raw),
    })
}
