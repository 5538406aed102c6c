//! Warehouse client
//!
//! The gateway needs two things from the analytical warehouse: a schema
//! description for a dataset and "run this SQL, give me rows". The HTTP
//! implementation talks to a BigQuery-style `jobs.query` REST endpoint.

use crate::error::{GatewayError, Result};
use crate::schema::{is_dataset_name, SchemaDescriptor};
use crate::value::{normalize, CellValue, ResultRow, Scalar};
use async_trait::async_trait;
use chrono::DateTime;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Describe every table and column of `dataset`.
    async fn describe_schema(&self, dataset: &str) -> Result<SchemaDescriptor>;

    /// Run one SQL statement and return its rows.
    async fn execute(&self, sql: &str) -> Result<Vec<ResultRow>>;
}

/// REST client for a BigQuery-compatible warehouse.
pub struct HttpWarehouse {
    client: Client,
    base_url: String,
    project_id: String,
    token: Option<String>,
    poll_attempts: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    job_reference: Option<JobReference>,
    schema: Option<TableSchema>,
    #[serde(default)]
    rows: Vec<RawRow>,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TableSchema {
    #[serde(default)]
    fields: Vec<FieldSchema>,
}

#[derive(Debug, Deserialize)]
struct FieldSchema {
    name: String,
    #[serde(rename = "type")]
    field_type: String,
}

#[derive(Debug, Deserialize)]
struct RawRow {
    #[serde(default)]
    f: Vec<RawCell>,
}

#[derive(Debug, Deserialize)]
struct RawCell {
    #[serde(default)]
    v: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorProto,
}

impl HttpWarehouse {
    pub fn new(base_url: String, project_id: String, token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| GatewayError::Warehouse(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            project_id,
            token,
            poll_attempts: 20,
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn read_response(response: reqwest::Response) -> Result<QueryResponse> {
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorEnvelope>(&text)
                .map(|e| e.error.message)
                .unwrap_or(text);
            return Err(GatewayError::Warehouse(format!(
                "Query failed with status {}: {}",
                status, message
            )));
        }

        let body: QueryResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Warehouse(format!("Failed to parse query response: {}", e)))?;

        if let Some(first) = body.errors.first() {
            return Err(GatewayError::Warehouse(first.message.clone()));
        }
        Ok(body)
    }

    async fn submit(&self, sql: &str) -> Result<QueryResponse> {
        let url = format!("{}/projects/{}/queries", self.base_url, self.project_id);
        let body = serde_json::json!({
            "query": sql,
            "useLegacySql": false,
            "timeoutMs": 30000,
        });

        let response = self
            .authorize(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Warehouse(format!("Failed to submit query: {}", e)))?;

        Self::read_response(response).await
    }

    async fn poll(&self, job: &JobReference) -> Result<QueryResponse> {
        let mut url = format!(
            "{}/projects/{}/queries/{}",
            self.base_url, self.project_id, job.job_id
        );
        if let Some(location) = &job.location {
            url.push_str(&format!("?location={}", location));
        }

        for attempt in 1..=self.poll_attempts {
            tokio::time::sleep(Duration::from_millis(500)).await;
            let response = self
                .authorize(self.client.get(&url))
                .send()
                .await
                .map_err(|e| GatewayError::Warehouse(format!("Failed to poll job: {}", e)))?;
            let body = Self::read_response(response).await?;
            if body.job_complete {
                return Ok(body);
            }
            debug!("Job {} still running (poll {})", job.job_id, attempt);
        }

        Err(GatewayError::Warehouse(format!(
            "Job {} did not complete after {} polls",
            job.job_id, self.poll_attempts
        )))
    }

    async fn run(&self, sql: &str) -> Result<Vec<ResultRow>> {
        let mut body = self.submit(sql).await?;
        if !body.job_complete {
            let job = body.job_reference.take().ok_or_else(|| {
                GatewayError::Warehouse("Incomplete job without a job reference".to_string())
            })?;
            warn!("Query did not finish inline, polling job {}", job.job_id);
            body = self.poll(&job).await?;
        }
        Ok(decode_rows(&body))
    }
}

#[async_trait]
impl Warehouse for HttpWarehouse {
    async fn describe_schema(&self, dataset: &str) -> Result<SchemaDescriptor> {
        if !is_dataset_name(dataset) {
            return Err(GatewayError::Warehouse(format!(
                "Refusing to describe invalid dataset name '{}'",
                dataset
            )));
        }
        let sql = format!(
            "SELECT table_name, column_name, data_type \
             FROM `{}.{}.INFORMATION_SCHEMA.COLUMNS` \
             ORDER BY table_name, ordinal_position",
            self.project_id, dataset
        );
        let rows = self.run(&sql).await?;

        let mut schema = SchemaDescriptor::new(dataset);
        for row in &rows {
            let field = |name: &str| row.get(name).map(|c| normalize(c).to_string());
            if let (Some(table), Some(column), Some(data_type)) =
                (field("table_name"), field("column_name"), field("data_type"))
            {
                schema.add_column(table, column, data_type);
            }
        }
        Ok(schema)
    }

    async fn execute(&self, sql: &str) -> Result<Vec<ResultRow>> {
        let started = std::time::Instant::now();
        let rows = self.run(sql).await?;
        info!(
            "Warehouse returned {} rows in {}ms",
            rows.len(),
            started.elapsed().as_millis()
        );
        Ok(rows)
    }
}

fn decode_rows(body: &QueryResponse) -> Vec<ResultRow> {
    let fields = body
        .schema
        .as_ref()
        .map(|s| s.fields.as_slice())
        .unwrap_or(&[]);

    body.rows
        .iter()
        .map(|raw| ResultRow {
            columns: fields
                .iter()
                .zip(raw.f.iter())
                .map(|(field, cell)| (field.name.clone(), decode_cell(&field.field_type, &cell.v)))
                .collect(),
        })
        .collect()
}

/// The REST API sends every primitive as a string; restore its type.
/// Temporal types come back wrapped.
fn decode_cell(field_type: &str, raw: &serde_json::Value) -> CellValue {
    let text = match raw {
        serde_json::Value::Null => return CellValue::Scalar(Scalar::Null),
        serde_json::Value::String(s) => s.clone(),
        other => return CellValue::Scalar(Scalar::from_json(other)),
    };

    match field_type.to_ascii_uppercase().as_str() {
        "INTEGER" | "INT64" => CellValue::Scalar(
            text.parse().map(Scalar::Int).unwrap_or(Scalar::Text(text)),
        ),
        "FLOAT" | "FLOAT64" | "NUMERIC" | "BIGNUMERIC" => CellValue::Scalar(
            text.parse().map(Scalar::Float).unwrap_or(Scalar::Text(text)),
        ),
        "BOOLEAN" | "BOOL" => CellValue::Scalar(Scalar::Bool(text.eq_ignore_ascii_case("true"))),
        "TIMESTAMP" => {
            // Seconds since epoch, possibly fractional.
            let rendered = text
                .parse::<f64>()
                .ok()
                .and_then(|secs| {
                    DateTime::from_timestamp(secs.trunc() as i64, (secs.fract() * 1e9) as u32)
                })
                .map(|ts| ts.to_rfc3339())
                .unwrap_or(text);
            CellValue::wrapped("TIMESTAMP", Scalar::Text(rendered))
        }
        "DATE" | "DATETIME" | "TIME" => CellValue::wrapped(field_type, Scalar::Text(text)),
        _ => CellValue::Scalar(Scalar::Text(text)),
    }
}
