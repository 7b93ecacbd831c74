//! BigQuery load-job adapter.
//!
//! A dataset is validated locally, uploaded as one `multipart/related` load
//! job and polled until the job reports `DONE`.

use super::schema::DatasetSchema;
use super::token::TokenSource;
use super::{TableId, WarehouseLoader};
use crate::error::LoadError;
use crate::runtime::config::SyncConfig;
use anyhow::{anyhow, bail, Result};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://bigquery.googleapis.com";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const MULTIPART_BOUNDARY: &str = "ledger_mirror_load_boundary";
const STATE_DONE: &str = "DONE";

#[derive(Debug, Clone)]
pub struct BigQueryOptions {
    pub api_base: String,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
}

impl Default for BigQueryOptions {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_URL.to_owned(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl BigQueryOptions {
    fn validate(&self) -> Result<()> {
        if !(self.api_base.starts_with("http://") || self.api_base.starts_with("https://")) {
            bail!("api_base must be an http(s) URL");
        }
        if self.poll_interval.is_zero() {
            bail!("poll_interval must be greater than zero");
        }
        if self.request_timeout.is_zero() {
            bail!("request_timeout must be greater than zero");
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct BigQueryLoader {
    http: reqwest::Client,
    options: BigQueryOptions,
    tokens: TokenSource,
}

impl WarehouseLoader for BigQueryLoader {
    fn load<'a>(
        &'a self,
        schema: &'static DatasetSchema,
        location: &'a Path,
        table: &'a TableId,
    ) -> BoxFuture<'a, Result<u64, LoadError>> {
        Box::pin(self.load_file(schema, location, table))
    }
}

impl BigQueryLoader {
    pub fn new(options: BigQueryOptions, tokens: TokenSource) -> Result<Self> {
        options.validate()?;
        let http = reqwest::Client::builder()
            .timeout(options.request_timeout)
            .build()
            .map_err(|err| anyhow!("failed to build warehouse HTTP client: {err}"))?;
        Ok(Self {
            http,
            options: BigQueryOptions {
                api_base: options.api_base.trim_end_matches('/').to_owned(),
                ..options
            },
            tokens,
        })
    }

    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        let options = BigQueryOptions {
            api_base: config.bigquery_api_url().to_owned(),
            poll_interval: config.bigquery_poll_interval(),
            request_timeout: config.load_timeout(),
        };
        let tokens = match config.bigquery_access_token() {
            Some(token) => TokenSource::fixed(token),
            None => TokenSource::metadata_default(),
        };
        Self::new(options, tokens)
    }

    async fn load_file(
        &self,
        schema: &'static DatasetSchema,
        location: &Path,
        table: &TableId,
    ) -> Result<u64, LoadError> {
        let body = match tokio::fs::read(location).await {
            Ok(body) => body,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                tracing::info!(dataset = %schema.kind, path = %location.display(), "no dataset file, skipping load");
                return Ok(0);
            }
            Err(source) => {
                return Err(LoadError::Artifact {
                    path: location.to_path_buf(),
                    source,
                })
            }
        };

        let records = validate_ndjson(schema, &body)?;
        if records == 0 {
            tracing::info!(dataset = %schema.kind, path = %location.display(), "empty dataset, skipping load");
            return Ok(0);
        }

        let token = self.tokens.token(&self.http).await?;
        let job = self.insert_job(schema, table, body, &token).await?;
        tracing::info!(
            dataset = %schema.kind,
            table = %table,
            job_id = %job.job_reference.job_id,
            records,
            "load job started"
        );

        let job = self.wait_for_job(table, job, &token).await?;
        let rows = job
            .statistics
            .as_ref()
            .and_then(|stats| stats.load.as_ref())
            .and_then(|load| load.output_rows.as_deref())
            .map(|raw| {
                raw.parse::<u64>()
                    .map_err(|_| LoadError::Malformed(format!("outputRows {raw:?} is not a count")))
            })
            .transpose()?
            .unwrap_or(0);

        tracing::info!(dataset = %schema.kind, table = %table, rows, "loaded rows");
        Ok(rows)
    }

    async fn insert_job(
        &self,
        schema: &DatasetSchema,
        table: &TableId,
        data: Vec<u8>,
        token: &str,
    ) -> Result<JobResource, LoadError> {
        let url = format!(
            "{}/upload/bigquery/v2/projects/{}/jobs?uploadType=multipart",
            self.options.api_base, table.project
        );
        let metadata = load_job_configuration(schema, table);

        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={MULTIPART_BOUNDARY}"),
            )
            .body(multipart_related_body(&metadata, &data))
            .send()
            .await?;
        read_json(response).await
    }

    async fn wait_for_job(
        &self,
        table: &TableId,
        mut job: JobResource,
        token: &str,
    ) -> Result<JobResource, LoadError> {
        let url = format!(
            "{}/bigquery/v2/projects/{}/jobs/{}",
            self.options.api_base, table.project, job.job_reference.job_id
        );

        while job.status.state != STATE_DONE {
            tokio::time::sleep(self.options.poll_interval).await;

            let mut request = self.http.get(&url).bearer_auth(token);
            if let Some(location) = job.job_reference.location.as_deref() {
                request = request.query(&[("location", location)]);
            }
            job = read_json(request.send().await?).await?;
            tracing::debug!(job_id = %job.job_reference.job_id, state = %job.status.state, "load job state");
        }

        if let Some(error) = job.status.error_result.as_ref() {
            let errors: Vec<String> = job.status.errors.iter().map(ErrorProto::describe).collect();
            for detail in &errors {
                tracing::error!(job_id = %job.job_reference.job_id, error = %detail, "load job error");
            }
            return Err(LoadError::Job {
                job_id: job.job_reference.job_id.clone(),
                message: error.describe(),
                errors,
            });
        }

        Ok(job)
    }
}

/// Validates every non-blank line of an NDJSON artifact and returns the
/// number of records.
pub fn validate_ndjson(schema: &DatasetSchema, body: &[u8]) -> Result<usize, LoadError> {
    let mut records = 0;
    for (index, line) in body.split(|byte| *byte == b'\n').enumerate() {
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        let line_number = index + 1;
        let record: Value = serde_json::from_slice(line).map_err(|err| LoadError::Schema {
            line: line_number,
            field: "<record>".to_owned(),
            reason: format!("invalid JSON: {err}"),
        })?;
        schema
            .validate_record(&record)
            .map_err(|violation| LoadError::Schema {
                line: line_number,
                field: violation.field,
                reason: violation.reason,
            })?;
        records += 1;
    }
    Ok(records)
}

fn load_job_configuration(schema: &DatasetSchema, table: &TableId) -> Value {
    json!({
        "configuration": {
            "load": {
                "sourceFormat": "NEWLINE_DELIMITED_JSON",
                "writeDisposition": "WRITE_APPEND",
                "createDisposition": "CREATE_IF_NEEDED",
                "schema": schema.to_bigquery(),
                "destinationTable": {
                    "projectId": table.project,
                    "datasetId": table.dataset,
                    "tableId": table.table,
                },
            }
        }
    })
}

fn multipart_related_body(metadata: &Value, data: &[u8]) -> Vec<u8> {
    let metadata = metadata.to_string();
    let mut body = Vec::with_capacity(metadata.len() + data.len() + 256);
    body.extend_from_slice(format!("--{MULTIPART_BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(metadata.as_bytes());
    body.extend_from_slice(format!("\r\n--{MULTIPART_BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{MULTIPART_BOUNDARY}--\r\n").as_bytes());
    body
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, LoadError> {
    let status = response.status();
    let text = response.text().await?;
    if !status.is_success() {
        return Err(LoadError::Rejected {
            status: status.as_u16(),
            body: text,
        });
    }
    serde_json::from_str(&text).map_err(|err| LoadError::Malformed(format!("{err}: {text}")))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobResource {
    job_reference: JobReference,
    #[serde(default)]
    status: JobStatus,
    #[serde(default)]
    statistics: Option<JobStatistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    #[serde(default)]
    state: String,
    #[serde(default)]
    error_result: Option<ErrorProto>,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    message: String,
}

impl ErrorProto {
    fn describe(&self) -> String {
        match self.location.as_deref() {
            Some(location) => format!("{} at {location}: {}", self.reason, self.message),
            None => format!("{}: {}", self.reason, self.message),
        }
    }
}

#[derive(Debug, Deserialize)]
struct JobStatistics {
    #[serde(default)]
    load: Option<LoadStatistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadStatistics {
    #[serde(default)]
    output_rows: Option<String>,
}
