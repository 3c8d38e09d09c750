// src/warehouse/bigquery.rs

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{header, Client, Response};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, instrument};
use url::Url;

use super::{
    Dataset, DatasetRef, JobState, LoadJob, LoadJobConfig, SourceFormat, TableRef,
    TokenProvider, Warehouse, WarehouseError, WriteDisposition,
};

const DEFAULT_ROOT: &str = "https://bigquery.googleapis.com";

/// BigQuery v2 REST client covering datasets and multipart load jobs.
pub struct BigQueryClient {
    http: Client,
    tokens: Arc<dyn TokenProvider>,
    api_base: String,
    upload_base: String,
    poll_interval: Duration,
    create_timeout: Duration,
}

impl BigQueryClient {
    pub fn new(tokens: Arc<dyn TokenProvider>) -> Self {
        Self::with_http(Client::new(), tokens)
    }

    pub fn with_http(http: Client, tokens: Arc<dyn TokenProvider>) -> Self {
        let mut client = Self {
            http,
            tokens,
            api_base: String::new(),
            upload_base: String::new(),
            poll_interval: Duration::from_secs(1),
            create_timeout: Duration::from_secs(30),
        };
        client.set_root(DEFAULT_ROOT);
        client
    }

    /// Point the client at another host, e.g. an emulator.
    pub fn with_root(mut self, root: &str) -> Self {
        self.set_root(root);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_create_timeout(mut self, timeout: Duration) -> Self {
        self.create_timeout = timeout;
        self
    }

    fn set_root(&mut self, root: &str) {
        let root = root.trim_end_matches('/');
        self.api_base = format!("{}/bigquery/v2", root);
        self.upload_base = format!("{}/upload/bigquery/v2", root);
    }

    async fn auth_header(&self) -> Result<String, WarehouseError> {
        self.tokens.authorization().await
    }

    async fn fetch_job(&self, job: &LoadJob) -> Result<JobResource, WarehouseError> {
        let mut url = endpoint(&self.api_base, &["projects", &job.project, "jobs", &job.job_id])?;
        if let Some(loc) = &job.location {
            url.query_pairs_mut().append_pair("location", loc);
        }
        let resp = self
            .http
            .get(url)
            .header(header::AUTHORIZATION, self.auth_header().await?)
            .send()
            .await?;
        let resp = check(resp, &format!("job {}", job.job_id)).await?;
        Ok(resp.json::<JobResource>().await?)
    }
}

#[async_trait]
impl Warehouse for BigQueryClient {
    #[instrument(level = "debug", skip(self), fields(dataset = %dataset))]
    async fn get_dataset(&self, dataset: &DatasetRef) -> Result<Dataset, WarehouseError> {
        let url = endpoint(
            &self.api_base,
            &["projects", &dataset.project, "datasets", &dataset.dataset],
        )?;
        let resp = self
            .http
            .get(url)
            .header(header::AUTHORIZATION, self.auth_header().await?)
            .send()
            .await?;
        let resp = check(resp, &format!("dataset {}", dataset)).await?;
        let body: DatasetResource = resp.json().await?;
        Ok(body.into_dataset())
    }

    #[instrument(level = "debug", skip(self), fields(dataset = %dataset))]
    async fn create_dataset(
        &self,
        dataset: &DatasetRef,
        location: &str,
    ) -> Result<Dataset, WarehouseError> {
        let url = endpoint(&self.api_base, &["projects", &dataset.project, "datasets"])?;
        let body = DatasetResource {
            dataset_reference: DatasetReference {
                project_id: dataset.project.clone(),
                dataset_id: dataset.dataset.clone(),
            },
            location: Some(location.to_string()),
        };
        let resp = self
            .http
            .post(url)
            .header(header::AUTHORIZATION, self.auth_header().await?)
            .timeout(self.create_timeout)
            .json(&body)
            .send()
            .await?;
        let resp = check(resp, &format!("dataset {}", dataset)).await?;
        let created: DatasetResource = resp.json().await?;
        Ok(created.into_dataset())
    }

    #[instrument(level = "debug", skip(self, source, config), fields(table = %destination, bytes = source.len()))]
    async fn submit_load_job(
        &self,
        source: Vec<u8>,
        destination: &TableRef,
        config: &LoadJobConfig,
    ) -> Result<LoadJob, WarehouseError> {
        let stamp = Utc::now().timestamp_micros();
        let job_id = format!("pqload_{}", stamp);
        let resource = load_job_resource(&job_id, destination, config);
        let metadata = serde_json::to_vec(&resource)?;
        let boundary = format!("pqload_boundary_{}", stamp);
        let body = multipart_related(&boundary, &metadata, &source);

        let mut url = endpoint(&self.upload_base, &["projects", &destination.project, "jobs"])?;
        url.query_pairs_mut().append_pair("uploadType", "multipart");

        let resp = self
            .http
            .post(url)
            .header(header::AUTHORIZATION, self.auth_header().await?)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/related; boundary={}", boundary),
            )
            .body(body)
            .send()
            .await?;
        let resp = check(resp, &format!("job {}", job_id)).await?;
        let submitted: JobResource = resp.json().await?;
        let job = submitted.into_load_job()?;
        info!(job_id = %job.job_id, table = %destination, "load job submitted");
        Ok(job)
    }

    #[instrument(level = "debug", skip(self), fields(job_id = %job.job_id))]
    async fn wait_for_job(&self, job: &LoadJob) -> Result<LoadJob, WarehouseError> {
        if job.state == JobState::Done {
            return Ok(job.clone());
        }
        loop {
            let current = self.fetch_job(job).await?.into_load_job()?;
            if current.state == JobState::Done {
                return Ok(current);
            }
            debug!(job_id = %job.job_id, "job still running");
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// Append escaped path segments to a base URL.
fn endpoint(base: &str, segments: &[&str]) -> Result<Url, WarehouseError> {
    let mut url = Url::parse(base)
        .map_err(|e| WarehouseError::InvalidRequest(format!("bad base url {}: {}", base, e)))?;
    url.path_segments_mut()
        .map_err(|_| WarehouseError::InvalidRequest(format!("base url {} cannot hold a path", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

async fn check(resp: Response, what: &str) -> Result<Response, WarehouseError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(classify(status.as_u16(), &body, what))
}

fn classify(status: u16, body: &str, what: &str) -> WarehouseError {
    match status {
        404 => WarehouseError::NotFound(what.to_string()),
        409 => WarehouseError::AlreadyExists(what.to_string()),
        _ => WarehouseError::Api {
            status,
            message: api_message(body),
        },
    }
}

fn api_message(body: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(body)
        .map(|env| env.error.message)
        .unwrap_or_else(|_| body.trim().to_string())
}

/// Two-part `multipart/related` body: JSON job metadata, then the raw file.
fn multipart_related(boundary: &str, metadata: &[u8], media: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(metadata.len() + media.len() + 256);
    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(metadata);
    body.extend_from_slice(format!("\r\n--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(media);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body
}

fn load_job_resource(job_id: &str, destination: &TableRef, config: &LoadJobConfig) -> JobResource {
    JobResource {
        job_reference: JobReference {
            project_id: destination.project.clone(),
            job_id: job_id.to_string(),
            location: None,
        },
        configuration: Some(JobConfiguration {
            load: JobConfigurationLoad {
                destination_table: TableReference {
                    project_id: destination.project.clone(),
                    dataset_id: destination.dataset.clone(),
                    table_id: destination.table.clone(),
                },
                source_format: config.source_format,
                autodetect: config.autodetect,
                write_disposition: config.write_disposition,
            },
        }),
        status: None,
    }
}

// ----- REST payloads -----

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatasetReference {
    project_id: String,
    dataset_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatasetResource {
    dataset_reference: DatasetReference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    location: Option<String>,
}

impl DatasetResource {
    fn into_dataset(self) -> Dataset {
        Dataset {
            reference: DatasetRef::new(
                self.dataset_reference.project_id,
                self.dataset_reference.dataset_id,
            ),
            location: self.location,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableReference {
    project_id: String,
    dataset_id: String,
    table_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    project_id: String,
    job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    location: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobConfigurationLoad {
    destination_table: TableReference,
    source_format: SourceFormat,
    autodetect: bool,
    write_disposition: WriteDisposition,
}

#[derive(Debug, Serialize, Deserialize)]
struct JobConfiguration {
    load: JobConfigurationLoad,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobResource {
    job_reference: JobReference,
    #[serde(skip_deserializing, skip_serializing_if = "Option::is_none")]
    configuration: Option<JobConfiguration>,
    #[serde(default, skip_serializing)]
    status: Option<JobStatus>,
}

impl JobResource {
    /// DONE with an `errorResult` is a failed job, not a finished one.
    fn into_load_job(self) -> Result<LoadJob, WarehouseError> {
        let job_id = self.job_reference.job_id;
        let state = match &self.status {
            Some(status) if status.state == "DONE" => {
                if let Some(err) = &status.error_result {
                    return Err(WarehouseError::JobFailed {
                        job_id,
                        reason: err.reason.clone(),
                        message: err.message.clone(),
                    });
                }
                JobState::Done
            }
            _ => JobState::Running,
        };
        Ok(LoadJob {
            job_id,
            project: self.job_reference.project_id,
            location: self.job_reference.location,
            state,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    state: String,
    #[serde(default)]
    error_result: Option<ErrorProto>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ErrorProto {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}
