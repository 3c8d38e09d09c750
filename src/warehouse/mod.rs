// src/warehouse/mod.rs

//! The warehouse seam used by the loader step.
//!
//! `BigQueryClient` talks to the real REST API; `InMemoryWarehouse` keeps
//! tables in process for tests and dry runs.

pub mod auth;
pub mod bigquery;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use auth::{ServiceAccountTokens, StaticToken, TokenProvider};
pub use bigquery::BigQueryClient;
pub use memory::InMemoryWarehouse;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DatasetRef {
    pub project: String,
    pub dataset: String,
}

impl DatasetRef {
    pub fn new(project: impl Into<String>, dataset: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            dataset: dataset.into(),
        }
    }
}

impl fmt::Display for DatasetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.project, self.dataset)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableRef {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    pub fn new(
        project: impl Into<String>,
        dataset: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            dataset: dataset.into(),
            table: table.into(),
        }
    }

    pub fn dataset_ref(&self) -> DatasetRef {
        DatasetRef::new(&self.project, &self.dataset)
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

/// Dataset metadata as returned by get/create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    pub reference: DatasetRef,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceFormat {
    Parquet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WriteDisposition {
    /// Replace all existing rows.
    WriteTruncate,
    WriteAppend,
    /// Fail if the table already holds rows.
    WriteEmpty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadJobConfig {
    pub source_format: SourceFormat,
    pub autodetect: bool,
    pub write_disposition: WriteDisposition,
}

impl LoadJobConfig {
    /// Parquet, schema autodetect, full replace.
    pub fn parquet_replace() -> Self {
        Self {
            source_format: SourceFormat::Parquet,
            autodetect: true,
            write_disposition: WriteDisposition::WriteTruncate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    Done,
}

/// Handle to a submitted load job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadJob {
    pub job_id: String,
    pub project: String,
    pub location: Option<String>,
    pub state: JobState,
}

#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("warehouse API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("load job {job_id} failed ({reason}): {message}")]
    JobFailed {
        job_id: String,
        reason: String,
        message: String,
    },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("decoding warehouse response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl WarehouseError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, WarehouseError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, WarehouseError::AlreadyExists(_))
    }
}

/// Operations the loader consumes from a warehouse.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// `Err(NotFound)` when the dataset is absent; every other failure is
    /// reported as itself.
    async fn get_dataset(&self, dataset: &DatasetRef) -> Result<Dataset, WarehouseError>;

    /// `Err(AlreadyExists)` when another writer got there first.
    async fn create_dataset(
        &self,
        dataset: &DatasetRef,
        location: &str,
    ) -> Result<Dataset, WarehouseError>;

    async fn submit_load_job(
        &self,
        source: Vec<u8>,
        destination: &TableRef,
        config: &LoadJobConfig,
    ) -> Result<LoadJob, WarehouseError>;

    /// Block until the job is done. Job-level failures come back as `JobFailed`.
    async fn wait_for_job(&self, job: &LoadJob) -> Result<LoadJob, WarehouseError>;
}
