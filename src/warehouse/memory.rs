// src/warehouse/memory.rs

use async_trait::async_trait;
use bytes::Bytes;
use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
};
use tracing::debug;

use super::{
    Dataset, DatasetRef, JobState, LoadJob, LoadJobConfig, TableRef, Warehouse, WarehouseError,
    WriteDisposition,
};
use crate::artifact::{decode_parquet_bytes, RowSet};

/// One recorded call against the in-memory warehouse, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    GetDataset(DatasetRef),
    CreateDataset(DatasetRef, String),
    SubmitLoadJob(TableRef),
    WaitForJob(String),
}

#[derive(Default)]
struct State {
    datasets: HashMap<DatasetRef, String>,
    tables: HashMap<TableRef, RowSet>,
    pending: HashMap<String, (TableRef, RowSet, WriteDisposition)>,
    calls: Vec<Call>,
    next_job: u64,
    fail_lookup: Option<(u16, String)>,
    fail_jobs: Option<String>,
    lose_create_race: HashSet<DatasetRef>,
}

/// Process-local warehouse: decodes uploaded Parquet and applies it to the
/// destination table when the job is awaited.
#[derive(Default)]
pub struct InMemoryWarehouse {
    state: Mutex<State>,
}

impl InMemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with `dataset` already present.
    pub fn with_dataset(self, dataset: DatasetRef, location: &str) -> Self {
        self.lock().datasets.insert(dataset, location.to_string());
        self
    }

    /// Make every `get_dataset` fail with an API error instead of a lookup.
    pub fn fail_dataset_lookup(self, status: u16, message: &str) -> Self {
        self.lock().fail_lookup = Some((status, message.to_string()));
        self
    }

    /// Make every load job finish with a job-level error.
    pub fn fail_load_jobs(self, message: &str) -> Self {
        self.lock().fail_jobs = Some(message.to_string());
        self
    }

    /// Simulate a concurrent writer creating `dataset` between our lookup and
    /// our create: the lookup says absent, the create says it already exists.
    pub fn lose_create_race(self, dataset: DatasetRef) -> Self {
        self.lock().lose_create_race.insert(dataset);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn has_dataset(&self, dataset: &DatasetRef) -> bool {
        self.lock().datasets.contains_key(dataset)
    }

    pub fn table(&self, table: &TableRef) -> Option<RowSet> {
        self.lock().tables.get(table).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // poisoning carries no invariant here
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Warehouse for InMemoryWarehouse {
    async fn get_dataset(&self, dataset: &DatasetRef) -> Result<Dataset, WarehouseError> {
        let mut state = self.lock();
        state.calls.push(Call::GetDataset(dataset.clone()));
        if let Some((status, message)) = &state.fail_lookup {
            return Err(WarehouseError::Api {
                status: *status,
                message: message.clone(),
            });
        }
        match state.datasets.get(dataset) {
            Some(location) => Ok(Dataset {
                reference: dataset.clone(),
                location: Some(location.clone()),
            }),
            None => Err(WarehouseError::NotFound(format!("dataset {}", dataset))),
        }
    }

    async fn create_dataset(
        &self,
        dataset: &DatasetRef,
        location: &str,
    ) -> Result<Dataset, WarehouseError> {
        let mut state = self.lock();
        state
            .calls
            .push(Call::CreateDataset(dataset.clone(), location.to_string()));
        if state.lose_create_race.remove(dataset) {
            state.datasets.insert(dataset.clone(), location.to_string());
            return Err(WarehouseError::AlreadyExists(format!("dataset {}", dataset)));
        }
        if state.datasets.contains_key(dataset) {
            return Err(WarehouseError::AlreadyExists(format!("dataset {}", dataset)));
        }
        state.datasets.insert(dataset.clone(), location.to_string());
        Ok(Dataset {
            reference: dataset.clone(),
            location: Some(location.to_string()),
        })
    }

    async fn submit_load_job(
        &self,
        source: Vec<u8>,
        destination: &TableRef,
        config: &LoadJobConfig,
    ) -> Result<LoadJob, WarehouseError> {
        let mut state = self.lock();
        state.calls.push(Call::SubmitLoadJob(destination.clone()));

        if !state.datasets.contains_key(&destination.dataset_ref()) {
            return Err(WarehouseError::NotFound(format!(
                "dataset {}",
                destination.dataset_ref()
            )));
        }
        if !config.autodetect && !state.tables.contains_key(destination) {
            return Err(WarehouseError::InvalidRequest(format!(
                "table {} does not exist and no schema was given",
                destination
            )));
        }
        let rows = decode_parquet_bytes(Bytes::from(source))
            .map_err(|e| WarehouseError::InvalidRequest(format!("{:#}", e)))?;

        state.next_job += 1;
        let job_id = format!("memory_job_{}", state.next_job);
        state.pending.insert(
            job_id.clone(),
            (destination.clone(), rows, config.write_disposition),
        );
        debug!(job_id = %job_id, table = %destination, "in-memory load job queued");

        Ok(LoadJob {
            job_id,
            project: destination.project.clone(),
            location: state.datasets.get(&destination.dataset_ref()).cloned(),
            state: JobState::Running,
        })
    }

    async fn wait_for_job(&self, job: &LoadJob) -> Result<LoadJob, WarehouseError> {
        let mut state = self.lock();
        state.calls.push(Call::WaitForJob(job.job_id.clone()));

        let (table, rows, disposition) = match state.pending.remove(&job.job_id) {
            Some(p) => p,
            None if job.state == JobState::Done => return Ok(job.clone()),
            None => return Err(WarehouseError::NotFound(format!("job {}", job.job_id))),
        };

        if let Some(message) = &state.fail_jobs {
            return Err(WarehouseError::JobFailed {
                job_id: job.job_id.clone(),
                reason: "invalid".into(),
                message: message.clone(),
            });
        }

        match disposition {
            WriteDisposition::WriteTruncate => {
                state.tables.insert(table, rows);
            }
            WriteDisposition::WriteAppend => {
                state.tables.entry(table).or_default().extend(rows.rows());
            }
            WriteDisposition::WriteEmpty => {
                let occupied = state.tables.get(&table).is_some_and(|t| !t.is_empty());
                if occupied {
                    return Err(WarehouseError::JobFailed {
                        job_id: job.job_id.clone(),
                        reason: "duplicate".into(),
                        message: format!("table {} is not empty", table),
                    });
                }
                state.tables.insert(table, rows);
            }
        }

        Ok(LoadJob {
            state: JobState::Done,
            ..job.clone()
        })
    }
}
