// src/steps/upload.rs

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::{path::PathBuf, sync::Arc};
use tracing::{info, instrument, warn};

use super::Step;
use crate::config::PipelineConfig;
use crate::warehouse::{DatasetRef, LoadJobConfig, TableRef, Warehouse, WarehouseError};

pub const TASK_ID: &str = "upload_to_bigquery";

/// What a finished load reports back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadSummary {
    pub job_id: String,
    pub destination: TableRef,
    pub bytes: u64,
}

/// Loader: ships the artifact to the warehouse as a full-replace load.
pub struct UploadToWarehouse<W: Warehouse + ?Sized> {
    warehouse: Arc<W>,
    artifact_path: PathBuf,
    dataset: DatasetRef,
    table: TableRef,
    location: String,
}

impl<W: Warehouse + ?Sized> UploadToWarehouse<W> {
    pub fn new(config: &PipelineConfig, warehouse: Arc<W>) -> Self {
        Self {
            warehouse,
            artifact_path: config.artifact_path.clone(),
            dataset: config.target.dataset_ref(),
            table: config.target.table_ref(),
            location: config.target.location.clone(),
        }
    }

    /// Read the artifact, make sure the dataset exists, then load and wait.
    ///
    /// The file is read before any remote call, so a missing artifact never
    /// touches the warehouse.
    #[instrument(level = "info", skip(self), fields(table = %self.table))]
    pub async fn load(&self) -> Result<LoadSummary> {
        let source = tokio::fs::read(&self.artifact_path)
            .await
            .with_context(|| format!("opening artifact {}", self.artifact_path.display()))?;
        let bytes = source.len() as u64;

        self.ensure_dataset().await?;

        let job = self
            .warehouse
            .submit_load_job(source, &self.table, &LoadJobConfig::parquet_replace())
            .await
            .with_context(|| format!("submitting load job for {}", self.table))?;
        let done = self
            .warehouse
            .wait_for_job(&job)
            .await
            .with_context(|| format!("waiting for load job {}", job.job_id))?;

        info!(
            job_id = %done.job_id,
            bytes,
            "✅ Uploaded '{}' to {}",
            self.artifact_path.display(),
            self.table
        );
        Ok(LoadSummary {
            job_id: done.job_id,
            destination: self.table.clone(),
            bytes,
        })
    }

    /// Get-or-create. Only a definite "not found" leads to a create; any other
    /// lookup error is returned as-is. Lookup and create are two calls, so a
    /// concurrent run may create the dataset in between; that surfaces as
    /// `AlreadyExists` and is accepted.
    async fn ensure_dataset(&self) -> Result<()> {
        match self.warehouse.get_dataset(&self.dataset).await {
            Ok(_) => {
                info!("✅ Dataset {} exists", self.dataset.dataset);
                Ok(())
            }
            Err(WarehouseError::NotFound(_)) => {
                match self
                    .warehouse
                    .create_dataset(&self.dataset, &self.location)
                    .await
                {
                    Ok(_) => {
                        info!(location = %self.location, "✅ Created dataset {}", self.dataset.dataset);
                        Ok(())
                    }
                    Err(WarehouseError::AlreadyExists(_)) => {
                        warn!("dataset {} appeared while creating it; continuing", self.dataset);
                        Ok(())
                    }
                    Err(e) => Err(e).with_context(|| format!("creating dataset {}", self.dataset)),
                }
            }
            Err(e) => Err(e).with_context(|| format!("looking up dataset {}", self.dataset)),
        }
    }
}

#[async_trait]
impl<W: Warehouse + ?Sized> Step for UploadToWarehouse<W> {
    fn task_id(&self) -> &str {
        TASK_ID
    }

    async fn run(&self) -> Result<()> {
        self.load().await.map(|_| ())
    }
}
