// src/steps/generate.rs

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

use super::Step;
use crate::artifact::{write_parquet, RowSet};

pub const TASK_ID: &str = "generate_parquet";

/// Producer: writes the sample people table to the artifact path.
pub struct GenerateParquet {
    artifact_path: PathBuf,
}

impl GenerateParquet {
    pub fn new(artifact_path: impl Into<PathBuf>) -> Self {
        Self {
            artifact_path: artifact_path.into(),
        }
    }

    pub fn artifact_path(&self) -> &Path {
        &self.artifact_path
    }

    /// Build the rows and write them, replacing whatever was there.
    #[instrument(level = "info", skip(self), fields(path = %self.artifact_path.display()))]
    pub async fn generate(&self) -> Result<u64> {
        let path = self.artifact_path.clone();
        let rows = RowSet::sample();
        let count = rows.len();

        let bytes = tokio::task::spawn_blocking(move || write_parquet(&path, &rows))
            .await
            .context("parquet writer task panicked")??;

        info!(
            rows = count,
            bytes,
            "✅ Parquet file generated at {}",
            self.artifact_path.display()
        );
        Ok(bytes)
    }
}

#[async_trait]
impl Step for GenerateParquet {
    fn task_id(&self) -> &str {
        TASK_ID
    }

    async fn run(&self) -> Result<()> {
        self.generate().await.map(|_| ())
    }
}
