// src/steps/mod.rs

pub mod generate;
pub mod upload;

use anyhow::Result;
use async_trait::async_trait;

pub use generate::GenerateParquet;
pub use upload::{LoadSummary, UploadToWarehouse};

/// A unit of work the DAG runner invokes. Each call is one full attempt;
/// retries call `run` again from the top.
#[async_trait]
pub trait Step: Send + Sync {
    fn task_id(&self) -> &str;

    async fn run(&self) -> Result<()>;
}
