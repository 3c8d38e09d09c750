// src/pipeline.rs

use anyhow::Result;
use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::dag::Dag;
use crate::steps::{generate, upload, GenerateParquet, UploadToWarehouse};
use crate::warehouse::Warehouse;

/// The fixed two-task graph: `generate_parquet -> upload_to_bigquery`.
pub fn build_dag(config: &PipelineConfig, warehouse: Arc<dyn Warehouse>) -> Result<Dag> {
    let mut dag = Dag::new(&config.dag_id, config.policy.clone(), config.tags.clone());
    dag.add_task(Arc::new(GenerateParquet::new(&config.artifact_path)))?;
    dag.add_task(Arc::new(UploadToWarehouse::new(config, warehouse)))?;
    dag.set_downstream(generate::TASK_ID, upload::TASK_ID)?;
    Ok(dag)
}
