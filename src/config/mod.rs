// src/config/mod.rs

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::warehouse::{DatasetRef, TableRef};

/// Where the loader writes: `project.dataset.table`, plus the region used
/// when the dataset has to be created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub project: String,
    pub dataset: String,
    pub table: String,
    pub location: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            project: "secret-sphinx-470205-r9".into(),
            dataset: "test_dataset_airflow".into(),
            table: "test_table".into(),
            location: "US".into(),
        }
    }
}

impl TargetConfig {
    pub fn dataset_ref(&self) -> DatasetRef {
        DatasetRef::new(&self.project, &self.dataset)
    }

    pub fn table_ref(&self) -> TableRef {
        TableRef::new(&self.project, &self.dataset, &self.table)
    }
}

/// Scheduling policy attached to the DAG.
///
/// `retries` counts extra attempts: a task runs at most `retries + 1` times.
/// `depends_on_past` and the email flags are carried for the scheduler surface
/// only: the runner keeps no history of earlier runs and nothing here sends mail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunPolicy {
    pub owner: String,
    pub start_date: DateTime<Utc>,
    pub depends_on_past: bool,
    pub catchup: bool,
    pub email_on_failure: bool,
    pub email_on_retry: bool,
    pub retries: u32,
    pub retry_delay_secs: u64,
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self {
            owner: "airflow".into(),
            start_date: Utc.with_ymd_and_hms(2025, 8, 1, 0, 0, 0).unwrap(),
            depends_on_past: false,
            catchup: false,
            email_on_failure: false,
            email_on_retry: false,
            retries: 1,
            retry_delay_secs: 300,
        }
    }
}

impl RunPolicy {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn max_attempts(&self) -> u32 {
        self.retries + 1
    }
}

/// Everything a pipeline instance needs, passed explicitly to each step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub dag_id: String,
    pub tags: Vec<String>,
    pub artifact_path: PathBuf,
    pub target: TargetConfig,
    pub policy: RunPolicy,
    pub poll_interval_secs: u64,
    pub create_dataset_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dag_id: "parquet_to_bq_dag".into(),
            tags: vec!["example".into()],
            artifact_path: PathBuf::from("/tmp/output.parquet"),
            target: TargetConfig::default(),
            policy: RunPolicy::default(),
            poll_interval_secs: 1,
            create_dataset_timeout_secs: 30,
        }
    }
}

impl PipelineConfig {
    /// Load a YAML config. Missing keys fall back to the defaults above, so an
    /// empty document is valid.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn create_dataset_timeout(&self) -> Duration {
        Duration::from_secs(self.create_dataset_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_match_the_reference_dag() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.dag_id, "parquet_to_bq_dag");
        assert_eq!(cfg.tags, vec!["example".to_string()]);
        assert_eq!(cfg.artifact_path, PathBuf::from("/tmp/output.parquet"));
        assert_eq!(cfg.target.location, "US");
        assert_eq!(cfg.policy.retries, 1);
        assert_eq!(cfg.policy.retry_delay(), Duration::from_secs(300));
        assert_eq!(cfg.policy.max_attempts(), 2);
        assert!(!cfg.policy.catchup);
        assert!(!cfg.policy.depends_on_past);
        assert!(!cfg.policy.email_on_failure && !cfg.policy.email_on_retry);
        assert_eq!(
            cfg.target.table_ref().to_string(),
            "secret-sphinx-470205-r9.test_dataset_airflow.test_table"
        );
    }

    #[test]
    fn empty_yaml_is_default() -> Result<()> {
        assert_eq!(PipelineConfig::from_yaml_str("")?, PipelineConfig::default());
        Ok(())
    }

    #[test]
    fn partial_yaml_overrides_only_given_keys() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(
            file,
            "target:\n  project: other-project\n  table: people\npolicy:\n  retry_delay_secs: 0\nartifact_path: /data/people.parquet"
        )?;

        let cfg = PipelineConfig::from_yaml_file(file.path())?;
        assert_eq!(cfg.target.project, "other-project");
        assert_eq!(cfg.target.dataset, "test_dataset_airflow");
        assert_eq!(cfg.target.table, "people");
        assert_eq!(cfg.policy.retry_delay_secs, 0);
        assert_eq!(cfg.policy.retries, 1);
        assert_eq!(cfg.artifact_path, PathBuf::from("/data/people.parquet"));
        Ok(())
    }

    #[test]
    fn unreadable_config_names_the_path() {
        let err = PipelineConfig::from_yaml_file(Path::new("/nonexistent/pqload.yaml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/pqload.yaml"));
    }
}
