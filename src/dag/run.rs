// src/dag/run.rs

use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use std::time::Instant;
use thiserror::Error;
use tracing::{error, info, warn};

use super::Dag;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    UpForRetry,
    Success,
    Failed,
    UpstreamFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Queued,
    Running,
    Success,
    Failed,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RunError {
    #[error("dag {dag_id} starts at {start_date}, logical date {logical_date} is earlier")]
    NotStarted {
        dag_id: String,
        start_date: DateTime<Utc>,
        logical_date: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    pub state: TaskState,
    pub attempts: u32,
    /// Last error, rendered with its context chain.
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub dag_id: String,
    pub run_id: String,
    pub logical_date: DateTime<Utc>,
    pub state: RunState,
    pub tasks: IndexMap<String, TaskReport>,
    /// Every task state change, in the order it happened.
    pub transitions: Vec<(String, TaskState)>,
}

impl RunReport {
    pub fn task(&self, task_id: &str) -> Option<&TaskReport> {
        self.tasks.get(task_id)
    }

    pub fn succeeded(&self) -> bool {
        self.state == RunState::Success
    }

    fn set(&mut self, task_id: &str, state: TaskState) {
        if let Some(t) = self.tasks.get_mut(task_id) {
            t.state = state;
        }
        self.transitions.push((task_id.to_string(), state));
    }
}

/// Executes one run of a DAG: tasks one at a time in dependency order, each
/// retried per the DAG's policy.
#[derive(Debug, Default, Clone, Copy)]
pub struct DagRunner;

impl DagRunner {
    pub fn new() -> Self {
        Self
    }

    pub async fn execute(&self, dag: &Dag) -> Result<RunReport, RunError> {
        self.execute_at(dag, Utc::now()).await
    }

    /// Run for a single logical date. Past dates are never backfilled; a
    /// date before the DAG's start date is refused outright.
    pub async fn execute_at(
        &self,
        dag: &Dag,
        logical_date: DateTime<Utc>,
    ) -> Result<RunReport, RunError> {
        let policy = dag.policy();
        if logical_date < policy.start_date {
            return Err(RunError::NotStarted {
                dag_id: dag.dag_id().to_string(),
                start_date: policy.start_date,
                logical_date,
            });
        }

        let order = dag.topological_order();
        let mut report = RunReport {
            dag_id: dag.dag_id().to_string(),
            run_id: format!(
                "manual__{}",
                logical_date.to_rfc3339_opts(SecondsFormat::Secs, true)
            ),
            logical_date,
            state: RunState::Queued,
            tasks: order
                .iter()
                .map(|id| {
                    (
                        id.to_string(),
                        TaskReport {
                            state: TaskState::Pending,
                            attempts: 0,
                            error: None,
                        },
                    )
                })
                .collect(),
            transitions: Vec::new(),
        };

        report.state = RunState::Running;
        info!(dag_id = %report.dag_id, run_id = %report.run_id, tasks = order.len(), "dag run started");
        let started = Instant::now();

        for task_id in order {
            let upstream_ok = dag.upstream_of(task_id).iter().all(|up| {
                report
                    .task(up)
                    .is_some_and(|t| t.state == TaskState::Success)
            });
            if !upstream_ok {
                warn!(task_id, "skipping task, upstream did not succeed");
                report.set(task_id, TaskState::UpstreamFailed);
                continue;
            }

            let Some(step) = dag.task(task_id) else {
                continue;
            };
            let max_attempts = policy.max_attempts();

            loop {
                let attempt = report.task(task_id).map_or(0, |t| t.attempts) + 1;
                if let Some(t) = report.tasks.get_mut(task_id) {
                    t.attempts = attempt;
                }
                report.set(task_id, TaskState::Running);
                info!(task_id, attempt, max_attempts, "task started");

                match step.run().await {
                    Ok(()) => {
                        report.set(task_id, TaskState::Success);
                        info!(task_id, attempt, "task succeeded");
                        break;
                    }
                    Err(e) => {
                        let rendered = format!("{:#}", e);
                        if let Some(t) = report.tasks.get_mut(task_id) {
                            t.error = Some(rendered.clone());
                        }
                        if attempt < max_attempts {
                            report.set(task_id, TaskState::UpForRetry);
                            warn!(
                                task_id,
                                attempt,
                                delay = ?policy.retry_delay(),
                                error = %rendered,
                                "task failed, retrying"
                            );
                            tokio::time::sleep(policy.retry_delay()).await;
                        } else {
                            report.set(task_id, TaskState::Failed);
                            error!(task_id, attempt, error = %rendered, "task failed");
                            break;
                        }
                    }
                }
            }
        }

        report.state = if report
            .tasks
            .values()
            .all(|t| t.state == TaskState::Success)
        {
            RunState::Success
        } else {
            RunState::Failed
        };
        info!(
            dag_id = %report.dag_id,
            run_id = %report.run_id,
            state = ?report.state,
            elapsed = ?started.elapsed(),
            "dag run finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunPolicy;
    use crate::dag::tests::Noop;
    use crate::steps::Step;
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };

    /// Fails the first `failures` calls, then succeeds.
    struct Flaky {
        id: &'static str,
        failures: u32,
        calls: AtomicU32,
    }

    impl Flaky {
        fn new(id: &'static str, failures: u32) -> Arc<Self> {
            Arc::new(Self {
                id,
                failures,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl Step for Flaky {
        fn task_id(&self) -> &str {
            self.id
        }

        async fn run(&self) -> Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                bail!("boom #{}", n + 1);
            }
            Ok(())
        }
    }

    fn policy(retries: u32) -> RunPolicy {
        RunPolicy {
            retries,
            retry_delay_secs: 0,
            ..RunPolicy::default()
        }
    }

    fn two_step(first: Arc<dyn Step>, second: Arc<dyn Step>, retries: u32) -> Dag {
        let mut dag = Dag::new("test_dag", policy(retries), vec!["example".into()]);
        let (a, b) = (first.task_id().to_string(), second.task_id().to_string());
        dag.add_task(first).unwrap();
        dag.add_task(second).unwrap();
        dag.set_downstream(&a, &b).unwrap();
        dag
    }

    #[tokio::test]
    async fn happy_path_runs_both_in_order() {
        let dag = two_step(Arc::new(Noop("produce")), Arc::new(Noop("load")), 1);
        let report = DagRunner::new().execute(&dag).await.unwrap();

        assert!(report.succeeded());
        assert_eq!(
            report.transitions,
            vec![
                ("produce".to_string(), TaskState::Running),
                ("produce".to_string(), TaskState::Success),
                ("load".to_string(), TaskState::Running),
                ("load".to_string(), TaskState::Success),
            ]
        );
        assert!(report.run_id.starts_with("manual__"));
    }

    #[tokio::test]
    async fn one_failure_is_absorbed_by_the_retry() {
        let flaky = Flaky::new("produce", 1);
        let dag = two_step(flaky.clone(), Arc::new(Noop("load")), 1);
        let report = DagRunner::new().execute(&dag).await.unwrap();

        assert!(report.succeeded());
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
        let produce = report.task("produce").unwrap();
        assert_eq!(produce.attempts, 2);
        assert_eq!(produce.error.as_deref(), Some("boom #1"));
        assert!(report
            .transitions
            .contains(&("produce".to_string(), TaskState::UpForRetry)));
    }

    #[tokio::test]
    async fn exhausted_retries_fail_the_run_and_skip_downstream() {
        let flaky = Flaky::new("produce", 5);
        let load = Flaky::new("load", 0);
        let dag = two_step(flaky.clone(), load.clone(), 1);
        let report = DagRunner::new().execute(&dag).await.unwrap();

        assert_eq!(report.state, RunState::Failed);
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
        assert_eq!(load.calls.load(Ordering::SeqCst), 0);
        assert_eq!(report.task("produce").unwrap().state, TaskState::Failed);
        assert_eq!(report.task("load").unwrap().state, TaskState::UpstreamFailed);
        assert_eq!(report.task("load").unwrap().attempts, 0);
    }

    #[tokio::test]
    async fn downstream_failure_does_not_rerun_upstream() {
        let produce = Flaky::new("produce", 0);
        let load = Flaky::new("load", 1);
        let dag = two_step(produce.clone(), load.clone(), 0);
        let report = DagRunner::new().execute(&dag).await.unwrap();

        assert_eq!(report.state, RunState::Failed);
        assert_eq!(produce.calls.load(Ordering::SeqCst), 1);
        assert_eq!(load.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn logical_date_before_start_is_refused() {
        let produce = Flaky::new("produce", 0);
        let dag = two_step(produce.clone(), Arc::new(Noop("load")), 1);
        let early = Utc.with_ymd_and_hms(2025, 7, 31, 0, 0, 0).unwrap();

        let err = DagRunner::new().execute_at(&dag, early).await.unwrap_err();
        assert!(matches!(err, RunError::NotStarted { .. }));
        assert_eq!(produce.calls.load(Ordering::SeqCst), 0);
    }
}
