// src/dag/mod.rs

//! Pipeline graph: named tasks plus explicit `upstream -> downstream` edges.

pub mod run;

use indexmap::IndexMap;
use std::{collections::VecDeque, sync::Arc};
use thiserror::Error;

use crate::config::RunPolicy;
use crate::steps::Step;

pub use run::{DagRunner, RunError, RunReport, RunState, TaskReport, TaskState};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DagError {
    #[error("task `{0}` is already registered")]
    DuplicateTask(String),

    #[error("unknown task `{0}`")]
    UnknownTask(String),

    #[error("edge {0} -> {1} would create a cycle")]
    Cycle(String, String),
}

pub struct Dag {
    dag_id: String,
    policy: RunPolicy,
    tags: Vec<String>,
    tasks: IndexMap<String, Arc<dyn Step>>,
    edges: Vec<(String, String)>,
}

impl Dag {
    pub fn new(dag_id: impl Into<String>, policy: RunPolicy, tags: Vec<String>) -> Self {
        Self {
            dag_id: dag_id.into(),
            policy,
            tags,
            tasks: IndexMap::new(),
            edges: Vec::new(),
        }
    }

    pub fn dag_id(&self) -> &str {
        &self.dag_id
    }

    pub fn policy(&self) -> &RunPolicy {
        &self.policy
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn edges(&self) -> &[(String, String)] {
        &self.edges
    }

    pub fn task(&self, task_id: &str) -> Option<&Arc<dyn Step>> {
        self.tasks.get(task_id)
    }

    pub fn add_task(&mut self, step: Arc<dyn Step>) -> Result<(), DagError> {
        let id = step.task_id().to_string();
        if self.tasks.contains_key(&id) {
            return Err(DagError::DuplicateTask(id));
        }
        self.tasks.insert(id, step);
        Ok(())
    }

    /// Declare that `downstream` may only start after `upstream` succeeded.
    pub fn set_downstream(&mut self, upstream: &str, downstream: &str) -> Result<(), DagError> {
        for id in [upstream, downstream] {
            if !self.tasks.contains_key(id) {
                return Err(DagError::UnknownTask(id.to_string()));
            }
        }
        if upstream == downstream || self.reaches(downstream, upstream) {
            return Err(DagError::Cycle(upstream.to_string(), downstream.to_string()));
        }
        let edge = (upstream.to_string(), downstream.to_string());
        if !self.edges.contains(&edge) {
            self.edges.push(edge);
        }
        Ok(())
    }

    pub fn upstream_of(&self, task_id: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|(_, down)| down == task_id)
            .map(|(up, _)| up.as_str())
            .collect()
    }

    /// Kahn's algorithm; ties are broken by registration order.
    pub fn topological_order(&self) -> Vec<&str> {
        let mut indegree: IndexMap<&str, usize> =
            self.tasks.keys().map(|k| (k.as_str(), 0)).collect();
        for (_, down) in &self.edges {
            if let Some(d) = indegree.get_mut(down.as_str()) {
                *d += 1;
            }
        }

        let mut ready: VecDeque<&str> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(k, _)| *k)
            .collect();
        let mut order = Vec::with_capacity(self.tasks.len());

        while let Some(id) = ready.pop_front() {
            order.push(id);
            for (up, down) in &self.edges {
                if up != id {
                    continue;
                }
                if let Some(d) = indegree.get_mut(down.as_str()) {
                    *d -= 1;
                    if *d == 0 {
                        ready.push_back(down.as_str());
                    }
                }
            }
        }
        order
    }

    fn reaches(&self, from: &str, to: &str) -> bool {
        let mut stack = vec![from];
        let mut seen = Vec::new();
        while let Some(cur) = stack.pop() {
            if cur == to {
                return true;
            }
            if seen.contains(&cur) {
                continue;
            }
            seen.push(cur);
            stack.extend(
                self.edges
                    .iter()
                    .filter(|(up, _)| up == cur)
                    .map(|(_, down)| down.as_str()),
            );
        }
        false
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;

    pub(crate) struct Noop(pub &'static str);

    #[async_trait]
    impl Step for Noop {
        fn task_id(&self) -> &str {
            self.0
        }

        async fn run(&self) -> Result<()> {
            Ok(())
        }
    }

    fn dag_with(ids: &[&'static str]) -> Dag {
        let mut dag = Dag::new("test_dag", RunPolicy::default(), vec![]);
        for id in ids {
            dag.add_task(Arc::new(Noop(*id))).unwrap();
        }
        dag
    }

    #[test]
    fn duplicate_task_is_rejected() {
        let mut dag = dag_with(&["a"]);
        assert_eq!(
            dag.add_task(Arc::new(Noop("a"))),
            Err(DagError::DuplicateTask("a".into()))
        );
    }

    #[test]
    fn edges_need_known_tasks() {
        let mut dag = dag_with(&["a"]);
        assert_eq!(
            dag.set_downstream("a", "b"),
            Err(DagError::UnknownTask("b".into()))
        );
    }

    #[test]
    fn cycles_are_rejected() {
        let mut dag = dag_with(&["a", "b", "c"]);
        dag.set_downstream("a", "b").unwrap();
        dag.set_downstream("b", "c").unwrap();
        assert_eq!(
            dag.set_downstream("c", "a"),
            Err(DagError::Cycle("c".into(), "a".into()))
        );
        assert!(matches!(dag.set_downstream("a", "a"), Err(DagError::Cycle(..))));
    }

    #[test]
    fn topological_order_follows_edges_not_registration() {
        let mut dag = dag_with(&["load", "extract", "report"]);
        dag.set_downstream("extract", "load").unwrap();
        dag.set_downstream("load", "report").unwrap();
        assert_eq!(dag.topological_order(), vec!["extract", "load", "report"]);
        assert_eq!(dag.upstream_of("load"), vec!["extract"]);
    }

    #[test]
    fn repeated_edge_is_stored_once() {
        let mut dag = dag_with(&["a", "b"]);
        dag.set_downstream("a", "b").unwrap();
        dag.set_downstream("a", "b").unwrap();
        assert_eq!(dag.edges().len(), 1);
    }
}
