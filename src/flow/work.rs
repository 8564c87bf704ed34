// src/flow/work.rs

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::QueueConfig;
use crate::errors::{FlowError, Result};
use crate::input::InputPayload;
use crate::status::Status;
use crate::types::{NodeId, ResourceRequest, WorkId};

use super::task::{Dependency, Task, TaskResults};

/// Ordered group of tasks. Holds no execution logic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Work {
    index: WorkId,
    name: String,
    tasks: Vec<Task>,
}

impl Work {
    pub(crate) fn new(index: WorkId, name: String) -> Self {
        Self {
            index,
            name,
            tasks: Vec::new(),
        }
    }

    pub fn index(&self) -> WorkId {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub(crate) fn tasks_mut(&mut self) -> &mut [Task] {
        &mut self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Task> {
        self.tasks.iter()
    }

    pub fn task(&self, index: usize) -> Option<&Task> {
        self.tasks.get(index)
    }

    pub(crate) fn task_mut(&mut self, index: usize) -> Option<&mut Task> {
        self.tasks.get_mut(index)
    }

    /// Append a task.
    ///
    /// Producers must already exist: either in an earlier work or earlier in
    /// this one.
    pub fn register_task(
        &mut self,
        name: impl Into<String>,
        input: InputPayload,
        manager: QueueConfig,
        resources: ResourceRequest,
        deps: Vec<Dependency>,
    ) -> Result<NodeId> {
        let id = NodeId::new(self.index, self.tasks.len());
        let name = name.into();

        for dep in deps.iter() {
            let earlier = dep.node.work < self.index
                || (dep.node.work == self.index && dep.node.task < id.task);
            if !earlier {
                return Err(FlowError::ConfigError(format!(
                    "task {id} ('{name}') depends on {} which is not registered before it",
                    dep.node
                )));
            }
        }
        if self.tasks.iter().any(|t| t.name() == name) {
            return Err(FlowError::ConfigError(format!(
                "work '{}' already has a task named '{name}'",
                self.name
            )));
        }

        self.tasks
            .push(Task::new(id, name, input, resources, manager, deps));
        Ok(id)
    }

    /// Minimum over the task statuses; an empty work counts as `Completed`.
    pub fn status(&self) -> Status {
        self.tasks
            .iter()
            .map(|t| t.status())
            .min()
            .unwrap_or(Status::Completed)
    }

    pub fn all_ok(&self) -> bool {
        self.tasks.iter().all(|t| t.status() == Status::Completed)
    }

    pub fn get_results(&self) -> BTreeMap<usize, TaskResults> {
        self.tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (i, t.results()))
            .collect()
    }

    /// From the first submission to the last finish, if anything finished.
    pub fn wall_time(&self) -> Option<Duration> {
        let attempts = self.tasks.iter().flat_map(|t| t.attempts().iter());
        let start = attempts.clone().map(|a| a.submitted_at).min()?;
        let end = attempts.filter_map(|a| a.finished_at).max()?;
        (end - start).to_std().ok()
    }
}

impl<'a> IntoIterator for &'a Work {
    type Item = &'a Task;
    type IntoIter = std::slice::Iter<'a, Task>;

    fn into_iter(self) -> Self::IntoIter {
        self.tasks.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(work: &mut Work, name: &str, deps: Vec<Dependency>) -> Result<NodeId> {
        work.register_task(
            name,
            InputPayload::new("true"),
            QueueConfig::default(),
            ResourceRequest::default(),
            deps,
        )
    }

    #[test]
    fn indices_follow_registration_order() {
        let mut w = Work::new(2, "bands".to_string());
        let a = register(&mut w, "a", vec![]).unwrap();
        let b = register(&mut w, "b", vec![Dependency::new(a)]).unwrap();
        assert_eq!(a, NodeId::new(2, 0));
        assert_eq!(b, NodeId::new(2, 1));
        assert_eq!(w.len(), 2);
    }

    #[test]
    fn forward_and_later_work_references_are_rejected() {
        let mut w = Work::new(1, "w".to_string());
        assert!(register(&mut w, "a", vec![Dependency::new(NodeId::new(1, 0))]).is_err());
        assert!(register(&mut w, "a", vec![Dependency::new(NodeId::new(2, 0))]).is_err());
        assert!(register(&mut w, "a", vec![Dependency::new(NodeId::new(0, 5))]).is_ok());
        assert!(register(&mut w, "a", vec![]).is_err(), "duplicate name");
    }

    #[test]
    fn status_is_minimum_and_empty_work_is_ok() {
        let mut w = Work::new(0, "w".to_string());
        assert_eq!(w.status(), Status::Completed);
        assert!(w.all_ok());

        register(&mut w, "a", vec![]).unwrap();
        register(&mut w, "b", vec![]).unwrap();
        w.tasks[1].set_status(Status::Ready).unwrap();
        assert_eq!(w.status(), Status::Initialized);
        assert!(!w.all_ok());
        assert_eq!(w.get_results().len(), 2);
        assert_eq!(w.get_results()[&1].status, Status::Ready);
    }
}
