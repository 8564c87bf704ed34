#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;

use flowtk::config::{SchedulerConfig, TaskManager};
use flowtk::flow::{Dependency, Flow};
use flowtk::input::InputPayload;
use flowtk::types::{NodeId, WorkId};

/// Builder for `Flow` to simplify test setup.
///
/// Tasks are addressed by name; `after` refers to tasks registered
/// earlier, in any work.
pub struct FlowBuilder {
    flow: Flow,
    current: Option<WorkId>,
    ids: HashMap<String, NodeId>,
}

impl FlowBuilder {
    pub fn new(workdir: impl AsRef<Path>) -> Self {
        Self {
            flow: Flow::new(workdir.as_ref(), TaskManager::default()),
            current: None,
            ids: HashMap::new(),
        }
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.flow.set_max_retries(n);
        self
    }

    /// Start a new work; following tasks are registered into it.
    pub fn work(mut self, name: &str) -> Self {
        self.current = Some(self.flow.register_work(name));
        self
    }

    pub fn task(self, name: &str) -> Self {
        self.task_after(name, &[])
    }

    pub fn task_after(mut self, name: &str, after: &[&str]) -> Self {
        let work = match self.current {
            Some(w) => w,
            None => {
                let w = self.flow.register_work("work");
                self.current = Some(w);
                w
            }
        };
        let deps = after
            .iter()
            .map(|dep| Dependency::new(self.ids[*dep]))
            .collect();
        let id = self
            .flow
            .register_task(work, name, InputPayload::new("true"), deps)
            .expect("Failed to register task from builder");
        self.ids.insert(name.to_string(), id);
        self
    }

    pub fn exclude_current_work(mut self) -> Self {
        let work = self.current.expect("no work registered yet");
        self.flow
            .exclude_from_benchmark(work)
            .expect("Failed to exclude work");
        self
    }

    /// Allocate the flow and return it with the name → id map.
    pub fn build(mut self) -> (Flow, HashMap<String, NodeId>) {
        self.flow.allocate();
        (self.flow, self.ids)
    }
}

/// A linear chain `names[0] -> names[1] -> ...` in one work.
pub fn chain_flow(workdir: impl AsRef<Path>, names: &[&str]) -> (Flow, Vec<NodeId>) {
    let mut builder = FlowBuilder::new(workdir).work("chain");
    let mut prev: Option<&str> = None;
    for name in names {
        builder = match prev {
            Some(p) => builder.task_after(name, &[p]),
            None => builder.task(name),
        };
        prev = Some(name);
    }
    let (flow, ids) = builder.build();
    let ordered = names.iter().map(|n| ids[*n]).collect();
    (flow, ordered)
}

/// Scheduler options tuned for tests: no sleeping, bounded loop.
pub fn fast_scheduler_config() -> SchedulerConfig {
    SchedulerConfig {
        poll_interval: "1ms".to_string(),
        poll_backoff: "1ms".to_string(),
        max_cycles: Some(50),
        ..SchedulerConfig::default()
    }
}
