// src/flow/flow.rs

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{FlowFile, TaskManager};
use crate::errors::{FlowError, Result};
use crate::input::{ArtifactLink, FileInputBuilder, InputBuilder, InputPayload};
use crate::qadapters::Backends;
use crate::status::Status;
use crate::types::{NodeId, WorkId};

use super::graph::{self, DependencyGraph};
use super::persistence::{self, pickle_path};
use super::task::{Dependency, Task, TaskSpec};
use super::work::Work;

fn default_input_builder() -> Arc<dyn InputBuilder> {
    Arc::new(FileInputBuilder)
}

/// Per-work timing reported by [`Flow::benchmark_summary`].
#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkEntry {
    pub work: WorkId,
    pub name: String,
    pub num_tasks: usize,
    pub wall_time: Option<Duration>,
}

/// Ordered works sharing a working directory, a manager and a retry
/// policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    name: String,
    workdir: PathBuf,
    manager: TaskManager,
    max_retries: u32,
    works: Vec<Work>,
    #[serde(default)]
    excluded: BTreeSet<WorkId>,
    #[serde(default)]
    allocated: bool,
    #[serde(skip, default = "default_input_builder")]
    input_builder: Arc<dyn InputBuilder>,
}

impl Flow {
    pub fn new(workdir: impl Into<PathBuf>, manager: TaskManager) -> Self {
        let max_retries = manager.policy.max_retries;
        Self {
            name: "flow".to_string(),
            workdir: workdir.into(),
            manager,
            max_retries,
            works: Vec::new(),
            excluded: BTreeSet::new(),
            allocated: false,
            input_builder: default_input_builder(),
        }
    }

    /// Build a flow from a validated flow file.
    pub fn from_flow_file(
        file: &FlowFile,
        workdir: impl Into<PathBuf>,
        manager: TaskManager,
    ) -> Result<Self> {
        let mut flow = Flow::new(workdir, manager);
        flow.name = file.flow.name.clone();
        if let Some(n) = file.flow.max_retries {
            flow.max_retries = n;
        }

        let mut ids: HashMap<String, NodeId> = HashMap::new();
        for work_cfg in file.work.iter() {
            let work = flow.register_work(&work_cfg.name);
            if work_cfg.exclude_from_benchmark {
                flow.exclude_from_benchmark(work)?;
            }

            for task_cfg in work_cfg.task.iter() {
                let mut deps = Vec::with_capacity(task_cfg.deps.len());
                for dep in task_cfg.deps.iter() {
                    let node = *ids.get(&dep.task).ok_or_else(|| {
                        FlowError::ConfigError(format!("unknown dependency '{}'", dep.task))
                    })?;
                    deps.push(Dependency {
                        node,
                        artifact: dep.artifact,
                        status: dep.status.unwrap_or(Status::Completed),
                    });
                }

                let input = InputPayload {
                    executable: task_cfg.executable.clone(),
                    args: task_cfg.args.clone(),
                    stdin: task_cfg.stdin.clone(),
                    files: task_cfg.files.clone(),
                };
                let spec = TaskSpec {
                    name: task_cfg.name.clone(),
                    input,
                    resources: task_cfg.resources.clone(),
                    qparams: task_cfg.qparams.clone(),
                    deps,
                };
                let id = flow.register_task_spec(work, spec)?;
                ids.insert(format!("{}.{}", work_cfg.name, task_cfg.name), id);
            }
        }
        Ok(flow)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn manager(&self) -> &TaskManager {
        &self.manager
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn set_max_retries(&mut self, n: u32) {
        self.max_retries = n;
    }

    pub fn input_builder(&self) -> Arc<dyn InputBuilder> {
        Arc::clone(&self.input_builder)
    }

    pub fn set_input_builder(&mut self, builder: Arc<dyn InputBuilder>) {
        self.input_builder = builder;
    }

    pub fn works(&self) -> &[Work] {
        &self.works
    }

    pub fn work(&self, id: WorkId) -> Result<&Work> {
        self.works.get(id).ok_or(FlowError::WorkNotFound(id))
    }

    pub fn num_tasks(&self) -> usize {
        self.works.iter().map(|w| w.len()).sum()
    }

    /// All tasks in work-registration order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.works.iter().flat_map(|w| w.iter())
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.tasks().map(|t| t.id()).collect()
    }

    pub fn task(&self, id: NodeId) -> Result<&Task> {
        self.works
            .get(id.work)
            .and_then(|w| w.task(id.task))
            .ok_or(FlowError::TaskNotFound(id))
    }

    pub fn task_mut(&mut self, id: NodeId) -> Result<&mut Task> {
        self.works
            .get_mut(id.work)
            .and_then(|w| w.task_mut(id.task))
            .ok_or(FlowError::TaskNotFound(id))
    }

    pub fn register_work(&mut self, name: impl Into<String>) -> WorkId {
        let id = self.works.len();
        self.works.push(Work::new(id, name.into()));
        id
    }

    /// Register a task with default resources.
    pub fn register_task(
        &mut self,
        work: WorkId,
        name: impl Into<String>,
        input: InputPayload,
        deps: Vec<Dependency>,
    ) -> Result<NodeId> {
        let mut spec = TaskSpec::new(name, input);
        spec.deps = deps;
        self.register_task_spec(work, spec)
    }

    /// Register a task; its producers must already exist.
    pub fn register_task_spec(&mut self, work: WorkId, spec: TaskSpec) -> Result<NodeId> {
        if work >= self.works.len() {
            return Err(FlowError::WorkNotFound(work));
        }
        for dep in spec.deps.iter() {
            self.task(dep.node)?;
        }

        let mut queue = self.manager.select_qadapter(&spec.resources)?.clone();
        queue.queue.qparams.extend(spec.qparams);

        let id = self.works[work].register_task(
            spec.name,
            spec.input,
            queue,
            spec.resources,
            spec.deps,
        )?;

        if self.allocated {
            let dir = self.task_dir(id);
            self.task_mut(id)?.set_dir(dir);
        }
        debug!(task = %id, "registered task");
        Ok(id)
    }

    /// Add an edge after registration. Rejects edges that close a cycle.
    pub fn add_dependency(&mut self, consumer: NodeId, dep: Dependency) -> Result<()> {
        self.task(dep.node)?;
        let status = self.task(consumer)?.status();
        if status != Status::Initialized {
            return Err(FlowError::ConfigError(format!(
                "cannot add a dependency to {consumer} in status {status}"
            )));
        }
        graph::check_new_edge(&self.dependency_graph(), dep.node, consumer)?;
        self.task_mut(consumer)?.push_dependency(dep);
        Ok(())
    }

    fn task_dir(&self, id: NodeId) -> PathBuf {
        self.workdir
            .join(format!("w{}", id.work))
            .join(format!("t{}", id.task))
    }

    pub fn is_allocated(&self) -> bool {
        self.allocated
    }

    /// Assign `w{i}/t{j}` directories. Repeated calls only touch tasks
    /// registered since the last one.
    pub fn allocate(&mut self) {
        let ids: Vec<NodeId> = self
            .tasks()
            .filter(|t| !t.is_allocated())
            .map(|t| t.id())
            .collect();
        for id in ids {
            let dir = self.task_dir(id);
            if let Ok(task) = self.task_mut(id) {
                task.set_dir(dir);
            }
        }
        self.allocated = true;
    }

    /// Create the directory tree.
    pub fn build(&self) -> Result<()> {
        if !self.allocated {
            return Err(FlowError::NotAllocated);
        }
        fs::create_dir_all(&self.workdir)?;
        for task in self.tasks() {
            task.build_dirs()?;
        }
        Ok(())
    }

    pub fn build_and_pickle_dump(&self) -> Result<()> {
        self.build()?;
        self.pickle_dump()?;
        info!(
            workdir = %self.workdir.display(),
            tasks = self.num_tasks(),
            "flow built"
        );
        Ok(())
    }

    pub fn pickle_dump(&self) -> Result<()> {
        persistence::write_json_atomic(&pickle_path(&self.workdir), self)
    }

    /// Restore a persisted flow. Tasks caught mid-submission go back to
    /// `Ready`.
    pub fn pickle_load(workdir: &Path) -> Result<Self> {
        let mut flow: Flow = persistence::read_json(&pickle_path(workdir))?;
        for work in flow.works.iter_mut() {
            for task in work.tasks_mut() {
                task.recover_after_restart()?;
            }
        }
        info!(workdir = %workdir.display(), tasks = flow.num_tasks(), "loaded flow");
        Ok(flow)
    }

    pub fn exclude_from_benchmark(&mut self, work: WorkId) -> Result<()> {
        self.work(work)?;
        self.excluded.insert(work);
        Ok(())
    }

    pub fn is_excluded_from_benchmark(&self, work: WorkId) -> bool {
        self.excluded.contains(&work)
    }

    pub fn benchmark_works(&self) -> impl Iterator<Item = &Work> {
        self.works
            .iter()
            .filter(|w| !self.excluded.contains(&w.index()))
    }

    pub fn benchmark_summary(&self) -> Vec<BenchmarkEntry> {
        self.benchmark_works()
            .map(|w| BenchmarkEntry {
                work: w.index(),
                name: w.name().to_string(),
                num_tasks: w.len(),
                wall_time: w.wall_time(),
            })
            .collect()
    }

    pub fn dependency_graph(&self) -> DependencyGraph {
        graph::build_graph(&self.works)
    }

    pub fn to_dot(&self) -> String {
        graph::to_dot(&self.name, &self.works)
    }

    pub fn text_tree(&self) -> String {
        graph::text_tree(&self.works)
    }

    pub fn status_counts(&self) -> BTreeMap<Status, usize> {
        let mut counts = BTreeMap::new();
        for task in self.tasks() {
            *counts.entry(task.status()).or_insert(0) += 1;
        }
        counts
    }

    pub fn num_errors(&self) -> usize {
        self.tasks().filter(|t| t.status() == Status::Error).count()
    }

    /// Text table with one row per task.
    pub fn show_status(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Flow '{}' in {}", self.name, self.workdir.display());
        let _ = writeln!(
            out,
            "{:<8} {:<16} {:<13} {:>8} {:<12} {}",
            "Task", "Name", "Status", "Restarts", "Job", "Note"
        );
        for work in self.works.iter() {
            let flag = if self.excluded.contains(&work.index()) {
                " (excluded from benchmark)"
            } else {
                ""
            };
            let _ = writeln!(out, "[w{}] {} -> {}{}", work.index(), work.name(), work.status(), flag);
            for task in work.iter() {
                let note = match (task.unreachable(), task.failure()) {
                    (Some(p), _) => format!("unreachable: {p} failed"),
                    (None, Some(f)) => f.to_string(),
                    (None, None) => String::new(),
                };
                let _ = writeln!(
                    out,
                    "{:<8} {:<16} {:<13} {:>8} {:<12} {}",
                    task.id().to_string(),
                    task.name(),
                    task.status().to_string(),
                    task.num_restarts(),
                    task.job_id().map(|j| j.to_string()).unwrap_or_else(|| "-".into()),
                    note
                );
            }
        }
        out
    }

    /// Every task of every work (benchmark-excluded ones included) is
    /// `Completed`.
    pub fn all_ok(&self) -> bool {
        self.works.iter().all(|w| w.all_ok())
    }

    /// Move `Initialized` tasks whose producers are satisfied to `Ready`
    /// and mark consumers of failed producers as unreachable.
    ///
    /// Returns the tasks that became `Ready`.
    pub fn refresh_readiness(&mut self) -> Result<Vec<NodeId>> {
        let mut newly_ready = Vec::new();

        loop {
            let snapshot: HashMap<NodeId, (Status, Option<NodeId>)> = self
                .tasks()
                .map(|t| (t.id(), (t.status(), t.unreachable())))
                .collect();
            let mut changed = false;

            for work in self.works.iter_mut() {
                for task in work.tasks_mut() {
                    if task.status() != Status::Initialized || task.unreachable().is_some() {
                        continue;
                    }

                    let mut all_satisfied = true;
                    let mut failed_producer = None;
                    for dep in task.deps() {
                        let (status, unreachable) = snapshot
                            .get(&dep.node)
                            .copied()
                            .ok_or(FlowError::TaskNotFound(dep.node))?;
                        if status == Status::Error {
                            failed_producer = Some(dep.node);
                            break;
                        }
                        if let Some(root) = unreachable {
                            failed_producer = Some(root);
                            break;
                        }
                        if !status.satisfies(dep.status) {
                            all_satisfied = false;
                        }
                    }

                    if let Some(producer) = failed_producer {
                        task.mark_unreachable(producer);
                        changed = true;
                    } else if all_satisfied {
                        task.set_status(Status::Ready)?;
                        newly_ready.push(task.id());
                        changed = true;
                    }
                }
            }

            if !changed {
                break;
            }
        }

        if !newly_ready.is_empty() {
            debug!(?newly_ready, "tasks became ready");
        }
        Ok(newly_ready)
    }

    /// Producer artifacts to link into `id`'s input.
    pub fn resolve_artifacts(&self, id: NodeId) -> Result<Vec<ArtifactLink>> {
        let task = self.task(id)?;
        let mut links = Vec::new();
        for dep in task.deps() {
            if let Some(kind) = dep.artifact {
                links.push(ArtifactLink {
                    kind,
                    source: self.task(dep.node)?.output_artifact(kind)?,
                });
            }
        }
        Ok(links)
    }

    /// Cancel every submitted or running job. Returns how many were
    /// cancelled.
    pub async fn cancel_all(&mut self, backends: &Backends) -> Result<usize> {
        let active: Vec<NodeId> = self
            .tasks()
            .filter(|t| matches!(t.status(), Status::Submitted | Status::Running))
            .map(|t| t.id())
            .collect();

        let mut cancelled = 0;
        for id in active {
            let task = self.task_mut(id)?;
            let adapter = backends.get(task.manager().kind())?;
            match task.cancel(adapter.as_ref()).await {
                Ok(()) => cancelled += 1,
                Err(e) => warn!(task = %id, error = %e, "cancel failed"),
            }
        }
        Ok(cancelled)
    }
}
