// src/config/validate.rs

use std::collections::{HashMap, HashSet};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::manager::TaskManager;
use crate::config::model::{FlowFile, RawFlowFile};
use crate::errors::{FlowError, Result};

impl TryFrom<RawFlowFile> for FlowFile {
    type Error = FlowError;

    fn try_from(raw: RawFlowFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_flow(&raw)?;
        Ok(FlowFile::new_unchecked(raw.flow, raw.work))
    }
}

fn validate_raw_flow(cfg: &RawFlowFile) -> Result<()> {
    ensure_has_tasks(cfg)?;
    validate_names(cfg)?;
    validate_task_dependencies(cfg)?;
    validate_dag(cfg)?;
    Ok(())
}

fn ensure_has_tasks(cfg: &RawFlowFile) -> Result<()> {
    if cfg.work.iter().all(|w| w.task.is_empty()) {
        return Err(FlowError::ConfigError(
            "flow must contain at least one [[work.task]] entry".to_string(),
        ));
    }
    Ok(())
}

fn validate_names(cfg: &RawFlowFile) -> Result<()> {
    let mut works = HashSet::new();
    for work in cfg.work.iter() {
        if work.name.is_empty() || work.name.contains('.') {
            return Err(FlowError::ConfigError(format!(
                "invalid work name '{}' (must be non-empty and contain no '.')",
                work.name
            )));
        }
        if !works.insert(work.name.as_str()) {
            return Err(FlowError::ConfigError(format!(
                "duplicate work name '{}'",
                work.name
            )));
        }

        let mut tasks = HashSet::new();
        for task in work.task.iter() {
            if !tasks.insert(task.name.as_str()) {
                return Err(FlowError::ConfigError(format!(
                    "duplicate task name '{}' in work '{}'",
                    task.name, work.name
                )));
            }
            if task.resources.mpi_procs == 0 || task.resources.omp_threads == 0 {
                return Err(FlowError::ConfigError(format!(
                    "task '{}.{}' must request at least one process and one thread",
                    work.name, task.name
                )));
            }
            if let Some(ref stdin) = task.stdin {
                if !task.files.contains_key(stdin) {
                    return Err(FlowError::ConfigError(format!(
                        "task '{}.{}' reads stdin from '{}' which is not in `files`",
                        work.name, task.name, stdin
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Qualified names in declaration order, mapped to their position.
fn declaration_order(cfg: &RawFlowFile) -> HashMap<String, usize> {
    cfg.work
        .iter()
        .flat_map(|w| w.task.iter().map(move |t| format!("{}.{}", w.name, t.name)))
        .enumerate()
        .map(|(i, name)| (name, i))
        .collect()
}

fn validate_task_dependencies(cfg: &RawFlowFile) -> Result<()> {
    let order = declaration_order(cfg);

    for work in cfg.work.iter() {
        for task in work.task.iter() {
            let name = format!("{}.{}", work.name, task.name);
            let pos = order[&name];

            for dep in task.deps.iter() {
                if dep.task == name {
                    return Err(FlowError::ConfigError(format!(
                        "task '{}' cannot depend on itself in `deps`",
                        name
                    )));
                }
                match order.get(&dep.task) {
                    None => {
                        return Err(FlowError::ConfigError(format!(
                            "task '{}' has unknown dependency '{}' in `deps`",
                            name, dep.task
                        )));
                    }
                    Some(&dep_pos) if dep_pos > pos => {
                        return Err(FlowError::ConfigError(format!(
                            "task '{}' has forward dependency '{}'; producers must be declared first",
                            name, dep.task
                        )));
                    }
                    Some(_) => {}
                }
            }
        }
    }
    Ok(())
}

fn validate_dag(cfg: &RawFlowFile) -> Result<()> {
    // Edge direction: producer -> consumer.
    let names: Vec<String> = cfg
        .work
        .iter()
        .flat_map(|w| w.task.iter().map(move |t| format!("{}.{}", w.name, t.name)))
        .collect();

    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for name in names.iter() {
        graph.add_node(name.as_str());
    }

    let mut idx = 0;
    for work in cfg.work.iter() {
        for task in work.task.iter() {
            let consumer = names[idx].as_str();
            for dep in task.deps.iter() {
                if let Some(producer) = names.iter().find(|n| **n == dep.task) {
                    graph.add_edge(producer.as_str(), consumer, ());
                }
            }
            idx += 1;
        }
    }

    // A topological sort will fail if there is a cycle.
    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => {
            let node = cycle.node_id();
            Err(FlowError::DagCycle(format!(
                "cycle detected in task DAG involving task '{}'",
                node
            )))
        }
    }
}

/// Sanity checks on a manager file.
pub fn validate_manager(manager: &TaskManager) -> Result<()> {
    if manager.qadapters.is_empty() {
        return Err(FlowError::ConfigError(
            "manager must define at least one entry in `qadapters`".to_string(),
        ));
    }

    for (i, q) in manager.qadapters.iter().enumerate() {
        if q.limits.min_cores > q.limits.max_cores {
            return Err(FlowError::ConfigError(format!(
                "qadapters[{}]: min_cores ({}) > max_cores ({})",
                i, q.limits.min_cores, q.limits.max_cores
            )));
        }
        let soft = q.limits.timelimit()?;
        let hard = q.limits.timelimit_hard()?;
        if let (Some(soft), Some(hard)) = (soft, hard) {
            if soft > hard {
                return Err(FlowError::ConfigError(format!(
                    "qadapters[{}]: timelimit exceeds timelimit_hard",
                    i
                )));
            }
        }
    }

    Ok(())
}
