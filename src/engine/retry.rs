// src/engine/retry.rs

//! Retry policy for tasks in a critical status.

use std::fmt;

use tracing::{info, warn};

use crate::errors::{Failure, QueueFailure, Result};
use crate::flow::Task;
use crate::input::InputPayload;
use crate::types::ResourceRequest;

/// What to do with a failed task.
#[derive(Debug, Clone, PartialEq)]
pub enum Correction {
    /// Run again, optionally with new resources or a new input.
    Retry {
        resources: Option<ResourceRequest>,
        input: Option<InputPayload>,
    },
    GiveUp(String),
}

impl Correction {
    pub fn unchanged() -> Self {
        Correction::Retry {
            resources: None,
            input: None,
        }
    }
}

/// Inspects a failure and proposes a fix.
pub trait Corrector: fmt::Debug + Send + Sync {
    fn correct(&self, task: &Task, failure: &Failure) -> Correction;
}

/// Raises the time limit (up to `timelimit_hard`) after a timeout and the
/// memory (up to `max_mem_per_proc_mb`) after an out-of-memory kill. Other
/// failures are retried unchanged.
#[derive(Debug, Default, Clone)]
pub struct DefaultCorrector;

const TIME_FACTOR: f64 = 2.0;
const MEMORY_FACTOR: f64 = 1.5;

impl DefaultCorrector {
    fn more_time(task: &Task) -> Correction {
        let limits = &task.manager().limits;
        let current = task
            .resources()
            .timelimit_secs
            .or_else(|| limits.timelimit().ok().flatten().map(|d| d.as_secs()));
        let Some(current) = current else {
            return Correction::unchanged();
        };

        let mut wanted = (current as f64 * TIME_FACTOR).ceil() as u64;
        if let Some(hard) = limits.timelimit_hard().ok().flatten().map(|d| d.as_secs()) {
            if current >= hard {
                return Correction::GiveUp(format!("timelimit already at hard limit ({hard}s)"));
            }
            wanted = wanted.min(hard);
        }

        Correction::Retry {
            resources: Some(ResourceRequest {
                timelimit_secs: Some(wanted),
                ..task.resources().clone()
            }),
            input: None,
        }
    }

    fn more_memory(task: &Task) -> Correction {
        let Some(current) = task.resources().mem_per_proc_mb else {
            return Correction::unchanged();
        };

        let mut wanted = (current as f64 * MEMORY_FACTOR).ceil() as u64;
        if let Some(max) = task.manager().limits.max_mem_per_proc_mb {
            if current >= max {
                return Correction::GiveUp(format!("memory already at queue limit ({max} MB)"));
            }
            wanted = wanted.min(max);
        }

        Correction::Retry {
            resources: Some(ResourceRequest {
                mem_per_proc_mb: Some(wanted),
                ..task.resources().clone()
            }),
            input: None,
        }
    }
}

impl Corrector for DefaultCorrector {
    fn correct(&self, task: &Task, failure: &Failure) -> Correction {
        match failure {
            Failure::QueueCritical(QueueFailure::Timelimit) => Self::more_time(task),
            Failure::QueueCritical(QueueFailure::Memory) => Self::more_memory(task),
            _ => Correction::unchanged(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retried,
    /// Retries exhausted or the corrector gave up.
    GaveUp,
}

/// Reset a critical task to `Ready` or move it to `Error`.
///
/// A task is run at most `1 + max_retries` times.
pub fn apply_retry_policy(
    task: &mut Task,
    max_retries: u32,
    corrector: &dyn Corrector,
) -> Result<RetryDecision> {
    if task.num_restarts() >= max_retries {
        warn!(
            task = %task.id(),
            restarts = task.num_restarts(),
            "retries exhausted"
        );
        task.give_up()?;
        return Ok(RetryDecision::GaveUp);
    }

    let failure = task
        .failure()
        .cloned()
        .unwrap_or_else(|| Failure::SolverCritical(format!("status {}", task.status())));

    match corrector.correct(task, &failure) {
        Correction::Retry { resources, input } => {
            if let Some(ref res) = resources {
                info!(
                    task = %task.id(),
                    timelimit_secs = ?res.timelimit_secs,
                    mem_per_proc_mb = ?res.mem_per_proc_mb,
                    "corrector adjusted resources"
                );
            }
            task.reset_for_retry(resources, input)?;
            Ok(RetryDecision::Retried)
        }
        Correction::GiveUp(why) => {
            warn!(task = %task.id(), reason = %why, "corrector gave up");
            task.give_up()?;
            Ok(RetryDecision::GaveUp)
        }
    }
}
