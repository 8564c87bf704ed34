// src/engine/core.rs

//! Synchronous decisions of a scheduler cycle.
//!
//! Given the in-memory flow, these functions decide which tasks to submit
//! and whether the loop should stop. They never spawn processes or talk to
//! a queue, so they are unit tested directly on hand-built flows.

use std::time::Duration;

use crate::config::SchedulerConfig;
use crate::errors::Result;
use crate::flow::Flow;
use crate::status::Status;
use crate::types::NodeId;

use super::StopReason;

/// Limits of the loop, parsed from [`SchedulerConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleLimits {
    pub max_njobs_inqueue: usize,
    pub max_nlaunches: usize,
    pub max_num_errors: usize,
    pub max_cycles: Option<u64>,
    pub timelimit: Option<Duration>,
}

impl Default for CycleLimits {
    fn default() -> Self {
        Self {
            max_njobs_inqueue: 200,
            max_nlaunches: 10,
            max_num_errors: 10,
            max_cycles: None,
            timelimit: None,
        }
    }
}

impl TryFrom<&SchedulerConfig> for CycleLimits {
    type Error = crate::errors::FlowError;

    fn try_from(cfg: &SchedulerConfig) -> Result<Self> {
        Ok(Self {
            max_njobs_inqueue: cfg.max_njobs_inqueue,
            max_nlaunches: cfg.max_nlaunches,
            max_num_errors: cfg.max_num_errors,
            max_cycles: cfg.max_cycles,
            timelimit: cfg.timelimit()?,
        })
    }
}

/// Jobs currently owned by the queue.
pub fn num_in_queue(flow: &Flow) -> usize {
    flow.tasks().filter(|t| t.status().is_active()).count()
}

/// `Ready` tasks to submit now, in work-registration order.
pub fn select_submissions(flow: &Flow, limits: &CycleLimits) -> Vec<NodeId> {
    let room = limits
        .max_njobs_inqueue
        .saturating_sub(num_in_queue(flow))
        .min(limits.max_nlaunches);

    flow.tasks()
        .filter(|t| t.status() == Status::Ready)
        .map(|t| t.id())
        .take(room)
        .collect()
}

/// Tasks whose job must be polled, or classified when already `Done`.
pub fn jobs_to_poll(flow: &Flow) -> Vec<NodeId> {
    flow.tasks()
        .filter(|t| matches!(t.status(), Status::Submitted | Status::Running | Status::Done))
        .filter(|t| t.job_id().is_some())
        .map(|t| t.id())
        .collect()
}

/// Tasks waiting for the retry policy.
pub fn critical_tasks(flow: &Flow) -> Vec<NodeId> {
    flow.tasks()
        .filter(|t| t.status().is_critical())
        .map(|t| t.id())
        .collect()
}

/// Nothing is queued, nothing can be submitted and nothing waits for a
/// decision. Call after readiness has been refreshed.
pub fn is_deadlocked(flow: &Flow) -> bool {
    !flow.all_ok()
        && !flow.tasks().any(|t| {
            let st = t.status();
            st.is_active() || st.is_critical() || matches!(st, Status::Ready | Status::Done)
        })
}

/// Decide whether the loop ends after cycle number `cycle`.
pub fn evaluate_stop(
    flow: &Flow,
    limits: &CycleLimits,
    cycle: u64,
    elapsed: Duration,
    stop_requested: bool,
) -> Option<StopReason> {
    if flow.all_ok() {
        return Some(StopReason::AllOk);
    }
    let errors = flow.num_errors();
    if errors > limits.max_num_errors {
        return Some(StopReason::TooManyErrors(errors));
    }
    if stop_requested {
        return Some(StopReason::StopRequested);
    }
    if is_deadlocked(flow) {
        return Some(StopReason::Deadlock);
    }
    if let Some(max) = limits.max_cycles {
        if cycle >= max {
            return Some(StopReason::MaxCycles(max));
        }
    }
    if let Some(limit) = limits.timelimit {
        if elapsed >= limit {
            return Some(StopReason::Timelimit);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TaskManager;
    use crate::flow::Dependency;
    use crate::input::InputPayload;

    fn independent(n: usize) -> Flow {
        let mut flow = Flow::new("/tmp/flowtk-core", TaskManager::default());
        let w = flow.register_work("w");
        for i in 0..n {
            flow.register_task(w, format!("t{i}"), InputPayload::new("true"), vec![])
                .unwrap();
        }
        flow
    }

    fn drive(flow: &mut Flow, id: NodeId, path: &[Status]) {
        let t = flow.task_mut(id).unwrap();
        for st in path {
            t.set_status(*st).unwrap();
        }
    }

    #[test]
    fn submissions_respect_both_limits() {
        let mut flow = independent(6);
        flow.refresh_readiness().unwrap();
        drive(&mut flow, NodeId::new(0, 0), &[Status::Locked, Status::Submitted]);

        let limits = CycleLimits {
            max_njobs_inqueue: 4,
            max_nlaunches: 2,
            ..CycleLimits::default()
        };
        assert_eq!(
            select_submissions(&flow, &limits),
            vec![NodeId::new(0, 1), NodeId::new(0, 2)]
        );

        let tight = CycleLimits {
            max_njobs_inqueue: 2,
            max_nlaunches: 10,
            ..CycleLimits::default()
        };
        assert_eq!(select_submissions(&flow, &tight), vec![NodeId::new(0, 1)]);
    }

    #[test]
    fn stop_conditions() {
        let limits = CycleLimits {
            max_num_errors: 0,
            max_cycles: Some(3),
            ..CycleLimits::default()
        };
        let mut flow = independent(2);
        flow.refresh_readiness().unwrap();
        let zero = Duration::ZERO;

        assert_eq!(evaluate_stop(&flow, &limits, 1, zero, false), None);
        assert_eq!(
            evaluate_stop(&flow, &limits, 1, zero, true),
            Some(StopReason::StopRequested)
        );
        assert_eq!(
            evaluate_stop(&flow, &limits, 3, zero, false),
            Some(StopReason::MaxCycles(3))
        );

        drive(&mut flow, NodeId::new(0, 0), &[Status::Locked, Status::Error]);
        assert_eq!(
            evaluate_stop(&flow, &limits, 1, zero, false),
            Some(StopReason::TooManyErrors(1))
        );
    }

    #[test]
    fn failed_producer_deadlocks_the_flow() {
        let mut flow = Flow::new("/tmp/flowtk-core", TaskManager::default());
        let w = flow.register_work("w");
        let a = flow.register_task(w, "a", InputPayload::new("true"), vec![]).unwrap();
        flow.register_task(w, "b", InputPayload::new("true"), vec![Dependency::new(a)])
            .unwrap();
        flow.refresh_readiness().unwrap();
        assert!(!is_deadlocked(&flow));

        drive(&mut flow, a, &[Status::Locked, Status::Error]);
        flow.refresh_readiness().unwrap();
        assert!(is_deadlocked(&flow));

        let limits = CycleLimits::default();
        assert_eq!(
            evaluate_stop(&flow, &limits, 1, Duration::ZERO, false),
            Some(StopReason::Deadlock)
        );
    }
}
