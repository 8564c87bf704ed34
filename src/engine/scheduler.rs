// src/engine/scheduler.rs

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::errors::{FlowError, QueueError, Result};
use crate::flow::Flow;
use crate::qadapters::{Backends, JobState, QueueAdapter};
use crate::status::Status;
use crate::types::NodeId;

use super::core::{self as cycle, CycleLimits};
use super::retry::{Corrector, DefaultCorrector, RetryDecision, apply_retry_policy};
use super::summary::{TAIL_LINES, cycle_line, failure_report};
use super::{SchedulerEvent, StopReason};

/// Counters of one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub cycle: u64,
    pub newly_ready: usize,
    pub submitted: usize,
    pub finished: usize,
    pub retried: usize,
    pub gave_up: usize,
    /// Polls that kept failing with transient errors this cycle.
    pub poll_failures: usize,
}

/// How polls are retried.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub retries: u32,
    pub backoff: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

/// Poll a job, retrying transient errors with exponential backoff.
///
/// `Ok(None)` means the queue could not be reached this time; the task
/// keeps its status.
pub async fn poll_with_backoff(
    adapter: &dyn QueueAdapter,
    job_id: &crate::qadapters::JobId,
    policy: PollPolicy,
) -> Option<JobState> {
    let mut delay = policy.backoff;
    let attempts = policy.retries.max(1);
    for attempt in 1..=attempts {
        match adapter.poll(job_id).await {
            Ok(state) => return Some(state),
            Err(QueueError::TransientQuery(msg)) => {
                debug!(job_id = %job_id, attempt, error = %msg, "transient poll error");
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "poll failed");
                return None;
            }
        }
        if attempt < attempts {
            tokio::time::sleep(delay).await;
            delay *= 2;
        }
    }
    warn!(job_id = %job_id, attempts, "queue unreachable; will poll again next cycle");
    None
}

/// Submit the given `Ready` tasks. Returns how many reached the queue.
pub(crate) async fn submit_tasks(flow: &mut Flow, backends: &Backends, ids: &[NodeId]) -> usize {
    let builder = flow.input_builder();
    let mut submitted = 0;

    for &id in ids {
        let result = async {
            let artifacts = flow.resolve_artifacts(id)?;
            let task = flow.task_mut(id)?;
            let adapter = backends.get(task.manager().kind())?;
            task.start(adapter.as_ref(), builder.as_ref(), &artifacts).await?;
            Ok::<bool, crate::errors::FlowError>(task.job_id().is_some() && task.status().is_active())
        }
        .await;

        match result {
            Ok(true) => submitted += 1,
            Ok(false) => {}
            Err(e) => error!(task = %id, error = %e, "submission step failed"),
        }
    }
    submitted
}

/// Poll every queued job and classify the ones that finished (including
/// `Done` tasks not classified yet). Returns
/// `(finished, poll_failures)`.
pub(crate) async fn poll_tasks(
    flow: &mut Flow,
    backends: &Backends,
    policy: PollPolicy,
) -> (usize, usize) {
    let mut finished = 0;
    let mut failures = 0;

    for id in cycle::jobs_to_poll(flow) {
        let result = async {
            let task = flow.task_mut(id)?;
            let adapter = backends.get(task.manager().kind())?;
            let Some(job_id) = task.job_id().cloned() else {
                return Ok(None);
            };
            // A `Done` task left unclassified by an earlier cycle skips the poll.
            if task.status() != Status::Done {
                let Some(state) = poll_with_backoff(adapter.as_ref(), &job_id, policy).await else {
                    return Ok(None);
                };
                if !task.apply_job_state(state)? {
                    return Ok(Some(false));
                }
            }
            let status = task.finalize(adapter.as_ref())?;
            info!(task = %id, job_id = %job_id, %status, "job finished");
            Ok::<Option<bool>, crate::errors::FlowError>(Some(true))
        }
        .await;

        match result {
            Ok(Some(true)) => finished += 1,
            Ok(Some(false)) => {}
            Ok(None) => failures += 1,
            Err(e) => error!(task = %id, error = %e, "poll step failed"),
        }
    }
    (finished, failures)
}

/// Drives a flow to completion.
///
/// Each cycle refreshes readiness, submits, polls, applies the retry
/// policy and persists the flow. Between cycles it waits for either the
/// poll interval or a [`SchedulerEvent`].
pub struct FlowScheduler {
    flow: Flow,
    backends: Backends,
    corrector: Arc<dyn Corrector>,
    limits: CycleLimits,
    poll_interval: Duration,
    poll_policy: PollPolicy,
    event_tx: mpsc::Sender<SchedulerEvent>,
    event_rx: mpsc::Receiver<SchedulerEvent>,
    cycle: u64,
}

impl fmt::Debug for FlowScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowScheduler")
            .field("flow", &self.flow.name())
            .field("limits", &self.limits)
            .field("poll_interval", &self.poll_interval)
            .field("cycle", &self.cycle)
            .finish_non_exhaustive()
    }
}

impl FlowScheduler {
    pub fn new(flow: Flow, backends: Backends, config: &SchedulerConfig) -> Result<Self> {
        if !flow.is_allocated() {
            return Err(FlowError::NotAllocated);
        }
        let (event_tx, event_rx) = mpsc::channel(8);
        Ok(Self {
            flow,
            backends,
            corrector: Arc::new(DefaultCorrector),
            limits: CycleLimits::try_from(config)?,
            poll_interval: config.poll_interval()?,
            poll_policy: PollPolicy {
                retries: config.poll_retries,
                backoff: config.poll_backoff()?,
            },
            event_tx,
            event_rx,
            cycle: 0,
        })
    }

    pub fn with_corrector(mut self, corrector: Arc<dyn Corrector>) -> Self {
        self.corrector = corrector;
        self
    }

    /// Sender used to stop the loop from outside (Ctrl-C, tests).
    pub fn event_sender(&self) -> mpsc::Sender<SchedulerEvent> {
        self.event_tx.clone()
    }

    pub fn flow(&self) -> &Flow {
        &self.flow
    }

    pub fn into_flow(self) -> Flow {
        self.flow
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// One full cycle.
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        self.cycle += 1;
        let mut report = CycleReport {
            cycle: self.cycle,
            ..CycleReport::default()
        };

        report.newly_ready = self.flow.refresh_readiness()?.len();

        let to_submit = cycle::select_submissions(&self.flow, &self.limits);
        report.submitted = submit_tasks(&mut self.flow, &self.backends, &to_submit).await;

        let (finished, poll_failures) =
            poll_tasks(&mut self.flow, &self.backends, self.poll_policy).await;
        report.finished = finished;
        report.poll_failures = poll_failures;

        let max_retries = self.flow.max_retries();
        for id in cycle::critical_tasks(&self.flow) {
            let task = self.flow.task_mut(id)?;
            match apply_retry_policy(task, max_retries, self.corrector.as_ref()) {
                Ok(RetryDecision::Retried) => report.retried += 1,
                Ok(RetryDecision::GaveUp) => report.gave_up += 1,
                Err(e) => error!(task = %id, error = %e, "retry step failed"),
            }
        }

        // Propagate new failures and readies before the stop check.
        report.newly_ready += self.flow.refresh_readiness()?.len();

        self.flow.pickle_dump()?;
        info!("{}", cycle_line(self.cycle, &self.flow));
        debug!(?report, "cycle finished");
        Ok(report)
    }

    fn stop_pending(&mut self) -> bool {
        let mut stop = false;
        while let Ok(event) = self.event_rx.try_recv() {
            match event {
                SchedulerEvent::StopRequested => stop = true,
            }
        }
        stop
    }

    /// Main loop.
    pub async fn run(&mut self) -> Result<StopReason> {
        info!(
            flow = %self.flow.name(),
            tasks = self.flow.num_tasks(),
            poll_interval = ?self.poll_interval,
            "scheduler started"
        );
        let started = Instant::now();
        let mut stop_requested = false;

        let reason = loop {
            self.run_cycle().await?;
            stop_requested |= self.stop_pending();

            if let Some(reason) = cycle::evaluate_stop(
                &self.flow,
                &self.limits,
                self.cycle,
                started.elapsed(),
                stop_requested,
            ) {
                break reason;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                event = self.event_rx.recv() => {
                    if let Some(SchedulerEvent::StopRequested) = event {
                        info!("stop requested; exiting after persisting state");
                        break StopReason::StopRequested;
                    }
                }
            }
        };

        self.flow.pickle_dump()?;
        if reason.is_success() {
            info!(cycles = self.cycle, "{reason}");
        } else {
            warn!(cycles = self.cycle, "scheduler stopped: {reason}");
            let report = failure_report(&self.flow, TAIL_LINES);
            if !report.is_empty() {
                warn!("failed tasks:\n{report}");
            }
        }
        Ok(reason)
    }
}
