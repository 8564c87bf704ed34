// src/engine/launcher.rs

use std::fs;
use std::path::Path;

use tracing::info;

use crate::config::{SchedulerConfig, TaskManager};
use crate::errors::{FlowError, Result};
use crate::flow::Flow;
use crate::qadapters::{Backends, JobId, JobRequest};
use crate::types::ResourceRequest;

use super::core::{self as cycle, CycleLimits};
use super::scheduler::{CycleReport, PollPolicy, poll_tasks, submit_tasks};

/// Runs one launch cycle: readiness, submission, one round of polling,
/// persistence. No retries, no loop.
#[derive(Debug)]
pub struct Launcher<'a> {
    flow: &'a mut Flow,
    backends: &'a Backends,
    limits: CycleLimits,
    poll_policy: PollPolicy,
}

impl<'a> Launcher<'a> {
    pub fn new(flow: &'a mut Flow, backends: &'a Backends, config: &SchedulerConfig) -> Result<Self> {
        if !flow.is_allocated() {
            return Err(FlowError::NotAllocated);
        }
        Ok(Self {
            flow,
            backends,
            limits: CycleLimits::try_from(config)?,
            poll_policy: PollPolicy {
                retries: config.poll_retries,
                backoff: config.poll_backoff()?,
            },
        })
    }

    pub async fn single_shot(&mut self) -> Result<CycleReport> {
        let mut report = CycleReport {
            cycle: 1,
            ..CycleReport::default()
        };
        report.newly_ready = self.flow.refresh_readiness()?.len();

        let to_submit = cycle::select_submissions(self.flow, &self.limits);
        report.submitted = submit_tasks(self.flow, self.backends, &to_submit).await;

        let (finished, poll_failures) = poll_tasks(self.flow, self.backends, self.poll_policy).await;
        report.finished = finished;
        report.poll_failures = poll_failures;

        self.flow.pickle_dump()?;
        info!(
            submitted = report.submitted,
            finished = report.finished,
            "single-shot launch done"
        );
        Ok(report)
    }
}

pub const BATCH_SCRIPT: &str = "sched.sh";

/// Submit the scheduler itself as a job through the manager's adapter.
///
/// `argv` is the command the job runs (usually this binary with
/// `--scheduler`); its output lands in `sched.log` / `sched.err`.
pub async fn submit_batch_scheduler(
    workdir: &Path,
    manager: &TaskManager,
    backends: &Backends,
    argv: Vec<String>,
) -> Result<JobId> {
    fs::create_dir_all(workdir)?;

    let resources = ResourceRequest::default();
    let queue = manager.select_qadapter(&resources)?.clone();
    let adapter = backends.get(queue.kind())?;

    let mut argv = argv.into_iter();
    let executable = argv.next().unwrap_or_else(|| "flowtk".to_string());

    // The scheduler is a single serial process.
    let mut queue = queue;
    queue.job.mpi_runner = None;

    let request = JobRequest {
        name: "flowtk_scheduler".to_string(),
        workdir: workdir.to_path_buf(),
        executable,
        args: argv.collect(),
        stdin: None,
        stdout: workdir.join("sched.log"),
        stderr: workdir.join("sched.err"),
        qout: workdir.join("sched.qout"),
        qerr: workdir.join("sched.qerr"),
        exitcode: workdir.join("sched.exitcode"),
        resources,
        queue,
    };

    let script = adapter.generate_submission_script(&request)?;
    let script_path = workdir.join(BATCH_SCRIPT);
    fs::write(&script_path, script)?;

    let job_id = adapter.submit(&script_path, &request).await?;
    info!(job_id = %job_id, queue = %adapter.kind(), "scheduler submitted as batch job");
    Ok(job_id)
}
