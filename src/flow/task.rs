// src/flow/task.rs

//! A single external job and everything it leaves on disk.
//!
//! Directory layout (created by [`Task::build_dirs`]):
//!
//! ```text
//! w0/t1/
//!   indata/  outdata/  tmpdata/
//!   job.sh  run.log  run.err  queue.qout  queue.qerr  job.exitcode  .status
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::errors::{Failure, FlowError, QueueError, QueueFailure, Result};
use crate::events::EventReport;
use crate::input::{ArtifactLink, InputBuilder, InputPayload};
use crate::qadapters::{JobId, JobRequest, JobState, QueueAdapter};
use crate::status::Status;
use crate::types::{ArtifactKind, NodeId, ResourceRequest};

pub const INDATA: &str = "indata";
pub const OUTDATA: &str = "outdata";
pub const TMPDATA: &str = "tmpdata";
pub const SCRIPT_FILE: &str = "job.sh";
pub const LOG_FILE: &str = "run.log";
pub const STDERR_FILE: &str = "run.err";
pub const QOUT_FILE: &str = "queue.qout";
pub const QERR_FILE: &str = "queue.qerr";
pub const EXITCODE_FILE: &str = "job.exitcode";
pub const STATUS_FILE: &str = ".status";

/// Edge of the DAG, stored on the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub node: NodeId,
    #[serde(default)]
    pub artifact: Option<ArtifactKind>,
    /// Status the producer must reach.
    #[serde(default = "default_required")]
    pub status: Status,
}

fn default_required() -> Status {
    Status::Completed
}

impl Dependency {
    /// Dependency on `node` reaching `Completed`, without artifact.
    pub fn new(node: NodeId) -> Self {
        Self {
            node,
            artifact: None,
            status: default_required(),
        }
    }

    pub fn with_artifact(mut self, kind: ArtifactKind) -> Self {
        self.artifact = Some(kind);
        self
    }

    pub fn requiring(mut self, status: Status) -> Self {
        self.status = status;
        self
    }
}

/// Everything needed to register a task.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub name: String,
    pub input: InputPayload,
    pub resources: ResourceRequest,
    /// Merged over the selected adapter's `qparams`.
    pub qparams: BTreeMap<String, serde_json::Value>,
    pub deps: Vec<Dependency>,
}

impl TaskSpec {
    pub fn new(name: impl Into<String>, input: InputPayload) -> Self {
        Self {
            name: name.into(),
            input,
            resources: ResourceRequest::default(),
            qparams: BTreeMap::new(),
            deps: Vec::new(),
        }
    }

    pub fn resources(mut self, resources: ResourceRequest) -> Self {
        self.resources = resources;
        self
    }

    pub fn qparam(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.qparams.insert(key.into(), value);
        self
    }

    pub fn dep(mut self, dep: Dependency) -> Self {
        self.deps.push(dep);
        self
    }
}

/// One submission of the task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub job_id: Option<JobId>,
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub outcome: Option<Status>,
}

impl Attempt {
    pub fn wall_time(&self) -> Option<Duration> {
        let end = self.finished_at?;
        (end - self.submitted_at).to_std().ok()
    }
}

/// What a finished job left behind.
#[derive(Debug, Clone, Default)]
pub struct JobEvidence {
    pub exit_code: Option<i32>,
    pub queue_failure: Option<QueueFailure>,
    pub report: EventReport,
}

impl JobEvidence {
    /// Decide how the run ended.
    ///
    /// The queue error file wins, then a missing exit code (the script was
    /// killed before writing it), then solver errors, the exit code, and
    /// finally convergence warnings.
    pub fn classify(&self) -> std::result::Result<(), Failure> {
        if let Some(why) = self.queue_failure {
            return Err(Failure::QueueCritical(why));
        }
        let Some(code) = self.exit_code else {
            return Err(Failure::QueueCritical(QueueFailure::Killed));
        };
        if let Some(event) = self.report.critical_events().next() {
            return Err(Failure::SolverCritical(event.to_string()));
        }
        if code != 0 {
            return Err(Failure::SolverCritical(format!("exit code {code}")));
        }
        if let Some(event) = self.report.warnings().find(|e| e.is_convergence_warning()) {
            return Err(Failure::Convergence(event.to_string()));
        }
        Ok(())
    }
}

/// Summary returned by `Work::get_results`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskResults {
    pub node: NodeId,
    pub name: String,
    pub status: Status,
    pub num_restarts: u32,
    pub exit_code: Option<i32>,
    pub failure: Option<Failure>,
    pub num_warnings: usize,
    /// `out_*` files present in `outdata`.
    pub outputs: Vec<PathBuf>,
    pub wall_time_secs: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    id: NodeId,
    name: String,
    #[serde(default)]
    dir: Option<PathBuf>,
    input: InputPayload,
    #[serde(default)]
    deps: Vec<Dependency>,
    resources: ResourceRequest,
    manager: QueueConfig,
    status: Status,
    #[serde(default)]
    attempts: Vec<Attempt>,
    #[serde(default)]
    num_restarts: u32,
    #[serde(default)]
    input_built: bool,
    #[serde(default)]
    failure: Option<Failure>,
    /// Failed producer that makes this task unreachable.
    #[serde(default)]
    unreachable: Option<NodeId>,
    #[serde(skip)]
    report: Option<EventReport>,
}

impl Task {
    pub(crate) fn new(
        id: NodeId,
        name: String,
        input: InputPayload,
        resources: ResourceRequest,
        manager: QueueConfig,
        deps: Vec<Dependency>,
    ) -> Self {
        Self {
            id,
            name,
            dir: None,
            input,
            deps,
            resources,
            manager,
            status: Status::Initialized,
            attempts: Vec::new(),
            num_restarts: 0,
            input_built: false,
            failure: None,
            unreachable: None,
            report: None,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn deps(&self) -> &[Dependency] {
        &self.deps
    }

    pub(crate) fn push_dependency(&mut self, dep: Dependency) {
        self.deps.push(dep);
    }

    pub fn input(&self) -> &InputPayload {
        &self.input
    }

    pub fn resources(&self) -> &ResourceRequest {
        &self.resources
    }

    pub fn manager(&self) -> &QueueConfig {
        &self.manager
    }

    pub fn attempts(&self) -> &[Attempt] {
        &self.attempts
    }

    pub fn num_restarts(&self) -> u32 {
        self.num_restarts
    }

    pub fn failure(&self) -> Option<&Failure> {
        self.failure.as_ref()
    }

    pub fn unreachable(&self) -> Option<NodeId> {
        self.unreachable
    }

    pub(crate) fn mark_unreachable(&mut self, producer: NodeId) {
        if self.unreachable.is_none() {
            info!(task = %self.id, producer = %producer, "dependency failed; task unreachable");
            self.unreachable = Some(producer);
            self.failure = Some(Failure::DependencyUnreachable(producer));
        }
    }

    /// Job id of the latest attempt, if it reached the queue.
    pub fn job_id(&self) -> Option<&JobId> {
        self.attempts.last().and_then(|a| a.job_id.as_ref())
    }

    pub fn is_allocated(&self) -> bool {
        self.dir.is_some()
    }

    pub(crate) fn set_dir(&mut self, dir: PathBuf) {
        self.dir = Some(dir);
    }

    pub fn dir(&self) -> Result<&Path> {
        self.dir.as_deref().ok_or(FlowError::NotAllocated)
    }

    fn path(&self, name: &str) -> Result<PathBuf> {
        Ok(self.dir()?.join(name))
    }

    pub fn indir(&self) -> Result<PathBuf> {
        self.path(INDATA)
    }

    pub fn outdir(&self) -> Result<PathBuf> {
        self.path(OUTDATA)
    }

    pub fn tmpdir(&self) -> Result<PathBuf> {
        self.path(TMPDATA)
    }

    pub fn log_path(&self) -> Result<PathBuf> {
        self.path(LOG_FILE)
    }

    pub fn stderr_path(&self) -> Result<PathBuf> {
        self.path(STDERR_FILE)
    }

    pub fn qerr_path(&self) -> Result<PathBuf> {
        self.path(QERR_FILE)
    }

    pub fn exitcode_path(&self) -> Result<PathBuf> {
        self.path(EXITCODE_FILE)
    }

    pub fn status_path(&self) -> Result<PathBuf> {
        self.path(STATUS_FILE)
    }

    /// Where a producer leaves an artifact of this kind.
    pub fn output_artifact(&self, kind: ArtifactKind) -> Result<PathBuf> {
        Ok(self.outdir()?.join(kind.output_name()))
    }

    /// Create the directory tree and the status marker.
    pub fn build_dirs(&self) -> Result<()> {
        for sub in [INDATA, OUTDATA, TMPDATA] {
            fs::create_dir_all(self.path(sub)?)?;
        }
        self.write_status_marker()
    }

    fn write_status_marker(&self) -> Result<()> {
        let Some(ref dir) = self.dir else {
            return Ok(());
        };
        if dir.is_dir() {
            fs::write(dir.join(STATUS_FILE), format!("{}\n", self.status))?;
        }
        Ok(())
    }

    /// Validated status change; refreshes the `.status` marker.
    pub fn set_status(&mut self, new_status: Status) -> Result<()> {
        let old = self.status;
        self.status.try_transition(self.id, new_status)?;
        if old != new_status {
            debug!(task = %self.id, from = %old, to = %new_status, "status change");
            self.write_status_marker()?;
        }
        Ok(())
    }

    /// Critical -> `Ready`, optionally with corrected resources or input.
    pub fn reset_for_retry(
        &mut self,
        resources: Option<ResourceRequest>,
        input: Option<InputPayload>,
    ) -> Result<()> {
        self.set_status(Status::Ready)?;
        self.num_restarts += 1;
        if let Some(res) = resources {
            self.resources = res;
        }
        if let Some(input) = input {
            self.input = input;
        }
        self.input_built = false;
        self.failure = None;
        self.report = None;

        // Stale evidence would be read back as the next attempt's outcome.
        if self.dir.is_some() {
            for name in [EXITCODE_FILE, QERR_FILE, LOG_FILE] {
                match fs::remove_file(self.path(name)?) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        info!(task = %self.id, restarts = self.num_restarts, "task reset for retry");
        Ok(())
    }

    /// A crash while `Locked` leaves no job behind.
    pub(crate) fn recover_after_restart(&mut self) -> Result<()> {
        if self.status == Status::Locked {
            warn!(task = %self.id, "found task locked by a previous run; back to ready");
            self.set_status(Status::Ready)?;
        }
        Ok(())
    }

    /// Parse `run.log` on first request and keep the result.
    pub fn get_event_report(&mut self) -> Result<Option<&EventReport>> {
        if self.report.is_none() {
            let path = self.log_path()?;
            if !path.is_file() {
                return Ok(None);
            }
            self.report = Some(EventReport::from_file(&path)?);
        }
        Ok(self.report.as_ref())
    }

    /// Cached report without touching the disk.
    pub fn cached_report(&self) -> Option<&EventReport> {
        self.report.as_ref()
    }

    /// Last `n` lines of `run.log` (falling back to `run.err`).
    pub fn last_log_lines(&self, n: usize) -> Vec<String> {
        let read = |p: Result<PathBuf>| {
            p.ok()
                .and_then(|p| fs::read(p).ok())
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        };
        let text = read(self.log_path())
            .filter(|t| !t.trim().is_empty())
            .or_else(|| read(self.stderr_path()))
            .unwrap_or_default();
        let lines: Vec<&str> = text.lines().collect();
        let start = lines.len().saturating_sub(n);
        lines[start..].iter().map(|l| l.to_string()).collect()
    }

    /// Request handed to the queue adapter.
    pub fn job_request(&self) -> Result<JobRequest> {
        let dir = self.dir()?.to_path_buf();
        Ok(JobRequest {
            name: self.id.to_string(),
            executable: self.input.executable.clone(),
            args: self.input.args.clone(),
            stdin: self.input.stdin.as_ref().map(|s| dir.join(s)),
            stdout: dir.join(LOG_FILE),
            stderr: dir.join(STDERR_FILE),
            qout: dir.join(QOUT_FILE),
            qerr: dir.join(QERR_FILE),
            exitcode: dir.join(EXITCODE_FILE),
            resources: self.resources.clone(),
            queue: self.manager.clone(),
            workdir: dir,
        })
    }

    /// Build the input if needed, write the script and submit it.
    ///
    /// Expected failures are recorded on the task: a rejected submission
    /// moves it to `Error`, a transient one back to `Ready`.
    pub async fn start(
        &mut self,
        adapter: &dyn QueueAdapter,
        builder: &dyn InputBuilder,
        artifacts: &[ArtifactLink],
    ) -> Result<()> {
        self.set_status(Status::Locked)?;

        let prepared = self.prepare_submission(adapter, builder, artifacts);
        let (script, request) = match prepared {
            Ok(v) => v,
            Err(e) => {
                warn!(task = %self.id, error = %e, "could not prepare job");
                self.fail_submission(e.to_string())?;
                return Ok(());
            }
        };

        let submitted_at = Utc::now();
        match adapter.submit(&script, &request).await {
            Ok(job_id) => {
                info!(task = %self.id, job_id = %job_id, queue = %adapter.kind(), "submitted");
                self.attempts.push(Attempt {
                    job_id: Some(job_id),
                    submitted_at,
                    finished_at: None,
                    exit_code: None,
                    outcome: None,
                });
                self.set_status(Status::Submitted)
            }
            Err(QueueError::TransientQuery(msg)) => {
                warn!(task = %self.id, error = %msg, "transient submission error; will retry");
                self.set_status(Status::Ready)
            }
            Err(QueueError::Submission(msg)) => {
                warn!(task = %self.id, error = %msg, "submission rejected");
                self.attempts.push(Attempt {
                    job_id: None,
                    submitted_at,
                    finished_at: Some(Utc::now()),
                    exit_code: None,
                    outcome: Some(Status::Error),
                });
                self.fail_submission(msg)
            }
        }
    }

    fn prepare_submission(
        &mut self,
        adapter: &dyn QueueAdapter,
        builder: &dyn InputBuilder,
        artifacts: &[ArtifactLink],
    ) -> Result<(PathBuf, JobRequest)> {
        let dir = self.dir()?.to_path_buf();
        if !self.input_built {
            self.build_dirs()?;
            builder.materialize(&self.input, &dir, artifacts)?;
            self.input_built = true;
        }
        let request = self.job_request()?;
        let script = adapter.generate_submission_script(&request)?;
        let script_path = dir.join(SCRIPT_FILE);
        fs::write(&script_path, script)?;
        Ok((script_path, request))
    }

    fn fail_submission(&mut self, msg: String) -> Result<()> {
        self.failure = Some(Failure::Submission(msg));
        self.set_status(Status::Error)
    }

    /// Apply a poll answer. Returns `true` once the job left the queue.
    pub fn apply_job_state(&mut self, state: JobState) -> Result<bool> {
        match state {
            JobState::Queued | JobState::Unknown => Ok(false),
            JobState::Running => {
                if self.status == Status::Submitted {
                    self.set_status(Status::Running)?;
                }
                Ok(false)
            }
            JobState::Done => {
                self.set_status(Status::Done)?;
                Ok(true)
            }
        }
    }

    /// Read exit code, queue error file and event report of a finished job.
    pub fn collect_evidence(&mut self, adapter: &dyn QueueAdapter) -> Result<JobEvidence> {
        let exit_code = match fs::read_to_string(self.exitcode_path()?) {
            Ok(text) => text.trim().parse::<i32>().ok(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        let qerr = fs::read(self.qerr_path()?)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default();
        let queue_failure = adapter.classify_queue_errors(&qerr);
        let report = self.get_event_report()?.cloned().unwrap_or_default();

        Ok(JobEvidence {
            exit_code,
            queue_failure,
            report,
        })
    }

    /// Read the evidence of a `Done` job and record the outcome.
    ///
    /// Evidence that cannot be read counts as a solver failure, so the task
    /// never stays in `Done`.
    pub fn finalize(&mut self, adapter: &dyn QueueAdapter) -> Result<Status> {
        let (evidence, outcome) = match self.collect_evidence(adapter) {
            Ok(evidence) => {
                let outcome = evidence.classify();
                (evidence, outcome)
            }
            Err(e) => {
                warn!(task = %self.id, error = %e, "could not read job evidence");
                let failure = Failure::SolverCritical(format!("unreadable job evidence: {e}"));
                (JobEvidence::default(), Err(failure))
            }
        };
        self.record_outcome(&evidence, outcome)
    }

    /// `Done` -> `Completed` or the matching critical status.
    pub fn record_outcome(
        &mut self,
        evidence: &JobEvidence,
        outcome: std::result::Result<(), Failure>,
    ) -> Result<Status> {
        let new_status = match outcome {
            Ok(()) => {
                self.failure = None;
                Status::Completed
            }
            Err(failure) => {
                let st = failure.status();
                warn!(task = %self.id, %failure, "task failed");
                self.failure = Some(failure);
                st
            }
        };

        if let Some(attempt) = self.attempts.last_mut() {
            attempt.finished_at = Some(Utc::now());
            attempt.exit_code = evidence.exit_code;
            attempt.outcome = Some(new_status);
        }
        self.set_status(new_status)?;
        Ok(new_status)
    }

    /// Retries exhausted or corrector gave up.
    pub fn give_up(&mut self) -> Result<()> {
        self.set_status(Status::Error)
    }

    /// Cancel the current job and mark the task as failed.
    pub async fn cancel(&mut self, adapter: &dyn QueueAdapter) -> Result<()> {
        if !matches!(self.status, Status::Submitted | Status::Running) {
            return Ok(());
        }
        if let Some(job_id) = self.job_id().cloned() {
            adapter.cancel(&job_id).await?;
            info!(task = %self.id, job_id = %job_id, "cancelled");
        }
        self.failure = Some(Failure::QueueCritical(QueueFailure::Killed));
        self.set_status(Status::Error)
    }

    /// Submit, poll until the job leaves the queue, then classify.
    ///
    /// Convenience for running a single task without a scheduler; the task
    /// must already be `Ready`.
    pub async fn start_and_wait(
        &mut self,
        adapter: &dyn QueueAdapter,
        builder: &dyn InputBuilder,
        artifacts: &[ArtifactLink],
        poll_interval: Duration,
    ) -> Result<Status> {
        self.start(adapter, builder, artifacts).await?;
        if !self.status.is_active() {
            return Ok(self.status);
        }

        let Some(job_id) = self.job_id().cloned() else {
            return Ok(self.status);
        };
        loop {
            match adapter.poll(&job_id).await {
                Ok(state) => {
                    if self.apply_job_state(state)? {
                        break;
                    }
                }
                Err(QueueError::TransientQuery(msg)) => {
                    debug!(task = %self.id, error = %msg, "transient poll error");
                }
                Err(e) => return Err(e.into()),
            }
            tokio::time::sleep(poll_interval).await;
        }

        self.finalize(adapter)
    }

    pub fn results(&self) -> TaskResults {
        let outputs = self
            .outdir()
            .ok()
            .and_then(|dir| fs::read_dir(dir).ok())
            .map(|entries| {
                let mut v: Vec<PathBuf> = entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.path())
                    .filter(|p| {
                        p.file_name()
                            .and_then(|n| n.to_str())
                            .is_some_and(|n| n.starts_with("out_"))
                    })
                    .collect();
                v.sort();
                v
            })
            .unwrap_or_default();

        let last = self.attempts.last();
        TaskResults {
            node: self.id,
            name: self.name.clone(),
            status: self.status,
            num_restarts: self.num_restarts,
            exit_code: last.and_then(|a| a.exit_code),
            failure: self.failure.clone(),
            num_warnings: self.report.as_ref().map_or(0, |r| r.warnings().count()),
            outputs,
            wall_time_secs: last.and_then(|a| a.wall_time()).map(|d| d.as_secs_f64()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::COMPLETION_MARKER;

    fn task_in(dir: &Path) -> Task {
        let mut t = Task::new(
            NodeId::new(0, 0),
            "gs".to_string(),
            InputPayload::new("true"),
            ResourceRequest::default(),
            QueueConfig::default(),
            vec![],
        );
        t.set_dir(dir.to_path_buf());
        t
    }

    fn evidence(code: Option<i32>, log: &str) -> JobEvidence {
        JobEvidence {
            exit_code: code,
            queue_failure: None,
            report: EventReport::parse(log),
        }
    }

    #[test]
    fn classify_clean_and_failed_runs() {
        let clean = format!("{COMPLETION_MARKER}\n");
        assert_eq!(evidence(Some(0), &clean).classify(), Ok(()));

        assert_eq!(
            evidence(None, &clean).classify(),
            Err(Failure::QueueCritical(QueueFailure::Killed))
        );

        let bug = "--- !BUG\nmessage: boom\n...\n";
        assert!(matches!(
            evidence(Some(0), bug).classify(),
            Err(Failure::SolverCritical(msg)) if msg.contains("boom")
        ));

        assert!(matches!(
            evidence(Some(3), "").classify(),
            Err(Failure::SolverCritical(msg)) if msg == "exit code 3"
        ));

        let unconverged = "--- !ScfConvergenceWarning\nmessage: nstep reached\n...\n";
        assert!(matches!(
            evidence(Some(0), unconverged).classify(),
            Err(Failure::Convergence(_))
        ));

        let mut killed = evidence(Some(0), &clean);
        killed.queue_failure = Some(QueueFailure::Memory);
        assert_eq!(
            killed.classify(),
            Err(Failure::QueueCritical(QueueFailure::Memory))
        );
    }

    #[test]
    fn unallocated_task_has_no_paths() {
        let t = Task::new(
            NodeId::new(0, 0),
            "a".to_string(),
            InputPayload::new("true"),
            ResourceRequest::default(),
            QueueConfig::default(),
            vec![],
        );
        assert!(matches!(t.dir(), Err(FlowError::NotAllocated)));
        assert!(t.job_request().is_err());
    }

    #[test]
    fn set_status_writes_marker_and_rejects_jumps() {
        let tmp = tempfile::tempdir().unwrap();
        let mut t = task_in(tmp.path());
        t.build_dirs().unwrap();

        t.set_status(Status::Ready).unwrap();
        assert_eq!(
            fs::read_to_string(tmp.path().join(STATUS_FILE)).unwrap().trim(),
            "ready"
        );
        assert!(matches!(
            t.set_status(Status::Completed),
            Err(FlowError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn reset_for_retry_clears_evidence_and_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let mut t = task_in(tmp.path());
        t.build_dirs().unwrap();
        fs::write(tmp.path().join(LOG_FILE), "--- !ERROR\nmessage: x\n...\n").unwrap();
        fs::write(tmp.path().join(EXITCODE_FILE), "1\n").unwrap();

        for st in [Status::Ready, Status::Locked, Status::Submitted, Status::Done] {
            t.set_status(st).unwrap();
        }
        assert!(t.get_event_report().unwrap().unwrap().has_errors());
        t.set_status(Status::AbiCritical).unwrap();

        t.reset_for_retry(None, None).unwrap();
        assert_eq!(t.status(), Status::Ready);
        assert_eq!(t.num_restarts(), 1);
        assert!(t.cached_report().is_none());
        assert!(!tmp.path().join(EXITCODE_FILE).exists());
        assert!(t.get_event_report().unwrap().is_none());
    }

    #[test]
    fn last_log_lines_falls_back_to_stderr() {
        let tmp = tempfile::tempdir().unwrap();
        let t = task_in(tmp.path());
        assert!(t.last_log_lines(5).is_empty());

        fs::write(tmp.path().join(STDERR_FILE), "a\nb\nc\n").unwrap();
        assert_eq!(t.last_log_lines(2), vec!["b".to_string(), "c".to_string()]);

        fs::write(tmp.path().join(LOG_FILE), "x\ny\n").unwrap();
        assert_eq!(t.last_log_lines(10), vec!["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn locked_task_recovers_to_ready() {
        let tmp = tempfile::tempdir().unwrap();
        let mut t = task_in(tmp.path());
        t.set_status(Status::Ready).unwrap();
        t.set_status(Status::Locked).unwrap();
        t.recover_after_restart().unwrap();
        assert_eq!(t.status(), Status::Ready);
    }

    #[test]
    fn job_request_points_into_task_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let mut t = task_in(tmp.path());
        t.input = InputPayload::new("abinit").stdin_file("run.files", "x");
        let req = t.job_request().unwrap();
        assert_eq!(req.name, "w0_t0");
        assert_eq!(req.stdin, Some(tmp.path().join("run.files")));
        assert_eq!(req.exitcode, tmp.path().join(EXITCODE_FILE));
    }
}
