// src/qadapters/mod.rs

//! Queue adapter layer.
//!
//! The engine talks to a [`QueueAdapter`] instead of to a concrete batch
//! system. Each task carries a [`QueueConfig`] whose `qtype` tag selects the
//! adapter once, through [`Backends`]; nothing else in the crate looks at
//! the tag.
//!
//! - [`shell`] runs the job script directly with `bash`.
//! - [`slurm`], [`pbs`] and [`sge`] drive real batch systems through their
//!   command-line tools.
//! - [`script`] renders the body shared by every job script.
//! - [`command`] runs the queue tools and captures their output.
//!
//! Tests plug in their own adapter that never spawns processes.

pub mod command;
pub mod pbs;
pub mod script;
pub mod sge;
pub mod shell;
pub mod slurm;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{Limits, QueueConfig, QueueKind};
use crate::errors::{FlowError, QueueError, QueueFailure, Result};
use crate::types::ResourceRequest;

pub use pbs::PbsAdapter;
pub use sge::SgeAdapter;
pub use shell::ShellAdapter;
pub use slurm::SlurmAdapter;

/// Boxed future returned by adapter calls.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Queue-assigned identifier of a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        JobId(s.to_string())
    }
}

/// What the backend says about a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Running,
    /// The job left the queue (successfully or not).
    Done,
    /// The backend answered but the state could not be interpreted.
    Unknown,
}

/// Everything an adapter needs to write and submit one job.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub name: String,
    pub workdir: PathBuf,
    pub executable: String,
    pub args: Vec<String>,
    pub stdin: Option<PathBuf>,
    pub stdout: PathBuf,
    pub stderr: PathBuf,
    /// Output / error files of the batch system itself.
    pub qout: PathBuf,
    pub qerr: PathBuf,
    /// The script writes the executable's exit status here.
    pub exitcode: PathBuf,
    pub resources: ResourceRequest,
    /// Queue configuration with per-task `qparams` already merged.
    pub queue: QueueConfig,
}

impl JobRequest {
    /// Task-level limit wins over the queue default.
    pub fn timelimit(&self) -> Option<Duration> {
        match self.resources.timelimit_secs {
            Some(secs) => Some(Duration::from_secs(secs)),
            None => self.queue.limits.timelimit().ok().flatten(),
        }
    }
}

/// Trait abstracting a batch-queue backend.
///
/// `submit`, `cancel` and `poll` talk to external tools and are async;
/// script generation and error classification are pure.
pub trait QueueAdapter: Send + Sync {
    fn kind(&self) -> QueueKind;

    /// Render the job script. Fails with [`QueueError::Submission`] if the
    /// request cannot be expressed for this backend.
    fn generate_submission_script(&self, job: &JobRequest) -> std::result::Result<String, QueueError>;

    /// Submit a script already written to `script`.
    fn submit<'a>(
        &'a self,
        script: &'a Path,
        job: &'a JobRequest,
    ) -> BoxFuture<'a, std::result::Result<JobId, QueueError>>;

    fn cancel<'a>(&'a self, job_id: &'a JobId) -> BoxFuture<'a, std::result::Result<(), QueueError>>;

    fn poll<'a>(&'a self, job_id: &'a JobId) -> BoxFuture<'a, std::result::Result<JobState, QueueError>>;

    fn default_resource_limits(&self) -> Limits;

    /// Look for signs that the batch system killed the job.
    fn classify_queue_errors(&self, qerr: &str) -> Option<QueueFailure> {
        classify_common(qerr)
    }
}

/// Patterns shared by most batch systems.
pub fn classify_common(qerr: &str) -> Option<QueueFailure> {
    let lower = qerr.to_lowercase();
    if lower.contains("time limit") || (lower.contains("walltime") && lower.contains("exceeded")) {
        Some(QueueFailure::Timelimit)
    } else if lower.contains("oom-kill")
        || lower.contains("out of memory")
        || lower.contains("out-of-memory")
        || lower.contains("memory limit")
    {
        Some(QueueFailure::Memory)
    } else if lower.contains("node fail") {
        Some(QueueFailure::NodeFailure)
    } else if lower.contains("killed") || lower.contains("cancelled") {
        Some(QueueFailure::Killed)
    } else {
        None
    }
}

/// Submit-command errors that mean the controller is busy or unreachable.
const TRANSIENT_SUBMIT_PATTERNS: &[&str] = &[
    "socket timed out",
    "temporarily unable to accept job",
    "resource temporarily unavailable",
    "connection refused",
    "connection timed out",
];

/// Error for a submit command that exited non-zero.
///
/// Controller hiccups (shared patterns plus the backend's `extra` ones)
/// are transient; anything else rejects the request.
pub fn submit_failure(stderr: &str, extra: &[&str]) -> QueueError {
    let msg = stderr.trim().to_string();
    let lower = msg.to_lowercase();
    let transient = TRANSIENT_SUBMIT_PATTERNS
        .iter()
        .chain(extra)
        .any(|p| lower.contains(&p.to_lowercase()));
    if transient {
        QueueError::TransientQuery(msg)
    } else {
        QueueError::Submission(msg)
    }
}

/// Registry mapping queue tags to adapter instances.
#[derive(Clone)]
pub struct Backends {
    adapters: HashMap<QueueKind, Arc<dyn QueueAdapter>>,
}

impl fmt::Debug for Backends {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backends")
            .field("kinds", &self.adapters.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for Backends {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl Backends {
    /// Empty registry; tests fill it with fakes.
    pub fn empty() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// Registry with every built-in backend.
    pub fn with_defaults() -> Self {
        let mut b = Self::empty();
        b.register(Arc::new(ShellAdapter::new()));
        b.register(Arc::new(SlurmAdapter::new()));
        b.register(Arc::new(PbsAdapter::new()));
        b.register(Arc::new(SgeAdapter::new()));
        b
    }

    /// Register (or replace) the adapter for its kind.
    pub fn register(&mut self, adapter: Arc<dyn QueueAdapter>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    pub fn get(&self, kind: QueueKind) -> Result<Arc<dyn QueueAdapter>> {
        self.adapters
            .get(&kind)
            .cloned()
            .ok_or_else(|| FlowError::ConfigError(format!("no queue adapter registered for '{kind}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_patterns() {
        assert_eq!(
            classify_common("slurmstepd: error: *** JOB 12 CANCELLED AT 10:00 DUE TO TIME LIMIT ***"),
            Some(QueueFailure::Timelimit)
        );
        assert_eq!(
            classify_common("Some of your processes may have been killed by the cgroup out-of-memory handler."),
            Some(QueueFailure::Memory)
        );
        assert_eq!(classify_common("all good"), None);
    }

    #[test]
    fn defaults_cover_every_kind() {
        let b = Backends::with_defaults();
        for kind in [QueueKind::Shell, QueueKind::Slurm, QueueKind::Pbs, QueueKind::Sge] {
            assert_eq!(b.get(kind).unwrap().kind(), kind);
        }
        assert!(Backends::empty().get(QueueKind::Shell).is_err());
    }
}
