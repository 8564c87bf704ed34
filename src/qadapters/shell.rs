// src/qadapters/shell.rs

//! Local backend: the job script runs as a detached `bash` process and the
//! job id is its pid.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::process::Stdio;
use std::sync::Mutex;

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::config::{Limits, QueueKind};
use crate::errors::QueueError;

use super::script::{SHEBANG, render_body};
use super::{BoxFuture, JobId, JobRequest, JobState, QueueAdapter};

#[derive(Debug, Default)]
pub struct ShellAdapter {
    /// Children spawned by this process, keyed by pid.
    children: Mutex<HashMap<u32, Child>>,
}

impl ShellAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn parse_pid(job_id: &JobId) -> Result<u32, QueueError> {
        job_id
            .0
            .trim()
            .parse()
            .map_err(|_| QueueError::Submission(format!("invalid shell job id '{job_id}'")))
    }
}

/// Signal-0 liveness probe for processes we did not spawn (e.g. after the
/// scheduler was restarted).
pub fn is_process_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

impl QueueAdapter for ShellAdapter {
    fn kind(&self) -> QueueKind {
        QueueKind::Shell
    }

    fn generate_submission_script(&self, job: &JobRequest) -> Result<String, QueueError> {
        let body = render_body(job)?;
        Ok(format!("{SHEBANG}\n{body}"))
    }

    fn submit<'a>(
        &'a self,
        script: &'a Path,
        job: &'a JobRequest,
    ) -> BoxFuture<'a, Result<JobId, QueueError>> {
        Box::pin(async move {
            let qout = File::create(&job.qout)
                .map_err(|e| QueueError::Submission(format!("{}: {e}", job.qout.display())))?;
            let qerr = File::create(&job.qerr)
                .map_err(|e| QueueError::Submission(format!("{}: {e}", job.qerr.display())))?;

            let child = Command::new("bash")
                .arg(script)
                .current_dir(&job.workdir)
                .stdin(Stdio::null())
                .stdout(Stdio::from(qout))
                .stderr(Stdio::from(qerr))
                .spawn()
                .map_err(|e| QueueError::Submission(format!("failed to spawn bash: {e}")))?;

            let pid = child
                .id()
                .ok_or_else(|| QueueError::Submission("child exited before reporting a pid".into()))?;

            debug!(pid, job = %job.name, "started local job");

            if let Ok(mut children) = self.children.lock() {
                children.insert(pid, child);
            }
            Ok(JobId(pid.to_string()))
        })
    }

    fn cancel<'a>(&'a self, job_id: &'a JobId) -> BoxFuture<'a, Result<(), QueueError>> {
        Box::pin(async move {
            let pid = Self::parse_pid(job_id)?;

            let owned = self
                .children
                .lock()
                .ok()
                .and_then(|mut children| children.remove(&pid));

            match owned {
                Some(mut child) => {
                    if let Err(e) = child.start_kill() {
                        warn!(pid, error = %e, "failed to kill local job");
                    }
                }
                None => {
                    let raw = i32::try_from(pid)
                        .map_err(|_| QueueError::Submission(format!("pid {pid} out of range")))?;
                    match kill(Pid::from_raw(raw), Signal::SIGTERM) {
                        Ok(()) | Err(Errno::ESRCH) => {}
                        Err(e) => {
                            return Err(QueueError::TransientQuery(format!(
                                "kill {pid} failed: {e}"
                            )));
                        }
                    }
                }
            }
            Ok(())
        })
    }

    fn poll<'a>(&'a self, job_id: &'a JobId) -> BoxFuture<'a, Result<JobState, QueueError>> {
        Box::pin(async move {
            let pid = Self::parse_pid(job_id)?;

            let mut children = self
                .children
                .lock()
                .map_err(|_| QueueError::TransientQuery("child table poisoned".into()))?;

            if let Some(child) = children.get_mut(&pid) {
                return match child.try_wait() {
                    Ok(Some(_)) => {
                        children.remove(&pid);
                        Ok(JobState::Done)
                    }
                    Ok(None) => Ok(JobState::Running),
                    Err(e) => Err(QueueError::TransientQuery(format!("wait on {pid}: {e}"))),
                };
            }

            if is_process_alive(pid) {
                Ok(JobState::Running)
            } else {
                Ok(JobState::Done)
            }
        })
    }

    fn default_resource_limits(&self) -> Limits {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(1);
        Limits {
            max_cores: cores,
            ..Limits::default()
        }
    }
}
