// src/qadapters/pbs.rs

use std::fmt::Write as _;
use std::path::Path;

use crate::config::{Limits, QueueKind};
use crate::errors::QueueError;

use super::command::run_command;
use super::script::{SHEBANG, format_hms, qparam_value, render_body};
use super::{BoxFuture, JobId, JobRequest, JobState, QueueAdapter, submit_failure};

/// Submit errors specific to this backend that are worth retrying.
const PBS_BUSY: &[&str] = &[
    "cannot connect to server",
    "server is currently too busy",
];

/// PBS Pro / Torque backend.
#[derive(Debug, Default, Clone)]
pub struct PbsAdapter;

impl PbsAdapter {
    pub fn new() -> Self {
        Self
    }
}

/// Read `job_state = X` out of `qstat -f` output.
pub fn parse_qstat_full(stdout: &str) -> JobState {
    let state = stdout
        .lines()
        .filter_map(|l| l.trim().strip_prefix("job_state"))
        .filter_map(|rest| rest.trim().strip_prefix('='))
        .map(str::trim)
        .next();

    match state {
        Some("Q") | Some("H") | Some("W") | Some("T") | Some("S") => JobState::Queued,
        Some("R") | Some("E") | Some("B") => JobState::Running,
        Some("C") | Some("F") | Some("X") => JobState::Done,
        Some(_) => JobState::Unknown,
        None => JobState::Unknown,
    }
}

impl QueueAdapter for PbsAdapter {
    fn kind(&self) -> QueueKind {
        QueueKind::Pbs
    }

    fn generate_submission_script(&self, job: &JobRequest) -> Result<String, QueueError> {
        let res = &job.resources;
        let mut select = format!(
            "select={}:ncpus={}:mpiprocs=1:ompthreads={}",
            res.mpi_procs, res.omp_threads, res.omp_threads
        );
        if let Some(mem) = res.mem_per_proc_mb {
            let _ = write!(select, ":mem={mem}mb");
        }

        let mut s = String::new();
        let _ = writeln!(s, "{SHEBANG}");
        let _ = writeln!(s, "#PBS -N {}", job.name);
        let _ = writeln!(s, "#PBS -l {select}");
        if let Some(limit) = job.timelimit() {
            let _ = writeln!(s, "#PBS -l walltime={}", format_hms(limit));
        }
        if let Some(ref queue) = job.queue.queue.qname {
            let _ = writeln!(s, "#PBS -q {queue}");
        }
        for (key, value) in job.queue.queue.qparams.iter() {
            let _ = writeln!(s, "#PBS -l {}={}", key, qparam_value(value));
        }
        let _ = writeln!(s, "#PBS -o {}", job.qout.display());
        let _ = writeln!(s, "#PBS -e {}", job.qerr.display());
        s.push_str(&render_body(job)?);
        Ok(s)
    }

    fn submit<'a>(
        &'a self,
        script: &'a Path,
        job: &'a JobRequest,
    ) -> BoxFuture<'a, Result<JobId, QueueError>> {
        Box::pin(async move {
            let script = script.to_string_lossy();
            let out = run_command("qsub", &[script.as_ref()], Some(&job.workdir))
                .await
                .map_err(|e| QueueError::TransientQuery(format!("qsub: {e}")))?;
            if !out.success {
                return Err(submit_failure(&out.stderr, PBS_BUSY));
            }
            let id = out.stdout.trim();
            if id.is_empty() {
                return Err(QueueError::Submission("qsub returned no job id".to_string()));
            }
            Ok(JobId::from(id))
        })
    }

    fn cancel<'a>(&'a self, job_id: &'a JobId) -> BoxFuture<'a, Result<(), QueueError>> {
        Box::pin(async move {
            let out = run_command("qdel", &[job_id.0.as_str()], None)
                .await
                .map_err(|e| QueueError::TransientQuery(format!("qdel: {e}")))?;
            if out.success {
                Ok(())
            } else {
                Err(QueueError::TransientQuery(out.stderr.trim().to_string()))
            }
        })
    }

    fn poll<'a>(&'a self, job_id: &'a JobId) -> BoxFuture<'a, Result<JobState, QueueError>> {
        Box::pin(async move {
            let out = run_command("qstat", &["-f", job_id.0.as_str()], None)
                .await
                .map_err(|e| QueueError::TransientQuery(format!("qstat: {e}")))?;
            if !out.success {
                if out.stderr.contains("Unknown Job Id") || out.stderr.contains("has finished") {
                    return Ok(JobState::Done);
                }
                return Err(QueueError::TransientQuery(out.stderr.trim().to_string()));
            }
            Ok(parse_qstat_full(&out.stdout))
        })
    }

    fn default_resource_limits(&self) -> Limits {
        Limits {
            timelimit: Some("1h".to_string()),
            ..Limits::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qadapters::script::tests::sample_job;

    #[test]
    fn busy_controller_is_transient() {
        for stderr in [
            "qsub: cannot connect to server pbs01 (errno=111) Connection refused",
            "qsub: Resource temporarily unavailable",
        ] {
            assert!(
                matches!(submit_failure(stderr, PBS_BUSY), QueueError::TransientQuery(_)),
                "{stderr}"
            );
        }
        assert!(matches!(
            submit_failure("qsub: Unknown queue MSG=requested queue not found", PBS_BUSY),
            QueueError::Submission(_)
        ));
    }

    #[test]
    fn header_uses_select_and_walltime() {
        let mut job = sample_job();
        job.resources.timelimit_secs = Some(600);
        job.queue.queue.qname = Some("short".to_string());

        let script = PbsAdapter::new().generate_submission_script(&job).unwrap();
        assert!(script.contains("#PBS -l select=4:ncpus=2:mpiprocs=1:ompthreads=2\n"));
        assert!(script.contains("#PBS -l walltime=00:10:00\n"));
        assert!(script.contains("#PBS -q short\n"));
        assert!(script.contains("#PBS -o /scratch/flow/w0/t1/queue.qout\n"));
    }

    #[test]
    fn reads_job_state() {
        let out = "Job Id: 12.server\n    Job_Name = w0_t1\n    job_state = R\n";
        assert_eq!(parse_qstat_full(out), JobState::Running);
        assert_eq!(parse_qstat_full("    job_state = Q"), JobState::Queued);
        assert_eq!(parse_qstat_full("    job_state = F"), JobState::Done);
        assert_eq!(parse_qstat_full("garbage"), JobState::Unknown);
    }
}
