// src/qadapters/slurm.rs

use std::fmt::Write as _;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::config::{Limits, QueueKind};
use crate::errors::{QueueError, QueueFailure};

use super::command::run_command;
use super::script::{SHEBANG, format_hms, qparam_value, render_body};
use super::{BoxFuture, JobId, JobRequest, JobState, QueueAdapter, classify_common, submit_failure};

/// Submit errors specific to this backend that are worth retrying.
const SLURM_BUSY: &[&str] = &[
    "Unable to contact slurm controller",
    "Slurm temporarily unable",
];

#[derive(Debug, Default, Clone)]
pub struct SlurmAdapter;

impl SlurmAdapter {
    pub fn new() -> Self {
        Self
    }
}

fn submitted_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Submitted batch job (\d+)").expect("valid regex"))
}

/// Extract the job id from `sbatch` output.
pub fn parse_sbatch_output(stdout: &str) -> Option<JobId> {
    submitted_re()
        .captures(stdout)
        .map(|c| JobId(c[1].to_string()))
}

/// Map a `squeue -o %T` state.
pub fn parse_squeue_state(state: &str) -> JobState {
    match state.trim() {
        "" => JobState::Done,
        "PENDING" | "CONFIGURING" | "REQUEUED" | "SUSPENDED" | "RESV_DEL_HOLD" => JobState::Queued,
        "RUNNING" | "COMPLETING" | "STAGE_OUT" | "SIGNALING" => JobState::Running,
        "COMPLETED" | "CANCELLED" | "FAILED" | "TIMEOUT" | "NODE_FAIL" | "OUT_OF_MEMORY"
        | "PREEMPTED" | "BOOT_FAIL" | "DEADLINE" => JobState::Done,
        _ => JobState::Unknown,
    }
}

impl QueueAdapter for SlurmAdapter {
    fn kind(&self) -> QueueKind {
        QueueKind::Slurm
    }

    fn generate_submission_script(&self, job: &JobRequest) -> Result<String, QueueError> {
        let res = &job.resources;
        let mut s = String::new();
        let _ = writeln!(s, "{SHEBANG}");
        let _ = writeln!(s, "#SBATCH --job-name={}", job.name);
        let _ = writeln!(s, "#SBATCH --ntasks={}", res.mpi_procs);
        let _ = writeln!(s, "#SBATCH --cpus-per-task={}", res.omp_threads);
        if let Some(nodes) = res.nodes {
            let _ = writeln!(s, "#SBATCH --nodes={nodes}");
        }
        if let Some(mem) = res.mem_per_proc_mb {
            let _ = writeln!(s, "#SBATCH --mem-per-cpu={mem}M");
        }
        if let Some(limit) = job.timelimit() {
            let _ = writeln!(s, "#SBATCH --time={}", format_hms(limit));
        }
        if let Some(ref partition) = job.queue.queue.qname {
            let _ = writeln!(s, "#SBATCH --partition={partition}");
        }
        for (key, value) in job.queue.queue.qparams.iter() {
            let _ = writeln!(s, "#SBATCH --{}={}", key.replace('_', "-"), qparam_value(value));
        }
        let _ = writeln!(s, "#SBATCH --output={}", job.qout.display());
        let _ = writeln!(s, "#SBATCH --error={}", job.qerr.display());
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
            let out = run_command("sbatch", &[script.as_ref()], Some(&job.workdir))
                .await
                .map_err(|e| QueueError::TransientQuery(format!("sbatch: {e}")))?;
            if !out.success {
                return Err(submit_failure(&out.stderr, SLURM_BUSY));
            }
            parse_sbatch_output(&out.stdout).ok_or_else(|| {
                QueueError::Submission(format!("unexpected sbatch output: {}", out.stdout.trim()))
            })
        })
    }

    fn cancel<'a>(&'a self, job_id: &'a JobId) -> BoxFuture<'a, Result<(), QueueError>> {
        Box::pin(async move {
            let out = run_command("scancel", &[job_id.0.as_str()], None)
                .await
                .map_err(|e| QueueError::TransientQuery(format!("scancel: {e}")))?;
            if out.success {
                Ok(())
            } else {
                Err(QueueError::TransientQuery(out.stderr.trim().to_string()))
            }
        })
    }

    fn poll<'a>(&'a self, job_id: &'a JobId) -> BoxFuture<'a, Result<JobState, QueueError>> {
        Box::pin(async move {
            let out = run_command("squeue", &["-h", "-j", job_id.0.as_str(), "-o", "%T"], None)
                .await
                .map_err(|e| QueueError::TransientQuery(format!("squeue: {e}")))?;
            if !out.success {
                // Finished jobs age out of squeue.
                if out.stderr.contains("Invalid job id") {
                    return Ok(JobState::Done);
                }
                return Err(QueueError::TransientQuery(out.stderr.trim().to_string()));
            }
            Ok(parse_squeue_state(out.stdout.lines().next().unwrap_or("")))
        })
    }

    fn default_resource_limits(&self) -> Limits {
        Limits {
            timelimit: Some("1h".to_string()),
            ..Limits::default()
        }
    }

    fn classify_queue_errors(&self, qerr: &str) -> Option<QueueFailure> {
        if qerr.contains("DUE TO TIME LIMIT") {
            Some(QueueFailure::Timelimit)
        } else if qerr.contains("oom-kill") || qerr.contains("OUT_OF_MEMORY") {
            Some(QueueFailure::Memory)
        } else if qerr.contains("DUE TO NODE FAILURE") {
            Some(QueueFailure::NodeFailure)
        } else {
            classify_common(qerr)
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
            "sbatch: error: Batch job submission failed: Socket timed out on send/recv operation",
            "sbatch: error: Slurm temporarily unable to accept job, sleeping and retrying",
        ] {
            assert!(
                matches!(submit_failure(stderr, SLURM_BUSY), QueueError::TransientQuery(_)),
                "{stderr}"
            );
        }
        assert!(matches!(
            submit_failure("sbatch: error: invalid partition specified: nope", SLURM_BUSY),
            QueueError::Submission(_)
        ));
    }

    #[test]
    fn header_lists_resources_and_partition() {
        let mut job = sample_job();
        job.resources.timelimit_secs = Some(5400);
        job.queue.queue.qname = Some("debug".to_string());
        job.queue
            .queue
            .qparams
            .insert("ntasks_per_node".to_string(), serde_json::json!(4));

        let script = SlurmAdapter::new().generate_submission_script(&job).unwrap();
        assert!(script.starts_with("#!/bin/bash\n#SBATCH --job-name=w0_t1\n"));
        assert!(script.contains("#SBATCH --ntasks=4\n"));
        assert!(script.contains("#SBATCH --cpus-per-task=2\n"));
        assert!(script.contains("#SBATCH --time=01:30:00\n"));
        assert!(script.contains("#SBATCH --partition=debug\n"));
        assert!(script.contains("#SBATCH --ntasks-per-node=4\n"));
        assert!(script.contains("#SBATCH --error=/scratch/flow/w0/t1/queue.qerr\n"));
    }

    #[test]
    fn parses_sbatch_and_squeue() {
        assert_eq!(
            parse_sbatch_output("Submitted batch job 424242\n"),
            Some(JobId::from("424242"))
        );
        assert_eq!(parse_sbatch_output("error"), None);
        assert_eq!(parse_squeue_state("PENDING"), JobState::Queued);
        assert_eq!(parse_squeue_state("RUNNING\n"), JobState::Running);
        assert_eq!(parse_squeue_state(""), JobState::Done);
        assert_eq!(parse_squeue_state("WEIRD"), JobState::Unknown);
    }

    #[test]
    fn classifies_slurm_kills() {
        let a = SlurmAdapter::new();
        assert_eq!(
            a.classify_queue_errors("*** JOB 7 ON nid01 CANCELLED AT 2024 DUE TO TIME LIMIT ***"),
            Some(QueueFailure::Timelimit)
        );
        assert_eq!(
            a.classify_queue_errors("slurmstepd: error: Detected 1 oom-kill event(s)"),
            Some(QueueFailure::Memory)
        );
        assert_eq!(a.classify_queue_errors(""), None);
    }
}
