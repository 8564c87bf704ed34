// src/qadapters/sge.rs

use std::fmt::Write as _;
use std::path::Path;

use crate::config::{Limits, QueueKind};
use crate::errors::QueueError;

use super::command::run_command;
use super::script::{SHEBANG, format_hms, qparam_value, render_body};
use super::{BoxFuture, JobId, JobRequest, JobState, QueueAdapter, submit_failure};

/// Submit errors specific to this backend that are worth retrying.
const SGE_BUSY: &[&str] = &[
    "unable to contact qmaster",
    "failed receiving gdi request",
];

/// Sun/Open Grid Engine backend.
#[derive(Debug, Default, Clone)]
pub struct SgeAdapter;

impl SgeAdapter {
    pub fn new() -> Self {
        Self
    }
}

/// Find `job_id` in plain `qstat` output and map its state column.
///
/// A job missing from the listing has left the queue.
pub fn parse_qstat_listing(stdout: &str, job_id: &JobId) -> JobState {
    for line in stdout.lines() {
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.first() != Some(&job_id.0.as_str()) {
            continue;
        }
        let Some(state) = cols.get(4) else {
            return JobState::Unknown;
        };
        if state.contains('E') {
            return JobState::Done;
        }
        if state.contains('r') || state.contains('t') {
            return JobState::Running;
        }
        if state.contains('q') || state.contains('h') || state.contains('w') {
            return JobState::Queued;
        }
        return JobState::Unknown;
    }
    JobState::Done
}

impl QueueAdapter for SgeAdapter {
    fn kind(&self) -> QueueKind {
        QueueKind::Sge
    }

    fn generate_submission_script(&self, job: &JobRequest) -> Result<String, QueueError> {
        let res = &job.resources;
        let mut s = String::new();
        let _ = writeln!(s, "{SHEBANG}");
        let _ = writeln!(s, "#$ -N {}", job.name);
        let _ = writeln!(s, "#$ -S /bin/bash");
        let _ = writeln!(s, "#$ -pe mpi {}", res.num_cores());
        if let Some(limit) = job.timelimit() {
            let _ = writeln!(s, "#$ -l h_rt={}", format_hms(limit));
        }
        if let Some(mem) = res.mem_per_proc_mb {
            let _ = writeln!(s, "#$ -l h_vmem={mem}M");
        }
        if let Some(ref queue) = job.queue.queue.qname {
            let _ = writeln!(s, "#$ -q {queue}");
        }
        for (key, value) in job.queue.queue.qparams.iter() {
            let _ = writeln!(s, "#$ -l {}={}", key, qparam_value(value));
        }
        let _ = writeln!(s, "#$ -o {}", job.qout.display());
        let _ = writeln!(s, "#$ -e {}", job.qerr.display());
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
            let out = run_command("qsub", &["-terse", script.as_ref()], Some(&job.workdir))
                .await
                .map_err(|e| QueueError::TransientQuery(format!("qsub: {e}")))?;
            if !out.success {
                return Err(submit_failure(&out.stderr, SGE_BUSY));
            }
            // Array jobs print `123.1-10:1`.
            let id = out
                .stdout
                .trim()
                .split('.')
                .next()
                .unwrap_or_default()
                .to_string();
            if id.is_empty() {
                return Err(QueueError::Submission("qsub returned no job id".to_string()));
            }
            Ok(JobId(id))
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
            let out = run_command("qstat", &[], None)
                .await
                .map_err(|e| QueueError::TransientQuery(format!("qstat: {e}")))?;
            if !out.success {
                return Err(QueueError::TransientQuery(out.stderr.trim().to_string()));
            }
            Ok(parse_qstat_listing(&out.stdout, job_id))
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
            r#"error: unable to contact qmaster using port 6444 on host "head""#,
            "error: failed receiving gdi request response for mid=1 (got syncron message receive timeout error).",
        ] {
            assert!(
                matches!(submit_failure(stderr, SGE_BUSY), QueueError::TransientQuery(_)),
                "{stderr}"
            );
        }
        assert!(matches!(
            submit_failure(r#"Unable to run job: Job was rejected because job requests unknown queue "nope"."#, SGE_BUSY),
            QueueError::Submission(_)
        ));
    }

    const LISTING: &str = "\
job-ID  prior   name       user    state submit/start at     queue  slots ja-task-ID
-----------------------------------------------------------------------------------
  101 0.55500 w0_t0      alice   r     03/01/2024 10:00:00 all.q@n1   8
  102 0.00000 w0_t1      alice   qw    03/01/2024 10:00:05            8
";

    #[test]
    fn header_requests_parallel_environment() {
        let mut job = sample_job();
        job.resources.timelimit_secs = Some(120);
        let script = SgeAdapter::new().generate_submission_script(&job).unwrap();
        assert!(script.contains("#$ -pe mpi 8\n"));
        assert!(script.contains("#$ -l h_rt=00:02:00\n"));
    }

    #[test]
    fn reads_listing() {
        assert_eq!(parse_qstat_listing(LISTING, &JobId::from("101")), JobState::Running);
        assert_eq!(parse_qstat_listing(LISTING, &JobId::from("102")), JobState::Queued);
        assert_eq!(parse_qstat_listing(LISTING, &JobId::from("103")), JobState::Done);
    }
}
