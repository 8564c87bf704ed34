// src/qadapters/script.rs

//! Body shared by every job script: environment, launch line, exit code.

use std::borrow::Cow;
use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;

use shell_escape::escape;

use crate::errors::QueueError;

use super::JobRequest;

pub const SHEBANG: &str = "#!/bin/bash";

/// Quote a single shell word.
pub fn quote(s: &str) -> String {
    escape(Cow::from(s)).into_owned()
}

fn quote_path(p: &Path) -> String {
    quote(&p.to_string_lossy())
}

/// `HH:MM:SS`, the format every batch system understands.
pub fn format_hms(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Render a `qparams` value the way it appears in a directive.
pub fn qparam_value(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Render the script body that follows the backend-specific header.
pub fn render_body(job: &JobRequest) -> Result<String, QueueError> {
    if job.executable.trim().is_empty() {
        return Err(QueueError::Submission(format!(
            "job '{}' has an empty executable",
            job.name
        )));
    }

    let mut out = String::new();
    let spec = &job.queue.job;

    // Writes into a String cannot fail.
    let _ = writeln!(out, "cd {}", quote_path(&job.workdir));

    for module in spec.modules.iter() {
        let _ = writeln!(out, "module load {}", quote(module));
    }
    for (key, value) in spec.shell_env.iter() {
        let _ = writeln!(out, "export {}={}", key, quote(value));
    }
    let _ = writeln!(out, "export OMP_NUM_THREADS={}", job.resources.omp_threads);

    for line in spec.pre_run.iter() {
        let _ = writeln!(out, "{line}");
    }

    let mut launch = String::new();
    if let Some(ref runner) = spec.mpi_runner {
        let _ = write!(launch, "{} -n {} ", runner, job.resources.mpi_procs);
    }
    launch.push_str(&quote(&job.executable));
    for arg in job.args.iter() {
        launch.push(' ');
        launch.push_str(&quote(arg));
    }
    if let Some(ref stdin) = job.stdin {
        let _ = write!(launch, " < {}", quote_path(stdin));
    }
    let _ = write!(
        launch,
        " > {} 2> {}",
        quote_path(&job.stdout),
        quote_path(&job.stderr)
    );

    let _ = writeln!(out, "{launch}");
    let _ = writeln!(out, "__flowtk_rc=$?");
    let _ = writeln!(out, "echo $__flowtk_rc > {}", quote_path(&job.exitcode));

    for line in spec.post_run.iter() {
        let _ = writeln!(out, "{line}");
    }
    let _ = writeln!(out, "exit $__flowtk_rc");

    Ok(out)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::config::QueueConfig;
    use crate::types::ResourceRequest;

    pub(crate) fn sample_job() -> JobRequest {
        let dir = PathBuf::from("/scratch/flow/w0/t1");
        JobRequest {
            name: "w0_t1".to_string(),
            workdir: dir.clone(),
            executable: "abinit".to_string(),
            args: vec![],
            stdin: Some(dir.join("run.files")),
            stdout: dir.join("run.log"),
            stderr: dir.join("run.err"),
            qout: dir.join("queue.qout"),
            qerr: dir.join("queue.qerr"),
            exitcode: dir.join("job.exitcode"),
            resources: ResourceRequest {
                mpi_procs: 4,
                omp_threads: 2,
                ..ResourceRequest::default()
            },
            queue: QueueConfig::default(),
        }
    }

    #[test]
    fn body_captures_exit_code_before_post_run() {
        let mut job = sample_job();
        job.queue.job.mpi_runner = Some("mpirun".to_string());
        job.queue.job.post_run = vec!["echo cleanup".to_string()];

        let body = render_body(&job).unwrap();
        let launch = body.find("mpirun -n 4 abinit < /scratch/flow/w0/t1/run.files").unwrap();
        let rc = body.find("__flowtk_rc=$?").unwrap();
        let post = body.find("echo cleanup").unwrap();
        assert!(launch < rc && rc < post);
        assert!(body.contains("export OMP_NUM_THREADS=2"));
        assert!(body.trim_end().ends_with("exit $__flowtk_rc"));
    }

    #[test]
    fn empty_executable_is_rejected() {
        let mut job = sample_job();
        job.executable = "  ".to_string();
        assert!(matches!(render_body(&job), Err(QueueError::Submission(_))));
    }

    #[test]
    fn hms_format() {
        assert_eq!(format_hms(Duration::from_secs(3725)), "01:02:05");
    }
}
