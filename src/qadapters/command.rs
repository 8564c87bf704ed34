// src/qadapters/command.rs

//! Run queue command-line tools (`sbatch`, `qstat`, ...) and capture output.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

/// Captured output of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Run `program args...` to completion.
///
/// Only spawning errors surface as `Err`; a non-zero exit is reported
/// through [`CommandOutput::success`] so that each adapter can decide
/// whether it means "submission rejected" or "try again later".
pub async fn run_command(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
) -> std::io::Result<CommandOutput> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let output = cmd.output().await?;
    let out = CommandOutput {
        success: output.status.success(),
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };

    debug!(
        program,
        ?args,
        exit_code = out.code,
        "queue command finished"
    );

    Ok(out)
}
