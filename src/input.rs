// src/input.rs

//! Input payload contract.
//!
//! The core never looks inside an [`InputPayload`]: it hands the payload to
//! an [`InputBuilder`], which writes it into the task directory and links
//! the artifacts produced by the task's dependencies.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::Result;
use crate::types::ArtifactKind;

/// What to run and which files to write before running it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputPayload {
    pub executable: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Name of one of `files` fed to the executable's stdin.
    #[serde(default)]
    pub stdin: Option<String>,

    /// File name (relative to the task directory) -> contents.
    #[serde(default)]
    pub files: BTreeMap<String, String>,
}

impl InputPayload {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn file(mut self, name: impl Into<String>, contents: impl Into<String>) -> Self {
        self.files.insert(name.into(), contents.into());
        self
    }

    /// Write `contents` to a file and feed it to stdin.
    pub fn stdin_file(mut self, name: impl Into<String>, contents: impl Into<String>) -> Self {
        let name = name.into();
        self.files.insert(name.clone(), contents.into());
        self.stdin = Some(name);
        self
    }
}

/// A producer artifact ready to be linked into a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLink {
    pub kind: ArtifactKind,
    /// `<producer>/outdata/out_<EXT>`.
    pub source: PathBuf,
}

/// Outcome of validating one input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validation {
    pub problems: Vec<String>,
    /// Diagnostic lines worth showing when the validation fails.
    pub log: Vec<String>,
}

impl Validation {
    pub fn is_ok(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Collaborator that turns a payload into files on disk.
pub trait InputBuilder: fmt::Debug + Send + Sync {
    /// Write the payload into `task_dir` and link `artifacts` into
    /// `task_dir/indata`.
    fn materialize(
        &self,
        payload: &InputPayload,
        task_dir: &Path,
        artifacts: &[ArtifactLink],
    ) -> Result<()>;

    /// Check a payload without running it.
    fn validate(&self, payload: &InputPayload) -> Validation;
}

/// Writes `files` verbatim and symlinks artifacts.
#[derive(Debug, Default, Clone)]
pub struct FileInputBuilder;

impl InputBuilder for FileInputBuilder {
    fn materialize(
        &self,
        payload: &InputPayload,
        task_dir: &Path,
        artifacts: &[ArtifactLink],
    ) -> Result<()> {
        for (name, contents) in payload.files.iter() {
            let path = task_dir.join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, contents)?;
        }

        let indata = task_dir.join("indata");
        fs::create_dir_all(&indata)?;
        for link in artifacts.iter() {
            if !link.source.exists() {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("artifact {} not found at {}", link.kind, link.source.display()),
                )
                .into());
            }
            let target = indata.join(link.kind.input_name());
            link_file(&link.source, &target)?;
            debug!(
                source = %link.source.display(),
                target = %target.display(),
                "linked artifact"
            );
        }
        Ok(())
    }

    fn validate(&self, payload: &InputPayload) -> Validation {
        let mut v = Validation::default();

        match which::which(&payload.executable) {
            Ok(path) => v.log.push(format!("executable: {}", path.display())),
            Err(e) => v
                .problems
                .push(format!("executable '{}' not found: {e}", payload.executable)),
        }

        if let Some(ref stdin) = payload.stdin {
            match payload.files.get(stdin) {
                None => v
                    .problems
                    .push(format!("stdin file '{stdin}' is not part of the input files")),
                Some(contents) if contents.trim().is_empty() => {
                    v.problems.push(format!("stdin file '{stdin}' is empty"))
                }
                Some(contents) => v.log.extend(contents.lines().map(str::to_string)),
            }
        }

        for name in payload.files.keys() {
            if Path::new(name).is_absolute() || name.split('/').any(|c| c == "..") {
                v.problems
                    .push(format!("input file '{name}' escapes the task directory"));
            }
        }

        v
    }
}

/// Replace `target` with a link to `source`.
fn link_file(source: &Path, target: &Path) -> io::Result<()> {
    if target.symlink_metadata().is_ok() {
        fs::remove_file(target)?;
    }
    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(source, target)
    }
    #[cfg(not(unix))]
    {
        fs::copy(source, target).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn materialize_writes_files_and_links_artifacts() {
        let tmp = tempfile::tempdir().unwrap();
        let producer = tmp.path().join("w0/t0/outdata");
        fs::create_dir_all(&producer).unwrap();
        fs::write(producer.join("out_DEN"), "density").unwrap();

        let task_dir = tmp.path().join("w0/t1");
        fs::create_dir_all(&task_dir).unwrap();

        let payload = InputPayload::new("abinit").stdin_file("run.abi", "ecut 10\n");
        let links = [ArtifactLink {
            kind: ArtifactKind::Den,
            source: producer.join("out_DEN"),
        }];

        FileInputBuilder.materialize(&payload, &task_dir, &links).unwrap();
        // A second call replaces the link instead of failing.
        FileInputBuilder.materialize(&payload, &task_dir, &links).unwrap();

        assert_eq!(fs::read_to_string(task_dir.join("run.abi")).unwrap(), "ecut 10\n");
        assert_eq!(
            fs::read_to_string(task_dir.join("indata/in_DEN")).unwrap(),
            "density"
        );
    }

    #[test]
    fn missing_artifact_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let links = [ArtifactLink {
            kind: ArtifactKind::Wfk,
            source: tmp.path().join("nope/out_WFK"),
        }];
        let err = FileInputBuilder
            .materialize(&InputPayload::new("true"), tmp.path(), &links)
            .unwrap_err();
        assert!(err.to_string().contains("WFK"));
    }

    #[test]
    fn validation_flags_missing_executable_and_bad_stdin() {
        let mut payload = InputPayload::new("flowtk-surely-missing-binary");
        payload.stdin = Some("run.abi".to_string());

        let v = FileInputBuilder.validate(&payload);
        assert!(!v.is_ok());
        assert_eq!(v.problems.len(), 2);

        let ok = FileInputBuilder.validate(&InputPayload::new("sh").stdin_file("in", "echo hi"));
        assert!(ok.is_ok(), "{:?}", ok.problems);
    }
}
