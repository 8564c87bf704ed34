// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::status::Status;
use crate::types::{ArtifactKind, ResourceRequest};

/// Flow description as read from a TOML file.
///
/// ```toml
/// [flow]
/// name = "si_gw"
/// workdir = "flow_si_gw"
/// max_retries = 2
///
/// [[work]]
/// name = "bands"
/// exclude_from_benchmark = true
///
/// [[work.task]]
/// name = "gs"
/// executable = "abinit"
/// stdin = "run.files"
/// files = { "run.abi" = "ecut 24\n", "run.files" = "run.abi\n" }
///
/// [[work.task]]
/// name = "nscf"
/// executable = "abinit"
/// deps = [{ task = "bands.gs", artifact = "DEN" }]
/// ```
///
/// Task references in `deps` are `"<work>.<task>"` names and may only point
/// to tasks declared earlier in the file.
#[derive(Debug, Clone, Deserialize)]
pub struct RawFlowFile {
    #[serde(default)]
    pub flow: FlowSection,

    #[serde(default)]
    pub work: Vec<WorkConfig>,
}

/// Validated flow file. Can only be built through `TryFrom<RawFlowFile>`.
#[derive(Debug, Clone)]
pub struct FlowFile {
    pub flow: FlowSection,
    pub work: Vec<WorkConfig>,
}

impl FlowFile {
    pub(crate) fn new_unchecked(flow: FlowSection, work: Vec<WorkConfig>) -> Self {
        Self { flow, work }
    }

    /// Total number of tasks over all works.
    pub fn num_tasks(&self) -> usize {
        self.work.iter().map(|w| w.task.len()).sum()
    }
}

/// `[flow]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct FlowSection {
    #[serde(default = "default_flow_name")]
    pub name: String,

    /// Working directory; the CLI `--workdir` flag wins over this.
    #[serde(default)]
    pub workdir: Option<String>,

    /// Overrides the manager's `policy.max_retries` for this flow.
    #[serde(default)]
    pub max_retries: Option<u32>,
}

fn default_flow_name() -> String {
    "flow".to_string()
}

impl Default for FlowSection {
    fn default() -> Self {
        Self {
            name: default_flow_name(),
            workdir: None,
            max_retries: None,
        }
    }
}

/// `[[work]]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkConfig {
    pub name: String,

    /// Metadata only: keep this work out of performance accounting.
    #[serde(default)]
    pub exclude_from_benchmark: bool,

    #[serde(default)]
    pub task: Vec<TaskConfig>,
}

/// `[[work.task]]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    pub name: String,

    /// Program to run (looked up on `PATH` at validation time).
    pub executable: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Name of a file in `files` piped to the executable's stdin.
    #[serde(default)]
    pub stdin: Option<String>,

    /// Input files written into the task directory, name -> contents.
    #[serde(default)]
    pub files: BTreeMap<String, String>,

    #[serde(default)]
    pub resources: ResourceRequest,

    /// Backend-specific queue parameters merged over the manager's.
    #[serde(default)]
    pub qparams: BTreeMap<String, serde_json::Value>,

    #[serde(default)]
    pub deps: Vec<DepConfig>,
}

/// One dependency of a task.
#[derive(Debug, Clone, Deserialize)]
pub struct DepConfig {
    /// `"<work>.<task>"` reference to the producer.
    pub task: String,

    #[serde(default)]
    pub artifact: Option<ArtifactKind>,

    /// Status the producer must reach; `completed` when omitted.
    #[serde(default)]
    pub status: Option<Status>,
}
