// src/config/manager.rs

//! Task manager configuration: which queue backends are available, their
//! limits, how jobs are launched, and the retry policy.
//!
//! ```yaml
//! qadapters:
//!   - priority: 1
//!     queue:
//!       qtype: slurm
//!       qname: debug
//!       qparams: { account: proj42 }
//!     limits:
//!       timelimit: 30m
//!       timelimit_hard: 2h
//!       max_cores: 64
//!     job:
//!       mpi_runner: mpirun
//!       modules: [abinit/9.10]
//!       shell_env: { OMP_PROC_BIND: "true" }
//! policy:
//!   max_retries: 3
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{FlowError, Result};
use crate::types::{ResourceRequest, parse_duration};

/// Batch-queue backend tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueKind {
    /// Run directly through `sh` on the local machine.
    Shell,
    Slurm,
    Pbs,
    Sge,
}

impl Default for QueueKind {
    fn default() -> Self {
        QueueKind::Shell
    }
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueKind::Shell => write!(f, "shell"),
            QueueKind::Slurm => write!(f, "slurm"),
            QueueKind::Pbs => write!(f, "pbs"),
            QueueKind::Sge => write!(f, "sge"),
        }
    }
}

impl FromStr for QueueKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "shell" => Ok(QueueKind::Shell),
            "slurm" => Ok(QueueKind::Slurm),
            "pbs" | "torque" => Ok(QueueKind::Pbs),
            "sge" => Ok(QueueKind::Sge),
            other => Err(format!(
                "invalid qtype: {other} (expected shell, slurm, pbs or sge)"
            )),
        }
    }
}

/// Top-level manager file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskManager {
    pub qadapters: Vec<QueueConfig>,

    #[serde(default)]
    pub policy: Policy,
}

impl Default for TaskManager {
    /// A single local shell adapter.
    fn default() -> Self {
        Self {
            qadapters: vec![QueueConfig::default()],
            policy: Policy::default(),
        }
    }
}

impl TaskManager {
    /// Pick the highest-priority adapter whose limits fit `resources`.
    pub fn select_qadapter(&self, resources: &ResourceRequest) -> Result<&QueueConfig> {
        let mut candidates: Vec<&QueueConfig> = self.qadapters.iter().collect();
        candidates.sort_by_key(|q| q.priority);

        candidates
            .into_iter()
            .find(|q| q.limits.accepts(resources))
            .ok_or_else(|| {
                FlowError::ConfigError(format!(
                    "no qadapter can run {} mpi procs x {} threads",
                    resources.mpi_procs, resources.omp_threads
                ))
            })
    }
}

/// Retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    /// How many times a critical task is reset before it becomes `Error`.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_retries() -> u32 {
    3
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
        }
    }
}

/// One entry of `qadapters`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Lower value wins.
    #[serde(default = "default_priority")]
    pub priority: u32,

    #[serde(default)]
    pub queue: QueueSection,

    #[serde(default)]
    pub limits: Limits,

    #[serde(default)]
    pub job: JobSection,
}

fn default_priority() -> u32 {
    1
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            priority: default_priority(),
            queue: QueueSection::default(),
            limits: Limits::default(),
            job: JobSection::default(),
        }
    }
}

impl QueueConfig {
    pub fn kind(&self) -> QueueKind {
        self.queue.qtype
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueSection {
    #[serde(default)]
    pub qtype: QueueKind,

    /// Partition / queue name.
    #[serde(default)]
    pub qname: Option<String>,

    /// Backend-specific options rendered as script directives.
    #[serde(default)]
    pub qparams: BTreeMap<String, serde_json::Value>,
}

/// Resource limits of a queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    /// Default wall-clock limit of a job, as a duration string.
    #[serde(default)]
    pub timelimit: Option<String>,

    /// Upper bound the corrector may raise `timelimit` to.
    #[serde(default)]
    pub timelimit_hard: Option<String>,

    #[serde(default = "default_min_cores")]
    pub min_cores: u32,

    #[serde(default = "default_max_cores")]
    pub max_cores: u32,

    /// Upper bound for memory per process, in megabytes.
    #[serde(default)]
    pub max_mem_per_proc_mb: Option<u64>,
}

fn default_min_cores() -> u32 {
    1
}

fn default_max_cores() -> u32 {
    1024
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            timelimit: None,
            timelimit_hard: None,
            min_cores: default_min_cores(),
            max_cores: default_max_cores(),
            max_mem_per_proc_mb: None,
        }
    }
}

impl Limits {
    pub fn accepts(&self, resources: &ResourceRequest) -> bool {
        let cores = resources.num_cores();
        cores >= self.min_cores && cores <= self.max_cores
    }

    pub fn timelimit(&self) -> Result<Option<Duration>> {
        parse_opt_duration(self.timelimit.as_deref())
    }

    pub fn timelimit_hard(&self) -> Result<Option<Duration>> {
        parse_opt_duration(self.timelimit_hard.as_deref())
    }
}

fn parse_opt_duration(s: Option<&str>) -> Result<Option<Duration>> {
    s.map(|s| parse_duration(s).map_err(FlowError::ConfigError))
        .transpose()
}

/// How the job script sets up and launches the executable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobSection {
    /// e.g. `mpirun`; `None` runs the executable directly.
    #[serde(default)]
    pub mpi_runner: Option<String>,

    #[serde(default)]
    pub shell_env: BTreeMap<String, String>,

    #[serde(default)]
    pub modules: Vec<String>,

    #[serde(default)]
    pub pre_run: Vec<String>,

    #[serde(default)]
    pub post_run: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_queue_manager() -> TaskManager {
        let small = QueueConfig {
            priority: 1,
            limits: Limits {
                max_cores: 4,
                ..Limits::default()
            },
            ..QueueConfig::default()
        };
        let big = QueueConfig {
            priority: 2,
            queue: QueueSection {
                qtype: QueueKind::Slurm,
                ..QueueSection::default()
            },
            limits: Limits {
                min_cores: 4,
                max_cores: 256,
                ..Limits::default()
            },
            ..QueueConfig::default()
        };
        TaskManager {
            qadapters: vec![big, small],
            policy: Policy::default(),
        }
    }

    #[test]
    fn selects_by_priority_then_limits() {
        let mgr = two_queue_manager();

        let small = ResourceRequest::default();
        assert_eq!(mgr.select_qadapter(&small).unwrap().kind(), QueueKind::Shell);

        let big = ResourceRequest {
            mpi_procs: 32,
            ..ResourceRequest::default()
        };
        assert_eq!(mgr.select_qadapter(&big).unwrap().kind(), QueueKind::Slurm);

        let huge = ResourceRequest {
            mpi_procs: 1000,
            ..ResourceRequest::default()
        };
        assert!(mgr.select_qadapter(&huge).is_err());
    }

    #[test]
    fn parses_yaml_manager() {
        let yaml = r#"
qadapters:
  - priority: 1
    queue:
      qtype: slurm
      qname: debug
      qparams: { account: proj42, ntasks_per_node: 4 }
    limits:
      timelimit: 30m
      max_cores: 64
    job:
      mpi_runner: mpirun
      modules: [abinit/9.10]
policy:
  max_retries: 5
"#;
        let mgr: TaskManager = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(mgr.policy.max_retries, 5);
        let q = &mgr.qadapters[0];
        assert_eq!(q.kind(), QueueKind::Slurm);
        assert_eq!(q.queue.qname.as_deref(), Some("debug"));
        assert_eq!(q.queue.qparams["ntasks_per_node"], serde_json::json!(4));
        assert_eq!(q.limits.timelimit().unwrap(), Some(Duration::from_secs(1800)));
        assert_eq!(q.job.modules, vec!["abinit/9.10".to_string()]);
    }
}
