use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Index of a Work inside its Flow.
pub type WorkId = usize;

/// Stable identity of a task: (owning work index, index inside the work).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId {
    pub work: WorkId,
    pub task: usize,
}

impl NodeId {
    pub fn new(work: WorkId, task: usize) -> Self {
        Self { work, task }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}_t{}", self.work, self.task)
    }
}

/// Class of output file a consumer needs from its producer.
///
/// This is a closed tag, not a path; the path is resolved once the
/// producer has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArtifactKind {
    /// Wavefunction output.
    #[serde(rename = "WFK")]
    Wfk,
    /// Density output.
    #[serde(rename = "DEN")]
    Den,
    /// Screening output.
    #[serde(rename = "SCR")]
    Scr,
    /// Derivative database.
    #[serde(rename = "DDB")]
    Ddb,
    /// k-derivative wavefunctions.
    #[serde(rename = "1WF")]
    Ddk,
}

impl ArtifactKind {
    /// File extension used on disk (`out_WFK`, `in_DEN`, ...).
    pub fn ext(&self) -> &'static str {
        match self {
            ArtifactKind::Wfk => "WFK",
            ArtifactKind::Den => "DEN",
            ArtifactKind::Scr => "SCR",
            ArtifactKind::Ddb => "DDB",
            ArtifactKind::Ddk => "1WF",
        }
    }

    pub fn output_name(&self) -> String {
        format!("out_{}", self.ext())
    }

    pub fn input_name(&self) -> String {
        format!("in_{}", self.ext())
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.ext())
    }
}

impl FromStr for ArtifactKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "WFK" => Ok(ArtifactKind::Wfk),
            "DEN" => Ok(ArtifactKind::Den),
            "SCR" => Ok(ArtifactKind::Scr),
            "DDB" => Ok(ArtifactKind::Ddb),
            "1WF" | "DDK" => Ok(ArtifactKind::Ddk),
            other => Err(format!(
                "invalid artifact kind: {other} (expected WFK, DEN, SCR, DDB or 1WF)"
            )),
        }
    }
}

/// Resources requested by a single task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequest {
    #[serde(default = "one")]
    pub mpi_procs: u32,
    #[serde(default = "one")]
    pub omp_threads: u32,
    #[serde(default)]
    pub nodes: Option<u32>,
    /// Memory per MPI process in megabytes.
    #[serde(default)]
    pub mem_per_proc_mb: Option<u64>,
    /// Wall-clock limit in seconds.
    #[serde(default)]
    pub timelimit_secs: Option<u64>,
}

fn one() -> u32 {
    1
}

impl Default for ResourceRequest {
    fn default() -> Self {
        Self {
            mpi_procs: 1,
            omp_threads: 1,
            nodes: None,
            mem_per_proc_mb: None,
            timelimit_secs: None,
        }
    }
}

impl ResourceRequest {
    pub fn num_cores(&self) -> u32 {
        self.mpi_procs.saturating_mul(self.omp_threads)
    }
}

/// Parse a simple duration string like `"3s"`, `"250ms"`, `"1m"`, `"2h"`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    // Find the boundary between digits and suffix.
    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    let scale = |factor: u64| {
        value
            .checked_mul(factor)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration '{}' is too large", s))
    };

    match unit.as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => scale(60),
        "h" => scale(60 * 60),
        _ => Err(format!(
            "unsupported duration unit '{}'; expected ms, s, m, or h",
            unit
        )),
    }
}
