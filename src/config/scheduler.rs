// src/config/scheduler.rs

use std::time::Duration;

use serde::Deserialize;

use crate::errors::{FlowError, Result};
use crate::types::parse_duration;

/// Options of the scheduler loop (`scheduler.yml`).
///
/// ```yaml
/// poll_interval: 10s
/// max_njobs_inqueue: 50
/// max_nlaunches: 5
/// timelimit: 12h
/// max_num_errors: 10
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Sleep between two cycles.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,

    /// Upper bound on jobs that are submitted or running at the same time.
    #[serde(default = "default_max_njobs_inqueue")]
    pub max_njobs_inqueue: usize,

    /// Upper bound on submissions per cycle.
    #[serde(default = "default_max_nlaunches")]
    pub max_nlaunches: usize,

    /// Stop after this many cycles.
    #[serde(default)]
    pub max_cycles: Option<u64>,

    /// Stop after this much wall-clock time.
    #[serde(default)]
    pub timelimit: Option<String>,

    /// Abort when more tasks than this are in `Error`.
    #[serde(default = "default_max_num_errors")]
    pub max_num_errors: usize,

    /// Attempts for a poll call failing with a transient error.
    #[serde(default = "default_poll_retries")]
    pub poll_retries: u32,

    /// First backoff delay between poll attempts; doubled each time.
    #[serde(default = "default_poll_backoff")]
    pub poll_backoff: String,
}

fn default_poll_interval() -> String {
    "5s".to_string()
}

fn default_max_njobs_inqueue() -> usize {
    200
}

fn default_max_nlaunches() -> usize {
    10
}

fn default_max_num_errors() -> usize {
    10
}

fn default_poll_retries() -> u32 {
    3
}

fn default_poll_backoff() -> String {
    "500ms".to_string()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            max_njobs_inqueue: default_max_njobs_inqueue(),
            max_nlaunches: default_max_nlaunches(),
            max_cycles: None,
            timelimit: None,
            max_num_errors: default_max_num_errors(),
            poll_retries: default_poll_retries(),
            poll_backoff: default_poll_backoff(),
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Result<Duration> {
        parse_duration(&self.poll_interval).map_err(FlowError::ConfigError)
    }

    pub fn poll_backoff(&self) -> Result<Duration> {
        parse_duration(&self.poll_backoff).map_err(FlowError::ConfigError)
    }

    pub fn timelimit(&self) -> Result<Option<Duration>> {
        self.timelimit
            .as_deref()
            .map(|s| parse_duration(s).map_err(FlowError::ConfigError))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_partial_yaml() {
        let cfg: SchedulerConfig = serde_yaml::from_str("poll_interval: 2s\nmax_cycles: 7\n").unwrap();
        assert_eq!(cfg.poll_interval().unwrap(), Duration::from_secs(2));
        assert_eq!(cfg.max_cycles, Some(7));
        assert_eq!(cfg.max_njobs_inqueue, 200);
        assert_eq!(cfg.poll_backoff().unwrap(), Duration::from_millis(500));
        assert_eq!(cfg.timelimit().unwrap(), None);
    }
}
