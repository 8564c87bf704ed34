// src/engine/mod.rs

//! Scheduling engine for flowtk.
//!
//! This module ties together:
//! - readiness and submission limits
//! - polling of queued jobs and classification of finished ones
//! - the retry policy
//! - the stop conditions of the loop
//!
//! The synchronous decisions live in [`core`]; the async/IO shell that
//! talks to queue adapters is [`scheduler`]. [`launcher`] runs a single
//! cycle without looping.

use std::fmt;

pub mod core;
pub mod launcher;
pub mod retry;
pub mod scheduler;
pub mod summary;

pub use self::core::CycleLimits;
pub use launcher::Launcher;
pub use retry::{Correction, Corrector, DefaultCorrector, RetryDecision};
pub use scheduler::{CycleReport, FlowScheduler};

/// Events flowing into the scheduler loop from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// Finish the current cycle, persist, and exit (e.g. Ctrl-C).
    StopRequested,
}

/// Why the scheduler loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Every task is `Completed`.
    AllOk,
    /// Nothing is running and nothing can be scheduled.
    Deadlock,
    /// More tasks than allowed ended in `Error`.
    TooManyErrors(usize),
    StopRequested,
    MaxCycles(u64),
    Timelimit,
}

impl StopReason {
    pub fn is_success(&self) -> bool {
        matches!(self, StopReason::AllOk)
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> i32 {
        if self.is_success() { 0 } else { 1 }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::AllOk => write!(f, "all tasks completed"),
            StopReason::Deadlock => write!(f, "no runnable tasks left (deadlock)"),
            StopReason::TooManyErrors(n) => write!(f, "too many failed tasks ({n})"),
            StopReason::StopRequested => write!(f, "stop requested"),
            StopReason::MaxCycles(n) => write!(f, "reached max_cycles ({n})"),
            StopReason::Timelimit => write!(f, "scheduler timelimit reached"),
        }
    }
}
