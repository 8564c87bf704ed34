// src/status.rs

//! Task lifecycle states and the transitions allowed between them.
//!
//! The declaration order of [`Status`] is significant: it is the ordering
//! used by dependency predicates ("producer has reached at least `Done`").

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::FlowError;
use crate::types::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Registered, waiting for dependencies.
    Initialized,
    /// Held while a submission call is in flight.
    Locked,
    /// Dependencies satisfied; may be submitted.
    Ready,
    /// Accepted by the queue, not yet running.
    Submitted,
    /// Reported running by the queue.
    Running,
    /// The job exited; the event report has not been checked yet.
    Done,
    /// The solver reported a fatal error or a bug.
    AbiCritical,
    /// The batch system killed the job.
    QCritical,
    /// The run finished but did not converge.
    Unconverged,
    /// Terminal failure: retries exhausted or submission rejected.
    Error,
    /// Terminal success.
    Completed,
}

impl Default for Status {
    fn default() -> Self {
        Status::Initialized
    }
}

impl Status {
    pub const ALL: [Status; 11] = [
        Status::Initialized,
        Status::Locked,
        Status::Ready,
        Status::Submitted,
        Status::Running,
        Status::Done,
        Status::AbiCritical,
        Status::QCritical,
        Status::Unconverged,
        Status::Error,
        Status::Completed,
    ];

    /// Terminal-unless-retried failure classifications.
    pub fn is_critical(&self) -> bool {
        matches!(self, Status::AbiCritical | Status::QCritical | Status::Unconverged)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Error | Status::Completed)
    }

    /// The job is owned by the queue right now.
    pub fn is_active(&self) -> bool {
        matches!(self, Status::Locked | Status::Submitted | Status::Running)
    }

    /// Whether a producer in this status satisfies a dependency requiring
    /// `required`.
    ///
    /// Critical states and `Error` sort above `Done` but never satisfy
    /// anything: a failed run has no usable artifact.
    pub fn satisfies(&self, required: Status) -> bool {
        *self >= required && !self.is_critical() && *self != Status::Error
    }

    /// Check if transitioning from the current status to `new_status` is
    /// valid.
    ///
    /// - `Initialized` -> `Ready`
    /// - `Ready` -> `Locked`
    /// - `Locked` -> `Submitted` | `Ready` | `Error`
    /// - `Submitted` -> `Running` | `Done` | `QCritical` | `Error`
    /// - `Running` -> `Done` | critical | `Error`
    /// - `Done` -> `Completed` | critical
    /// - critical -> `Ready` (retry) | `Error`
    /// - `Error`, `Completed` are terminal
    pub fn can_transition_to(&self, new_status: Status) -> bool {
        if *self == new_status {
            return true;
        }

        match self {
            Status::Initialized => matches!(new_status, Status::Ready),
            Status::Ready => matches!(new_status, Status::Locked),
            Status::Locked => {
                matches!(new_status, Status::Submitted | Status::Ready | Status::Error)
            }
            Status::Submitted => matches!(
                new_status,
                Status::Running | Status::Done | Status::QCritical | Status::Error
            ),
            Status::Running => {
                matches!(new_status, Status::Done | Status::Error) || new_status.is_critical()
            }
            Status::Done => new_status == Status::Completed || new_status.is_critical(),
            Status::AbiCritical | Status::QCritical | Status::Unconverged => {
                matches!(new_status, Status::Ready | Status::Error)
            }
            Status::Error | Status::Completed => false,
        }
    }

    /// Move to `new_status`, failing with [`FlowError::InvalidTransition`]
    /// when the state machine forbids it.
    pub fn try_transition(&mut self, task: NodeId, new_status: Status) -> Result<(), FlowError> {
        if !self.can_transition_to(new_status) {
            return Err(FlowError::InvalidTransition {
                task,
                from: *self,
                to: new_status,
            });
        }
        *self = new_status;
        Ok(())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Initialized => "initialized",
            Status::Locked => "locked",
            Status::Ready => "ready",
            Status::Submitted => "submitted",
            Status::Running => "running",
            Status::Done => "done",
            Status::AbiCritical => "abi_critical",
            Status::QCritical => "q_critical",
            Status::Unconverged => "unconverged",
            Status::Error => "error",
            Status::Completed => "completed",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = s.trim().to_lowercase().replace('-', "_");
        Status::ALL
            .iter()
            .copied()
            .find(|st| st.as_str() == norm)
            .ok_or_else(|| format!("invalid status: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_follows_lifecycle() {
        assert!(Status::Initialized < Status::Locked);
        assert!(Status::Locked < Status::Ready);
        assert!(Status::Done < Status::AbiCritical);
        assert!(Status::Error < Status::Completed);
        assert_eq!(Status::ALL.iter().max(), Some(&Status::Completed));
    }

    #[test]
    fn failed_states_never_satisfy() {
        assert!(Status::Completed.satisfies(Status::Completed));
        assert!(Status::Completed.satisfies(Status::Done));
        assert!(Status::Done.satisfies(Status::Done));
        assert!(!Status::Done.satisfies(Status::Completed));
        assert!(!Status::AbiCritical.satisfies(Status::Done));
        assert!(!Status::Error.satisfies(Status::Done));
        assert!(!Status::Running.satisfies(Status::Done));
    }

    #[test]
    fn terminal_states_have_no_exit() {
        for to in Status::ALL {
            if to != Status::Completed {
                assert!(!Status::Completed.can_transition_to(to), "completed -> {to}");
            }
            if to != Status::Error {
                assert!(!Status::Error.can_transition_to(to), "error -> {to}");
            }
        }
    }

    #[test]
    fn critical_states_reset_to_ready() {
        for st in [Status::AbiCritical, Status::QCritical, Status::Unconverged] {
            assert!(st.is_critical());
            let exits: Vec<Status> = Status::ALL
                .into_iter()
                .filter(|to| *to != st && st.can_transition_to(*to))
                .collect();
            assert_eq!(exits, vec![Status::Ready, Status::Error]);
        }
    }

    #[test]
    fn initialized_cannot_skip_ready() {
        assert!(!Status::Initialized.can_transition_to(Status::Submitted));
        assert!(!Status::Ready.can_transition_to(Status::Submitted));
        assert!(Status::Ready.can_transition_to(Status::Locked));
    }

    #[test]
    fn try_transition_reports_both_ends() {
        let mut st = Status::Ready;
        st.try_transition(NodeId::new(0, 1), Status::Locked).unwrap();
        assert_eq!(st, Status::Locked);

        let err = st.try_transition(NodeId::new(0, 1), Status::Completed).unwrap_err();
        assert!(matches!(
            err,
            FlowError::InvalidTransition { from: Status::Locked, to: Status::Completed, .. }
        ));
        assert_eq!(st, Status::Locked);
    }

    #[test]
    fn display_round_trips() {
        for st in Status::ALL {
            assert_eq!(st.to_string().parse::<Status>(), Ok(st));
        }
        assert_eq!("Q-Critical".parse::<Status>(), Ok(Status::QCritical));
        assert!("bogus".parse::<Status>().is_err());
    }
}
