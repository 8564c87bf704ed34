// src/errors.rs

//! Crate-wide error aliases and helpers.
//!
//! Expected job outcomes (a solver crash, a queue kill, ...) are *not*
//! errors; they are [`Failure`] values consumed by the state machine.
//! `FlowError` is reserved for contract violations, configuration problems
//! and IO.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::status::Status;
use crate::types::NodeId;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Task not found: {0}")]
    TaskNotFound(NodeId),

    #[error("Work not found: w{0}")]
    WorkNotFound(usize),

    #[error("Cycle detected in dependency graph: {0}")]
    DagCycle(String),

    #[error("Invalid status transition for {task}: {from} -> {to}")]
    InvalidTransition { task: NodeId, from: Status, to: Status },

    #[error("Flow has not been allocated; call allocate() first")]
    NotAllocated,

    #[error("Flow directory {0} is locked by another scheduler")]
    FlowLocked(String),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("YAML parsing error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors reported by a queue adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The request itself is broken (malformed script, rejected by the
    /// queue). Never retried.
    #[error("submission failed: {0}")]
    Submission(String),

    /// The backend could not be reached or answered garbage. The caller
    /// retries with backoff; the task is never failed because of it.
    #[error("transient queue query error: {0}")]
    TransientQuery(String),
}

impl QueueError {
    pub fn is_transient(&self) -> bool {
        matches!(self, QueueError::TransientQuery(_))
    }
}

/// Why the batch system killed a job, as read from its error file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueFailure {
    Timelimit,
    Memory,
    NodeFailure,
    Killed,
}

impl fmt::Display for QueueFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueFailure::Timelimit => write!(f, "timelimit"),
            QueueFailure::Memory => write!(f, "memory"),
            QueueFailure::NodeFailure => write!(f, "node failure"),
            QueueFailure::Killed => write!(f, "killed"),
        }
    }
}

/// Classified failure of a single job attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum Failure {
    /// The solver reported a fatal error or bug (`AbiCritical`).
    SolverCritical(String),
    /// The run finished without reaching convergence (`Unconverged`).
    Convergence(String),
    /// The batch system killed the job (`QCritical`).
    QueueCritical(QueueFailure),
    /// A producer never completed; the consumer is skipped.
    DependencyUnreachable(NodeId),
    /// The job could not be submitted at all.
    Submission(String),
}

impl Failure {
    /// Status a task lands in when this failure is recorded.
    pub fn status(&self) -> Status {
        match self {
            Failure::SolverCritical(_) => Status::AbiCritical,
            Failure::Convergence(_) => Status::Unconverged,
            Failure::QueueCritical(_) => Status::QCritical,
            Failure::DependencyUnreachable(_) | Failure::Submission(_) => Status::Error,
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::SolverCritical(msg) => write!(f, "solver critical: {msg}"),
            Failure::Convergence(msg) => write!(f, "not converged: {msg}"),
            Failure::QueueCritical(why) => write!(f, "killed by queue ({why})"),
            Failure::DependencyUnreachable(node) => write!(f, "dependency {node} unreachable"),
            Failure::Submission(msg) => write!(f, "submission error: {msg}"),
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, FlowError>;
