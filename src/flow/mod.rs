// src/flow/mod.rs

//! The Flow -> Work -> Task model.
//!
//! - [`task`]: one external job, its directory and its attempt history.
//! - [`work`]: an ordered group of tasks.
//! - [`flow`]: the whole DAG, allocation and readiness.
//! - [`graph`]: petgraph views (cycle checks, graphviz, text tree).
//! - [`persistence`]: JSON dump and the directory lock.

#[allow(clippy::module_inception)]
pub mod flow;
pub mod graph;
pub mod persistence;
pub mod task;
pub mod work;

pub use flow::{BenchmarkEntry, Flow};
pub use persistence::{FlowLock, PICKLE_FILE, has_pickle};
pub use task::{Attempt, Dependency, JobEvidence, Task, TaskResults, TaskSpec};
pub use work::Work;
