// src/config/mod.rs

//! Configuration loading and validation for flowtk.
//!
//! Responsibilities:
//! - Define the TOML-backed flow description (`model.rs`).
//! - Define the manager (`manager.rs`) and scheduler (`scheduler.rs`)
//!   options read from YAML or TOML.
//! - Load files from disk and standard locations (`loader.rs`).
//! - Validate references, acyclicity and limits (`validate.rs`).

pub mod loader;
pub mod manager;
pub mod model;
pub mod scheduler;
pub mod validate;

pub use loader::{
    find_manager, find_scheduler_config, load_and_validate, load_from_path, load_manager,
};
pub use manager::{JobSection, Limits, Policy, QueueConfig, QueueKind, QueueSection, TaskManager};
pub use model::{DepConfig, FlowFile, FlowSection, RawFlowFile, TaskConfig, WorkConfig};
pub use scheduler::SchedulerConfig;
pub use validate::validate_manager;
