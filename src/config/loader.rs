// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::config::manager::TaskManager;
use crate::config::model::{FlowFile, RawFlowFile};
use crate::config::scheduler::SchedulerConfig;
use crate::config::validate::validate_manager;
use crate::errors::Result;

/// File name of the manager configuration in the standard locations.
pub const MANAGER_FILE: &str = "manager.yml";

/// File name of the scheduler configuration in the standard locations.
pub const SCHEDULER_FILE: &str = "scheduler.yml";

/// Load a flow file from a given path and return the raw `RawFlowFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation (references, cycles, etc.). Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawFlowFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawFlowFile = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a flow file from path and run validation.
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Checks for:
///   - empty flows and duplicate names,
///   - unknown, self or forward `deps` references,
///   - dependency cycles.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<FlowFile> {
    let raw_config = load_from_path(&path)?;
    let config = FlowFile::try_from(raw_config)?;
    Ok(config)
}

/// Read a YAML or TOML file, picking the format from the extension.
fn read_structured<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = fs::read_to_string(path)?;
    let is_toml = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("toml"));

    if is_toml {
        Ok(toml::from_str(&contents)?)
    } else {
        Ok(serde_yaml::from_str(&contents)?)
    }
}

/// Load and validate a manager file (`.yml`, `.yaml` or `.toml`).
pub fn load_manager(path: impl AsRef<Path>) -> Result<TaskManager> {
    let path = path.as_ref();
    let manager: TaskManager = read_structured(path)?;
    validate_manager(&manager)?;
    debug!(path = %path.display(), qadapters = manager.qadapters.len(), "loaded manager");
    Ok(manager)
}

/// Resolve the manager: explicit path first, then the standard locations,
/// then a local shell manager.
pub fn find_manager(explicit: Option<&Path>) -> Result<TaskManager> {
    if let Some(path) = explicit {
        return load_manager(path);
    }

    match first_existing(MANAGER_FILE) {
        Some(path) => {
            info!(path = %path.display(), "using manager from standard location");
            load_manager(path)
        }
        None => {
            info!("no manager file found; using local shell manager");
            Ok(TaskManager::default())
        }
    }
}

/// Resolve the scheduler options from the standard locations.
pub fn find_scheduler_config() -> Result<SchedulerConfig> {
    match first_existing(SCHEDULER_FILE) {
        Some(path) => {
            let cfg: SchedulerConfig = read_structured(&path)?;
            // Surface bad duration strings before the loop starts.
            cfg.poll_interval()?;
            cfg.poll_backoff()?;
            cfg.timelimit()?;
            Ok(cfg)
        }
        None => Ok(SchedulerConfig::default()),
    }
}

/// Standard locations, in lookup order: working directory, then
/// `~/.flowtk/`.
pub fn standard_locations(file_name: &str) -> Vec<PathBuf> {
    let mut out = vec![PathBuf::from(file_name)];
    if let Some(dir) = user_config_dir() {
        out.push(dir.join(file_name));
    }
    out
}

/// `~/.flowtk`, if a home directory is known.
pub fn user_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".flowtk"))
}

fn first_existing(file_name: &str) -> Option<PathBuf> {
    standard_locations(file_name).into_iter().find(|p| p.is_file())
}
