// src/flow/persistence.rs

//! On-disk state of a flow: the JSON dump and the directory lock.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::errors::{FlowError, Result};

/// Name of the persisted flow inside its working directory.
pub const PICKLE_FILE: &str = "__flowtk__.json";

/// Name of the lock file inside the working directory.
pub const LOCK_FILE: &str = ".flowtk.lock";

pub fn pickle_path(workdir: &Path) -> PathBuf {
    workdir.join(PICKLE_FILE)
}

pub fn has_pickle(workdir: &Path) -> bool {
    pickle_path(workdir).is_file()
}

/// Write `value` as JSON through a temp file in the same directory, then
/// rename it over the target.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    let tmp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| FlowError::IoError(e.error))?;

    debug!(path = %path.display(), "persisted flow state");
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

/// Exclusive advisory lock on a flow directory.
///
/// Held by a scheduler or launcher for its whole run; released on drop.
#[derive(Debug)]
pub struct FlowLock {
    file: File,
    path: PathBuf,
}

impl FlowLock {
    pub fn acquire(workdir: &Path) -> Result<Self> {
        fs::create_dir_all(workdir)?;
        let path = workdir.join(LOCK_FILE);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if FileExt::try_lock_exclusive(&file).is_err() {
            return Err(FlowError::FlowLocked(workdir.display().to_string()));
        }

        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        debug!(path = %path.display(), "acquired flow lock");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FlowLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn json_round_trip_replaces_previous_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = pickle_path(tmp.path());

        let mut m = BTreeMap::new();
        m.insert("a".to_string(), 1);
        write_json_atomic(&path, &m).unwrap();
        m.insert("b".to_string(), 2);
        write_json_atomic(&path, &m).unwrap();

        let back: BTreeMap<String, i32> = read_json(&path).unwrap();
        assert_eq!(back, m);
        assert!(has_pickle(tmp.path()));

        // No stray temp files left behind.
        let entries = fs::read_dir(tmp.path()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn second_lock_holder_is_refused() {
        let tmp = tempfile::tempdir().unwrap();
        let first = FlowLock::acquire(tmp.path()).unwrap();
        let err = FlowLock::acquire(tmp.path()).unwrap_err();
        assert!(matches!(err, FlowError::FlowLocked(_)));

        drop(first);
        assert!(FlowLock::acquire(tmp.path()).is_ok());
    }
}
