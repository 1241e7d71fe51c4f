//! File-backed store writing one JSON document per snapshot.
//!
//! Writes go to `<path>.tmp`, are flushed to disk, then renamed over `<path>`,
//! and the directory entry is synced, so a crash mid-write leaves either the
//! old or the new snapshot readable.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::{QueueError, TaskRecord};

use super::TaskStore;

const FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct SnapshotRef<'a> {
    version: u32,
    tasks: &'a [TaskRecord],
}

#[derive(Deserialize)]
struct Snapshot {
    version: u32,
    #[serde(default)]
    tasks: Vec<TaskRecord>,
}

fn persistence(context: &str, path: &Path, err: impl std::fmt::Display) -> QueueError {
    QueueError::Persistence(format!("{context} {}: {err}", path.display()))
}

/// Snapshot store backed by a single JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Create a store at `path`, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// `QueueError::Persistence` if the parent directory cannot be created.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, QueueError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| persistence("cannot create", parent, e))?;
        }
        Ok(Self { path })
    }

    /// Location of the snapshot.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parent_dir(&self) -> &Path {
        self.path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
    }

    /// Make the rename itself durable.
    #[cfg(unix)]
    fn sync_parent_dir(&self) -> Result<(), QueueError> {
        let dir = self.parent_dir();
        File::open(dir)
            .and_then(|d| d.sync_all())
            .map_err(|e| persistence("cannot sync directory", dir, e))
    }

    // Directories cannot be opened as files here; the rename is already durable.
    #[cfg(not(unix))]
    #[allow(clippy::unnecessary_wraps)]
    fn sync_parent_dir(&self) -> Result<(), QueueError> {
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl TaskStore for JsonFileStore {
    fn load(&self) -> Result<Vec<TaskRecord>, QueueError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.path).map_err(|e| persistence("cannot open", &self.path, e))?;
        let snapshot: Snapshot = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| persistence("corrupt snapshot", &self.path, e))?;
        if snapshot.version != FORMAT_VERSION {
            return Err(persistence(
                "unsupported snapshot version in",
                &self.path,
                snapshot.version,
            ));
        }
        Ok(snapshot.tasks)
    }

    fn save(&self, records: &[TaskRecord]) -> Result<(), QueueError> {
        let tmp = self.temp_path();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)
            .map_err(|e| persistence("cannot write", &tmp, e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(
            &mut writer,
            &SnapshotRef {
                version: FORMAT_VERSION,
                tasks: records,
            },
        )
        .map_err(|e| persistence("cannot serialize", &tmp, e))?;
        writer.flush().map_err(|e| persistence("cannot flush", &tmp, e))?;
        writer
            .get_ref()
            .sync_all()
            .map_err(|e| persistence("cannot sync", &tmp, e))?;
        drop(writer);
        fs::rename(&tmp, &self.path).map_err(|e| persistence("cannot replace", &self.path, e))?;
        self.sync_parent_dir()
    }

    fn describe(&self) -> String {
        format!("json:{}", self.path.display())
    }
}
