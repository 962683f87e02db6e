//! On-disk persistence of the tracked task list.
//!
//! The file is a pretty-printed JSON array in insertion order. Saves go
//! through a temp file in the same directory followed by a rename, so a crash
//! mid-write leaves the previous file intact.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::StoreError;

use super::{TaskSet, TrackedTask};

#[derive(Debug, Clone)]
pub struct TaskStore {
    path: PathBuf,
}

impl TaskStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }

    /// Load the task set. A missing file is an empty set.
    pub fn load(&self) -> Result<TaskSet, StoreError> {
        if !self.path.exists() {
            return Ok(TaskSet::new());
        }

        let content = fs::read_to_string(&self.path).map_err(|e| self.io_err(e))?;
        if content.trim().is_empty() {
            return Ok(TaskSet::new());
        }

        let tasks: Vec<TrackedTask> =
            serde_json::from_str(&content).map_err(|source| StoreError::Json {
                path: self.path.display().to_string(),
                source,
            })?;

        Ok(TaskSet::from_tasks(tasks))
    }

    /// Save the task set atomically.
    pub fn save(&self, tasks: &TaskSet) -> Result<(), StoreError> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        if !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }

        let content =
            serde_json::to_string_pretty(tasks.as_slice()).map_err(|source| StoreError::Json {
                path: self.path.display().to_string(),
                source,
            })?;

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "tasks.json".to_string());
        let temp_path = parent.join(format!(".{}.tmp.{}", file_name, std::process::id()));

        let written = (|| -> std::io::Result<()> {
            let mut file = File::create(&temp_path)?;
            file.write_all(content.as_bytes())?;
            file.write_all(b"\n")?;
            file.sync_all()?;
            Ok(())
        })();

        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path);
            return Err(self.io_err(e));
        }

        fs::rename(&temp_path, &self.path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            self.io_err(e)
        })
    }
}
