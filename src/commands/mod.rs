pub mod check;
pub mod config_cmd;
pub mod init;
pub mod run;
pub mod stop;
pub mod tasks;

use std::path::Path;

use anyhow::{Context, Result};
use svcwarden::config::Config;
use svcwarden::tasks::{TaskStore, TaskTracker};
use tokio::runtime::Runtime;

/// Task store configured for `dir`.
pub fn task_store(dir: &Path, config: &Config) -> TaskStore {
    TaskStore::new(config.tasks_path(dir))
}

/// Load the tracked tasks for `dir`, backed by its store.
pub fn load_tracker(dir: &Path, config: &Config) -> Result<TaskTracker> {
    let store = task_store(dir, config);
    let path = store.path().display().to_string();
    TaskTracker::load(store).with_context(|| format!("Failed to load tracked tasks from {}", path))
}

pub fn runtime() -> Result<Runtime> {
    Runtime::new().context("Failed to create async runtime")
}
