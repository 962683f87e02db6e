//! Tracked remote tasks.
//!
//! A task is tracked from the moment its id is first seen (in the service's
//! output or by manual entry) until someone explicitly clears completed
//! tasks. The remote status is refreshed by [`tracker`] on every poll cycle.

pub mod scan;
pub mod store;
pub mod tracker;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::remote::TaskStatusResponse;

pub use scan::extract_task_ids;
pub use store::TaskStore;
pub use tracker::{run_cycle, CycleResults, CycleSummary, PollResult, TaskTracker};

/// Status given to a task when it is first observed.
pub const INITIAL_STATUS: &str = "queued";

/// Remote statuses after which a task never changes again.
pub const TERMINAL_STATES: &[&str] = &[
    "completed",
    "succeeded",
    "success",
    "failed",
    "error",
    "canceled",
    "cancelled",
];

/// Case-insensitive check against [`TERMINAL_STATES`].
pub fn is_terminal_status(status: &str) -> bool {
    let status = status.trim();
    TERMINAL_STATES
        .iter()
        .any(|terminal| terminal.eq_ignore_ascii_case(status))
}

/// Processing counters reported by the remote.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskProgress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub succeeded: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed: Option<u64>,
}

/// A task id with its last known remote state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedTask {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_known_status: Option<String>,

    #[serde(default)]
    pub completed: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,

    /// Position in the remote queue, when reported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<TaskProgress>,
}

impl TrackedTask {
    /// A freshly observed task, seeded with [`INITIAL_STATUS`].
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            last_known_status: Some(INITIAL_STATUS.to_string()),
            completed: false,
            updated_at: None,
            position: None,
            progress: None,
        }
    }

    /// Apply a successful status response.
    ///
    /// `completed` only ever goes from false to true.
    pub fn apply(&mut self, resp: &TaskStatusResponse, now: DateTime<Utc>) {
        self.completed = self.completed || is_terminal_status(&resp.task_status);
        self.last_known_status = Some(resp.task_status.clone());
        self.position = resp.task_position;
        if let Some(meta) = &resp.task_meta {
            self.progress = Some(TaskProgress {
                total: meta.num_docs,
                processed: meta.num_processed,
                succeeded: meta.num_succeeded,
                failed: meta.num_failed,
            });
        }
        self.updated_at = Some(now);
    }

    pub fn status_label(&self) -> &str {
        self.last_known_status.as_deref().unwrap_or("unknown")
    }
}

/// Ordered set of tracked tasks keyed by id.
#[derive(Debug, Clone, Default)]
pub struct TaskSet {
    tasks: Vec<TrackedTask>,
    index: HashMap<String, usize>,
}

impl TaskSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from a list, keeping the first occurrence of each id.
    pub fn from_tasks(tasks: impl IntoIterator<Item = TrackedTask>) -> Self {
        let mut set = Self::new();
        for task in tasks {
            set.insert_task(task);
        }
        set
    }

    /// Track a new id. Returns false (and changes nothing) for a blank or
    /// already tracked id.
    pub fn insert(&mut self, id: &str) -> bool {
        let id = id.trim();
        if id.is_empty() {
            return false;
        }
        self.insert_task(TrackedTask::new(id))
    }

    /// Insert a full record unless its id is already tracked.
    pub fn insert_task(&mut self, task: TrackedTask) -> bool {
        if self.index.contains_key(&task.id) {
            return false;
        }
        self.index.insert(task.id.clone(), self.tasks.len());
        self.tasks.push(task);
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&TrackedTask> {
        self.index.get(id).map(|&i| &self.tasks[i])
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut TrackedTask> {
        match self.index.get(id) {
            Some(&i) => Some(&mut self.tasks[i]),
            None => None,
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Tasks in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &TrackedTask> {
        self.tasks.iter()
    }

    pub fn as_slice(&self) -> &[TrackedTask] {
        &self.tasks
    }

    /// Ids of tasks that still need polling, in insertion order.
    pub fn incomplete_ids(&self) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|t| !t.completed)
            .map(|t| t.id.clone())
            .collect()
    }

    /// Number of tasks not yet completed.
    pub fn active_count(&self) -> usize {
        self.tasks.iter().filter(|t| !t.completed).count()
    }

    /// Drop completed tasks. Returns how many were removed.
    pub fn clear_completed(&mut self) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|t| !t.completed);
        self.reindex();
        before - self.tasks.len()
    }

    fn reindex(&mut self) {
        self.index = self
            .tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id.clone(), i))
            .collect();
    }
}
