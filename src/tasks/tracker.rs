//! Poll-cycle bookkeeping for tracked tasks.
//!
//! A cycle fans out one status request per incomplete task and only merges
//! the results once every request has resolved. Failed requests leave the
//! task's last known state in place. The merged set is saved before the
//! summary is handed back, so observers never see a half-applied cycle.

use chrono::{DateTime, Utc};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{StoreError, SupervisorError};
use crate::remote::{RemoteClient, TaskStatusResponse};

use super::scan::extract_task_ids;
use super::{TaskSet, TaskStore};

/// Outcome of one status request.
#[derive(Debug)]
pub struct PollResult {
    pub task_id: String,
    pub outcome: Result<TaskStatusResponse, SupervisorError>,
}

/// Everything a cycle produced, once all requests have resolved.
#[derive(Debug, Default)]
pub struct CycleResults {
    pub results: Vec<PollResult>,
    /// Requests whose task panicked or was aborted; counted as failures.
    pub lost: usize,
}

impl CycleResults {
    pub fn outcomes(&self) -> usize {
        self.results.len() + self.lost
    }
}

/// Result of applying a cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub polled: usize,
    pub updated: usize,
    pub failed: usize,
    /// Ids that reached a terminal state in this cycle
    pub newly_completed: Vec<String>,
    pub active: usize,
    pub persisted: bool,
}

/// Fetch the status of every id concurrently and wait for all of them.
pub async fn run_cycle(client: &RemoteClient, ids: Vec<String>) -> CycleResults {
    let mut set = JoinSet::new();
    for id in ids {
        let client = client.clone();
        set.spawn(async move {
            let outcome = client.task_status(&id).await;
            PollResult {
                task_id: id,
                outcome,
            }
        });
    }

    let mut cycle = CycleResults::default();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(result) => cycle.results.push(result),
            Err(e) => {
                warn!(error = %e, "task status request did not complete");
                cycle.lost += 1;
            }
        }
    }
    cycle
}

/// Owns the tracked task set and its store.
#[derive(Debug)]
pub struct TaskTracker {
    tasks: TaskSet,
    store: Option<TaskStore>,
    cycle_in_flight: bool,
}

impl TaskTracker {
    pub fn new(tasks: TaskSet, store: Option<TaskStore>) -> Self {
        Self {
            tasks,
            store,
            cycle_in_flight: false,
        }
    }

    /// Tracker backed by a store, starting from whatever it holds.
    pub fn load(store: TaskStore) -> Result<Self, StoreError> {
        let tasks = store.load()?;
        Ok(Self::new(tasks, Some(store)))
    }

    /// Tracker with no persistence.
    pub fn in_memory() -> Self {
        Self::new(TaskSet::new(), None)
    }

    pub fn tasks(&self) -> &TaskSet {
        &self.tasks
    }

    pub fn active_count(&self) -> usize {
        self.tasks.active_count()
    }

    pub fn cycle_in_flight(&self) -> bool {
        self.cycle_in_flight
    }

    /// Manually track an id. Duplicates are ignored.
    pub fn add(&mut self, id: &str) -> bool {
        if !self.tasks.insert(id) {
            return false;
        }
        info!(task_id = id.trim(), "tracking task");
        self.persist();
        true
    }

    /// Scan one output line and track any new ids it mentions.
    pub fn observe_line(&mut self, line: &str) -> Vec<String> {
        let mut added = Vec::new();
        for id in extract_task_ids(line) {
            if self.tasks.insert(id) {
                info!(task_id = id, "discovered task in service output");
                added.push(id.to_string());
            }
        }
        if !added.is_empty() {
            self.persist();
        }
        added
    }

    /// Drop completed tasks and persist.
    pub fn clear_completed(&mut self) -> usize {
        let removed = self.tasks.clear_completed();
        if removed > 0 {
            self.persist();
        }
        removed
    }

    /// Claim the next cycle. Returns the ids to poll, or `None` when a cycle
    /// is already running or nothing is incomplete.
    pub fn begin_cycle(&mut self) -> Option<Vec<String>> {
        if self.cycle_in_flight {
            debug!("previous task cycle still running, skipping tick");
            return None;
        }
        let ids = self.tasks.incomplete_ids();
        if ids.is_empty() {
            return None;
        }
        self.cycle_in_flight = true;
        Some(ids)
    }

    /// Forget a claimed cycle without applying it (polling was stopped).
    pub fn abandon_cycle(&mut self) {
        self.cycle_in_flight = false;
    }

    /// Merge a finished cycle into the set and persist it.
    pub fn finish_cycle(&mut self, cycle: CycleResults, now: DateTime<Utc>) -> CycleSummary {
        self.cycle_in_flight = false;

        let mut summary = CycleSummary {
            polled: cycle.outcomes(),
            failed: cycle.lost,
            ..CycleSummary::default()
        };

        for result in cycle.results {
            match result.outcome {
                Ok(resp) => {
                    let Some(task) = self.tasks.get_mut(&result.task_id) else {
                        // Cleared while the request was in flight.
                        continue;
                    };
                    let was_completed = task.completed;
                    task.apply(&resp, now);
                    summary.updated += 1;
                    if task.completed && !was_completed {
                        summary.newly_completed.push(task.id.clone());
                    }
                }
                Err(e) => {
                    debug!(task_id = %result.task_id, error = %e, "task status unavailable");
                    summary.failed += 1;
                }
            }
        }

        summary.persisted = self.persist();
        summary.active = self.tasks.active_count();
        summary
    }

    fn persist(&self) -> bool {
        let Some(store) = &self.store else {
            return true;
        };
        match store.save(&self.tasks) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "failed to save tracked tasks");
                false
            }
        }
    }
}
