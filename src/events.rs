//! Events published by the monitor.
//!
//! [`Bus`] wraps a [`tokio::sync::broadcast`] channel. Only the monitor loop
//! publishes, so every subscriber sees events in the order they were applied.
//! Slow subscribers get `RecvError::Lagged` and skip the oldest events.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::process::ExitInfo;
use crate::status::ServiceStatus;

/// Where a log line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    /// The child's combined output
    Service,
    /// The monitor itself (spawn failures and the like)
    Supervisor,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MonitorEvent {
    StatusChanged {
        status: ServiceStatus,
    },
    LogLine {
        source: LogSource,
        line: String,
    },
    TaskDiscovered {
        task_id: String,
    },
    /// A poll cycle was merged and saved.
    TasksUpdated {
        active: usize,
        total: usize,
        newly_completed: Vec<String>,
    },
    ProcessExited {
        run_id: u64,
        code: Option<i32>,
        signal: Option<i32>,
    },
    StopCompleted,
}

impl MonitorEvent {
    pub(crate) fn exited(run_id: u64, exit: ExitInfo) -> Self {
        MonitorEvent::ProcessExited {
            run_id,
            code: exit.code,
            signal: exit.signal,
        }
    }
}

/// Broadcast channel for monitor events.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<MonitorEvent>,
}

impl Bus {
    /// Capacity is shared by all receivers and clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Never blocks; the event is dropped when nobody listens.
    pub fn publish(&self, event: MonitorEvent) {
        let _ = self.tx.send(event);
    }

    /// A receiver sees only events sent after it subscribed.
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.tx.subscribe()
    }
}
