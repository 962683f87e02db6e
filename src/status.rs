//! User-facing service status.
//!
//! Two signals feed the status: what the process supervisor knows about its
//! child, and whether the health endpoint answered. A reachable endpoint
//! always wins, so a service started outside the supervisor still shows up
//! as online.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Offline,
    Starting,
    Online,
    Stopping,
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceStatus::Offline => write!(f, "offline"),
            ServiceStatus::Starting => write!(f, "starting"),
            ServiceStatus::Online => write!(f, "online"),
            ServiceStatus::Stopping => write!(f, "stopping"),
        }
    }
}

/// What the supervisor itself knows. It never claims `Online`; only the
/// health probe can.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Offline,
    Starting,
    Stopping,
}

/// Signals the reconciler combines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signals {
    pub lifecycle: Lifecycle,
    pub running: bool,
    pub reachable: bool,
}

/// Apply the precedence rules:
/// reachable > stopping > running-but-unreachable > offline.
pub fn reconcile(signals: Signals) -> ServiceStatus {
    if signals.reachable {
        ServiceStatus::Online
    } else if signals.lifecycle == Lifecycle::Stopping {
        ServiceStatus::Stopping
    } else if signals.running {
        ServiceStatus::Starting
    } else {
        ServiceStatus::Offline
    }
}

/// Tracks the last published status and reports only real changes.
#[derive(Debug)]
pub struct StatusReconciler {
    current: ServiceStatus,
}

impl Default for StatusReconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusReconciler {
    pub fn new() -> Self {
        Self {
            current: ServiceStatus::Offline,
        }
    }

    pub fn current(&self) -> ServiceStatus {
        self.current
    }

    /// Recompute from the latest signals. Returns the new status if it changed.
    pub fn update(&mut self, signals: Signals) -> Option<ServiceStatus> {
        let next = reconcile(signals);
        if next == self.current {
            return None;
        }
        self.current = next;
        Some(next)
    }
}
