//! svcwarden: supervise one long-running service and reconcile its process
//! state with what its HTTP API reports.
//!
//! The pieces, leaves first:
//! - [`lines`] turns raw child output into lines
//! - [`tasks`] finds task ids in those lines, tracks their remote status and
//!   persists them
//! - [`remote`] talks to the service's health and task status endpoints
//! - [`process`] starts the service and stops it with escalating signals
//! - [`health`] drives periodic probing
//! - [`status`] folds process and health signals into one [`ServiceStatus`]
//! - [`monitor`] owns all of the above in one task and publishes [`events`]

pub mod config;
pub mod error;
pub mod events;
pub mod health;
pub mod lines;
pub mod logging;
pub mod monitor;
pub mod process;
pub mod remote;
pub mod status;
pub mod tasks;

pub use config::Config;
pub use error::{StoreError, SupervisorError};
pub use events::{Bus, LogSource, MonitorEvent};
pub use lines::LineAssembler;
pub use monitor::{Monitor, MonitorHandle, MonitorSettings, Snapshot};
pub use remote::{RemoteClient, TaskStatusResponse};
pub use status::{Lifecycle, ServiceStatus, StatusReconciler};
pub use tasks::{extract_task_ids, TaskSet, TaskStore, TaskTracker, TrackedTask};
