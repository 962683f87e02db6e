//! Start/stop/restart bookkeeping for the one supervised child.
//!
//! The supervisor is owned by the monitor loop and never blocks: spawning is
//! synchronous, while termination and restart delays run on spawned tasks
//! that report back through [`ProcessEvent`]s.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::{Result, SupervisorError};
use crate::status::Lifecycle;

use super::terminator::Terminator;
use super::{watch_child, ProcessEvent, ProcessHandle, StartRequest};

const SHELL: &str = "/bin/sh";

pub struct ProcessSupervisor {
    lifecycle: Lifecycle,
    handle: Option<ProcessHandle>,
    next_run_id: u64,
    terminator: Arc<dyn Terminator>,
    kill_pattern: Option<String>,
    restart_delay: Duration,
    /// Bumped by an explicit stop; scheduled restarts from before are dropped.
    restart_seq: u64,
    /// A restart whose delay elapsed while the stop was still running.
    pending_start: Option<StartRequest>,
    /// Terminator tasks that have not reported back yet. Their `pkill` pass
    /// may still be ahead of them.
    stops_in_flight: usize,
    events: mpsc::UnboundedSender<ProcessEvent>,
}

impl std::fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("lifecycle", &self.lifecycle)
            .field("pid", &self.pid())
            .field("kill_pattern", &self.kill_pattern)
            .field("restart_delay", &self.restart_delay)
            .finish_non_exhaustive()
    }
}

impl ProcessSupervisor {
    pub fn new(
        terminator: Arc<dyn Terminator>,
        kill_pattern: Option<String>,
        restart_delay: Duration,
        events: mpsc::UnboundedSender<ProcessEvent>,
    ) -> Self {
        Self {
            lifecycle: Lifecycle::Offline,
            handle: None,
            next_run_id: 1,
            terminator,
            kill_pattern,
            restart_delay,
            restart_seq: 0,
            pending_start: None,
            stops_in_flight: 0,
            events,
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Whether the tracked child is alive right now.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| h.is_running())
    }

    pub fn pid(&self) -> Option<u32> {
        self.handle.as_ref().map(|h| h.pid())
    }

    pub fn run_id(&self) -> Option<u64> {
        self.handle.as_ref().map(|h| h.run_id())
    }

    /// Whether a stop has yet to report back, even if the child it was
    /// for is already gone. A start issued now could be caught by its
    /// `pkill` pass.
    pub fn stop_in_flight(&self) -> bool {
        self.stops_in_flight > 0
    }

    /// Launch the service. Returns the new run id, or `None` when a child is
    /// already running.
    pub fn start(&mut self, command: &str, working_dir: Option<&Path>) -> Result<Option<u64>> {
        if self.is_running() {
            debug!(pid = ?self.pid(), "service already running, ignoring start");
            return Ok(None);
        }

        let mut cmd = Command::new(SHELL);
        cmd.arg("-c")
            .arg(shell_command_line(command))
            .stdin(Stdio::null())
            .stdout(Stdio::piped());
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                self.lifecycle = Lifecycle::Offline;
                return Err(SupervisorError::Spawn {
                    command: command.to_string(),
                    source,
                });
            }
        };

        let run_id = self.next_run_id;
        self.next_run_id += 1;
        let handle = watch_child(child, run_id, self.events.clone());
        info!(pid = handle.pid(), run_id, command, "service started");
        self.handle = Some(handle);
        self.lifecycle = Lifecycle::Starting;
        Ok(Some(run_id))
    }

    /// Stop the service and cancel any scheduled restart.
    ///
    /// Completion arrives later as [`ProcessEvent::StopFinished`], only after
    /// the exit has been observed. Returns false when a stop was already in
    /// progress and nothing new was scheduled.
    pub fn stop(&mut self) -> bool {
        self.restart_seq += 1;
        self.pending_start = None;
        self.begin_stop()
    }

    fn begin_stop(&mut self) -> bool {
        let pattern = self.kill_pattern.clone();
        let terminator = self.terminator.clone();
        let events = self.events.clone();

        let Some(handle) = self.handle.clone() else {
            // Nothing tracked, but a previous instance may still be around.
            self.stops_in_flight += 1;
            tokio::spawn(async move {
                if let Some(pattern) = pattern {
                    terminator.kill_orphans(&pattern).await;
                }
                let _ = events.send(ProcessEvent::StopFinished { run_id: None });
            });
            return true;
        };

        if self.lifecycle == Lifecycle::Stopping {
            debug!(run_id = handle.run_id(), "stop already in progress");
            return false;
        }

        self.lifecycle = Lifecycle::Stopping;
        self.stops_in_flight += 1;
        info!(pid = handle.pid(), run_id = handle.run_id(), "stopping service");
        tokio::spawn(async move {
            let tier = terminator.terminate(&handle, pattern.as_deref()).await;
            let exit = handle.wait_exit().await;
            debug!(run_id = handle.run_id(), %tier, %exit, "stop confirmed");
            let _ = events.send(ProcessEvent::StopFinished {
                run_id: Some(handle.run_id()),
            });
        });
        true
    }

    /// Stop, then start again after the restart delay.
    ///
    /// The start never happens before the stop has been confirmed.
    pub fn restart(&mut self, command: &str, working_dir: Option<PathBuf>) {
        self.begin_stop();

        let seq = self.restart_seq;
        let delay = self.restart_delay;
        let events = self.events.clone();
        let request = StartRequest {
            command: command.to_string(),
            working_dir,
        };
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(ProcessEvent::RestartDue { seq, request });
        });
    }

    /// The restart delay elapsed. Returns the request to start now, if any.
    pub fn on_restart_due(&mut self, seq: u64, request: StartRequest) -> Option<StartRequest> {
        if seq != self.restart_seq {
            debug!("restart cancelled by a later stop");
            return None;
        }
        if self.stop_in_flight() {
            debug!("restart delay elapsed before stop finished, deferring start");
            self.pending_start = Some(request);
            return None;
        }
        Some(request)
    }

    /// The child exited. Returns true if this settled the current run.
    pub fn on_exited(&mut self, run_id: u64) -> bool {
        self.settle(run_id)
    }

    /// A stop finished. Returns a deferred restart to start now, if any.
    pub fn on_stop_finished(&mut self, run_id: Option<u64>) -> Option<StartRequest> {
        self.stops_in_flight = self.stops_in_flight.saturating_sub(1);
        match run_id {
            Some(run_id) => {
                self.settle(run_id);
            }
            None if self.handle.is_none() => self.lifecycle = Lifecycle::Offline,
            None => {}
        }
        if self.stop_in_flight() {
            return None;
        }
        self.pending_start.take()
    }

    /// Force `Offline` once per run.
    fn settle(&mut self, run_id: u64) -> bool {
        if self.run_id() != Some(run_id) {
            return false;
        }
        self.handle = None;
        self.lifecycle = Lifecycle::Offline;
        true
    }
}

/// Script handed to `/bin/sh -c`: stderr folded into stdout, then the
/// command. An existing file path is quoted so spaces survive; anything else
/// is taken as a shell command line.
pub fn shell_command_line(command: &str) -> String {
    let command = command.trim();
    if Path::new(command).is_file() {
        format!("exec 2>&1; {}", shell_quote(command))
    } else {
        format!("exec 2>&1; {}", command)
    }
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
