//! Child process lifecycle.
//!
//! [`supervisor::ProcessSupervisor`] launches the service and keeps the
//! bookkeeping; [`terminator`] drives it to exit. A spawned watcher task owns
//! the `tokio::process::Child`, forwards its combined output, and reports the
//! exit. Everything it learns is sent back as [`ProcessEvent`]s so the owner
//! loop applies it in order.

pub mod supervisor;
pub mod terminator;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout};
use tokio::sync::{mpsc, watch, Notify};

pub use supervisor::ProcessSupervisor;
pub use terminator::{default_terminator, TerminationPolicy, TerminationTier, Terminator};

/// How long to keep reading output after the child has exited.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

const READ_CHUNK: usize = 8192;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<i32>,
    /// Terminating signal, on Unix
    pub signal: Option<i32>,
}

impl ExitInfo {
    fn from_status(status: &std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }

    fn unknown() -> Self {
        Self {
            code: None,
            signal: None,
        }
    }
}

impl std::fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(sig)) => write!(f, "signal {}", sig),
            (None, None) => write!(f, "unknown exit status"),
        }
    }
}

/// What to launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRequest {
    pub command: String,
    pub working_dir: Option<PathBuf>,
}

/// Messages from process tasks back to the owner loop.
#[derive(Debug)]
pub enum ProcessEvent {
    /// A chunk of combined stdout/stderr.
    Output { run_id: u64, bytes: Vec<u8> },
    /// The child exited. Sent after its remaining output.
    Exited { run_id: u64, exit: ExitInfo },
    /// A stop finished and the process is confirmed gone.
    /// `run_id` is `None` when there was no tracked process.
    StopFinished { run_id: Option<u64> },
    /// The restart delay elapsed. `seq` is the cancellation counter at the
    /// time the restart was scheduled.
    RestartDue { seq: u64, request: StartRequest },
}

/// Reference to one run of the child.
///
/// Cloned only between the supervisor and the terminator working on its
/// behalf.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pid: u32,
    run_id: u64,
    exit: watch::Receiver<Option<ExitInfo>>,
    kill: Arc<Notify>,
}

impl ProcessHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    pub fn is_running(&self) -> bool {
        self.exit.borrow().is_none()
    }

    /// Wait until the child has exited.
    pub async fn wait_exit(&self) -> ExitInfo {
        let mut rx = self.exit.clone();
        match rx.wait_for(|e| e.is_some()).await {
            Ok(exit) => (*exit).unwrap_or_else(ExitInfo::unknown),
            // Watcher gone without reporting; the child is no longer ours.
            Err(_) => ExitInfo::unknown(),
        }
    }

    /// Wait up to `timeout` for the child to exit.
    pub async fn wait_exit_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait_exit()).await.is_ok()
    }

    /// Ask the watcher to kill the child directly (no signal escalation).
    pub fn request_kill(&self) {
        self.kill.notify_one();
    }
}

/// Hand a freshly spawned child to a watcher task and return its handle.
pub(crate) fn watch_child(
    mut child: Child,
    run_id: u64,
    events: mpsc::UnboundedSender<ProcessEvent>,
) -> ProcessHandle {
    let pid = child.id().unwrap_or_default();
    let stdout = child.stdout.take();
    let (exit_tx, exit_rx) = watch::channel(None);
    let kill = Arc::new(Notify::new());

    let handle = ProcessHandle {
        pid,
        run_id,
        exit: exit_rx,
        kill: kill.clone(),
    };

    tokio::spawn(async move {
        let mut stdout = stdout;
        let mut buf = vec![0u8; READ_CHUNK];

        let status = loop {
            tokio::select! {
                read = read_some(&mut stdout, &mut buf) => match read {
                    Some(n) => {
                        let _ = events.send(ProcessEvent::Output { run_id, bytes: buf[..n].to_vec() });
                    }
                    None => stdout = None,
                },
                status = child.wait() => break status,
                _ = kill.notified() => {
                    if let Err(e) = child.start_kill() {
                        tracing::debug!(pid, error = %e, "kill request failed");
                    }
                }
            }
        };

        let exit = match status {
            Ok(status) => ExitInfo::from_status(&status),
            Err(e) => {
                tracing::warn!(pid, error = %e, "failed to wait for service process");
                ExitInfo::unknown()
            }
        };
        exit_tx.send_replace(Some(exit));

        // Orphaned descendants may keep the pipe open; don't wait on them forever.
        if stdout.is_some() {
            let _ = tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, async {
                while let Some(n) = read_some(&mut stdout, &mut buf).await {
                    let _ = events.send(ProcessEvent::Output {
                        run_id,
                        bytes: buf[..n].to_vec(),
                    });
                }
            })
            .await;
        }

        let _ = events.send(ProcessEvent::Exited { run_id, exit });
    });

    handle
}

/// Read one chunk. `None` at EOF, on error, or when there is no pipe (in
/// which case it never resolves).
async fn read_some(stdout: &mut Option<ChildStdout>, buf: &mut [u8]) -> Option<usize> {
    match stdout {
        Some(pipe) => match pipe.read(buf).await {
            Ok(0) | Err(_) => None,
            Ok(n) => Some(n),
        },
        None => std::future::pending().await,
    }
}
