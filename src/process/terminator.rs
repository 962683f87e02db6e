//! Escalating shutdown of the service process.
//!
//! SIGTERM first, then SIGINT, then SIGKILL, each tier bounded in time. A
//! `pkill -f` pass runs at the end so helpers the service forked into their
//! own sessions do not outlive it.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::config::TerminationConfig;

use super::ProcessHandle;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Which step of the protocol ended the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationTier {
    /// It was gone before anything was sent.
    AlreadyExited,
    Term,
    Interrupt,
    Kill,
}

impl fmt::Display for TerminationTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationTier::AlreadyExited => write!(f, "already exited"),
            TerminationTier::Term => write!(f, "SIGTERM"),
            TerminationTier::Interrupt => write!(f, "SIGINT"),
            TerminationTier::Kill => write!(f, "SIGKILL"),
        }
    }
}

/// Timings of the escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminationPolicy {
    /// How long to wait after SIGTERM
    pub grace: Duration,
    /// How long to wait after SIGINT
    pub interrupt_wait: Duration,
    /// Liveness poll period during the grace window
    pub poll: Duration,
}

impl Default for TerminationPolicy {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(2),
            interrupt_wait: Duration::from_millis(500),
            poll: Duration::from_millis(50),
        }
    }
}

impl TerminationPolicy {
    pub fn from_config(config: &TerminationConfig) -> Self {
        Self {
            grace: Duration::from_millis(config.grace_ms),
            interrupt_wait: Duration::from_millis(config.interrupt_ms),
            poll: Duration::from_millis(config.poll_ms.max(1)),
        }
    }
}

/// Drives a process to exit.
///
/// Implementations run off the owner loop; they only read the handle.
pub trait Terminator: Send + Sync + fmt::Debug {
    /// Run the full protocol. Returns once the last tier has been sent; the
    /// caller still waits for the exit to be observed.
    fn terminate<'a>(
        &'a self,
        handle: &'a ProcessHandle,
        pattern: Option<&'a str>,
    ) -> BoxFuture<'a, TerminationTier>;

    /// Pattern-based kill alone, for processes we hold no handle to.
    fn kill_orphans<'a>(&'a self, pattern: &'a str) -> BoxFuture<'a, ()>;
}

/// The terminator for this platform.
pub fn default_terminator(policy: TerminationPolicy) -> Arc<dyn Terminator> {
    #[cfg(unix)]
    {
        Arc::new(UnixTerminator::new(policy))
    }
    #[cfg(not(unix))]
    {
        Arc::new(KillTerminator::new(policy))
    }
}

/// Poll `handle` until it exits or `deadline` passes.
async fn exited_within(handle: &ProcessHandle, deadline: Duration, poll: Duration) -> bool {
    let start = tokio::time::Instant::now();
    loop {
        if !handle.is_running() {
            return true;
        }
        let elapsed = start.elapsed();
        if elapsed >= deadline {
            return false;
        }
        let step = poll.min(deadline - elapsed);
        // Wake early on exit instead of sleeping the full step.
        if handle.wait_exit_timeout(step).await {
            return true;
        }
    }
}

#[cfg(unix)]
pub use unix::UnixTerminator;

#[cfg(unix)]
mod unix {
    use super::*;
    use std::process::Stdio;

    /// POSIX signals to the child's process group.
    #[derive(Debug, Clone)]
    pub struct UnixTerminator {
        policy: TerminationPolicy,
    }

    impl UnixTerminator {
        pub fn new(policy: TerminationPolicy) -> Self {
            Self { policy }
        }

        async fn run(&self, handle: &ProcessHandle, pattern: Option<&str>) -> TerminationTier {
            let tier = self.escalate(handle).await;
            if let Some(pattern) = pattern {
                pkill(pattern).await;
            }
            tier
        }

        async fn escalate(&self, handle: &ProcessHandle) -> TerminationTier {
            if !handle.is_running() {
                return TerminationTier::AlreadyExited;
            }
            let pid = handle.pid();

            if !signal_group(pid, libc::SIGTERM) {
                return TerminationTier::AlreadyExited;
            }
            if exited_within(handle, self.policy.grace, self.policy.poll).await {
                return TerminationTier::Term;
            }
            debug!(pid, "no exit after SIGTERM, sending SIGINT");

            signal_group(pid, libc::SIGINT);
            if exited_within(handle, self.policy.interrupt_wait, self.policy.poll).await {
                return TerminationTier::Interrupt;
            }
            debug!(pid, "no exit after SIGINT, sending SIGKILL");

            signal_group(pid, libc::SIGKILL);
            TerminationTier::Kill
        }
    }

    impl Terminator for UnixTerminator {
        fn terminate<'a>(
            &'a self,
            handle: &'a ProcessHandle,
            pattern: Option<&'a str>,
        ) -> BoxFuture<'a, TerminationTier> {
            Box::pin(self.run(handle, pattern))
        }

        fn kill_orphans<'a>(&'a self, pattern: &'a str) -> BoxFuture<'a, ()> {
            Box::pin(pkill(pattern))
        }
    }

    /// Signal the process group led by `pid`, falling back to the pid itself.
    /// Returns false when neither exists.
    fn signal_group(pid: u32, signal: libc::c_int) -> bool {
        let Ok(pid_i32) = i32::try_from(pid) else {
            return false;
        };
        if pid_i32 <= 0 {
            return false;
        }

        if unsafe { libc::kill(-pid_i32, signal) } == 0 {
            return true;
        }
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            debug!(pid, signal, error = %err, "failed to signal process group");
        }

        if unsafe { libc::kill(pid_i32, signal) } == 0 {
            return true;
        }
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            debug!(pid, signal, error = %err, "failed to signal process");
        }
        false
    }

    async fn pkill(pattern: &str) {
        if pattern.trim().is_empty() {
            return;
        }
        let status = tokio::process::Command::new("pkill")
            .arg("-f")
            .arg(pattern)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match status {
            // 1 means nothing matched.
            Ok(status) if status.success() => debug!(pattern, "pkill matched processes"),
            Ok(_) => {}
            Err(e) => debug!(pattern, error = %e, "pkill unavailable"),
        }
    }
}

/// Fallback for platforms without POSIX signals: kill the child directly.
#[cfg(not(unix))]
#[derive(Debug, Clone)]
pub struct KillTerminator {
    policy: TerminationPolicy,
}

#[cfg(not(unix))]
impl KillTerminator {
    pub fn new(policy: TerminationPolicy) -> Self {
        Self { policy }
    }
}

#[cfg(not(unix))]
impl Terminator for KillTerminator {
    fn terminate<'a>(
        &'a self,
        handle: &'a ProcessHandle,
        _pattern: Option<&'a str>,
    ) -> BoxFuture<'a, TerminationTier> {
        Box::pin(async move {
            if !handle.is_running() {
                return TerminationTier::AlreadyExited;
            }
            handle.request_kill();
            exited_within(handle, self.policy.grace, self.policy.poll).await;
            TerminationTier::Kill
        })
    }

    fn kill_orphans<'a>(&'a self, _pattern: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async {})
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::process::{watch_child, ProcessEvent};
    use serial_test::serial;
    use std::process::Stdio;
    use tokio::sync::mpsc;

    fn fast_policy() -> TerminationPolicy {
        TerminationPolicy {
            grace: Duration::from_millis(300),
            interrupt_wait: Duration::from_millis(200),
            poll: Duration::from_millis(20),
        }
    }

    fn spawn_sh(script: &str) -> (ProcessHandle, mpsc::UnboundedReceiver<ProcessEvent>) {
        let child = tokio::process::Command::new("/bin/sh")
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        (watch_child(child, 1, tx), rx)
    }

    #[test]
    fn test_policy_from_config() {
        let policy = TerminationPolicy::from_config(&TerminationConfig {
            grace_ms: 1000,
            interrupt_ms: 100,
            poll_ms: 0,
        });
        assert_eq!(policy.grace, Duration::from_secs(1));
        assert_eq!(policy.interrupt_wait, Duration::from_millis(100));
        assert_eq!(policy.poll, Duration::from_millis(1));
    }

    #[tokio::test]
    #[serial]
    async fn test_sigterm_is_enough_for_cooperative_process() {
        let (handle, _rx) = spawn_sh("sleep 30");
        let terminator = UnixTerminator::new(fast_policy());

        let tier = terminator.terminate(&handle, None).await;
        assert_eq!(tier, TerminationTier::Term);
        assert!(!handle.is_running());
    }

    #[tokio::test]
    #[serial]
    async fn test_escalates_past_ignored_term_and_int() {
        // Ignore TERM and INT in both the shell and its child.
        let (handle, _rx) = spawn_sh("trap '' TERM INT; echo ready; sleep 30");
        let terminator = UnixTerminator::new(fast_policy());
        tokio::time::sleep(Duration::from_millis(100)).await;

        let tier = terminator.terminate(&handle, None).await;
        assert_eq!(tier, TerminationTier::Kill);

        let exit = tokio::time::timeout(Duration::from_secs(5), handle.wait_exit())
            .await
            .unwrap();
        assert_eq!(exit.signal, Some(libc::SIGKILL));
    }

    #[tokio::test]
    #[serial]
    async fn test_already_exited_is_noop() {
        let (handle, _rx) = spawn_sh("exit 0");
        handle.wait_exit().await;

        let terminator = UnixTerminator::new(fast_policy());
        let tier = terminator.terminate(&handle, None).await;
        assert_eq!(tier, TerminationTier::AlreadyExited);
    }

    #[tokio::test]
    #[serial]
    async fn test_kill_orphans_with_unmatched_pattern_returns() {
        let terminator = UnixTerminator::new(fast_policy());
        terminator
            .kill_orphans("svcwarden-no-such-process-7f3a9c")
            .await;
        terminator.kill_orphans("   ").await;
    }
}
