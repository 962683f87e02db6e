//! The owner loop.
//!
//! [`Monitor::spawn`] starts a single tokio task that owns the supervisor,
//! the poller, the task tracker and the status reconciler. Callers talk to it
//! through a [`MonitorHandle`] (commands in) and the event [`Bus`] (events
//! out). Process watchers, probes, poll cycles and the terminator all run on
//! their own tasks and report back over channels, so nothing here blocks and
//! nothing needs a lock.
//!
//! ```text
//!  MonitorHandle ──commands──┐
//!  process tasks ──events────┼──► monitor loop ──► Bus ──► subscribers
//!  ticker/probes ──signals───┤
//!  poll cycles ────results───┘
//! ```
//!
//! Two counters keep late results from overwriting newer state. The lifecycle
//! epoch changes on every start, stop and exit; a probe issued under an older
//! epoch is dropped. The polling generation changes whenever polling is
//! started or stopped; ticks, probes and cycles from an older generation are
//! dropped.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Result, SupervisorError};
use crate::events::{Bus, LogSource, MonitorEvent};
use crate::health::{HealthPoller, PollSignal};
use crate::lines::LineAssembler;
use crate::process::{
    default_terminator, ProcessEvent, ProcessSupervisor, StartRequest, TerminationPolicy,
    Terminator,
};
use crate::remote::RemoteClient;
use crate::status::{Lifecycle, ServiceStatus, Signals, StatusReconciler};
use crate::tasks::{run_cycle, CycleResults, TaskTracker, TrackedTask};

const COMMAND_CAPACITY: usize = 64;
const DEFAULT_BUS_CAPACITY: usize = 1024;

/// Everything the monitor needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub command: Option<String>,
    pub working_dir: Option<PathBuf>,
    pub kill_pattern: Option<String>,
    pub restart_delay: Duration,
    pub poll_interval: Duration,
    pub termination: TerminationPolicy,
    pub bus_capacity: usize,
}

impl MonitorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            command: config.service.command.clone(),
            working_dir: config.service.working_dir.as_ref().map(PathBuf::from),
            kill_pattern: config.service.kill_pattern().map(str::to_string),
            restart_delay: config.service.restart_delay(),
            poll_interval: config.remote.poll_interval(),
            termination: TerminationPolicy::from_config(&config.service.termination),
            bus_capacity: DEFAULT_BUS_CAPACITY,
        }
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Point-in-time view of the monitor state.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub status: ServiceStatus,
    pub lifecycle: Lifecycle,
    pub pid: Option<u32>,
    pub reachable: bool,
    pub polling: bool,
    pub active_tasks: usize,
    pub tasks: Vec<TrackedTask>,
}

enum Command {
    Start {
        reply: oneshot::Sender<Result<Option<u64>>>,
    },
    Stop {
        done: oneshot::Sender<()>,
    },
    Restart {
        reply: oneshot::Sender<Result<()>>,
    },
    AddTask {
        id: String,
        reply: oneshot::Sender<bool>,
    },
    ClearCompleted {
        reply: oneshot::Sender<usize>,
    },
    PollNow,
    StartPolling {
        interval: Option<Duration>,
    },
    StopPolling,
    Snapshot {
        reply: oneshot::Sender<Snapshot>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// Handle to a running monitor. Cheap to clone.
///
/// When the last handle is dropped the monitor shuts down as if
/// [`MonitorHandle::shutdown`] had been called.
#[derive(Clone, Debug)]
pub struct MonitorHandle {
    tx: mpsc::Sender<Command>,
    bus: Bus,
}

impl MonitorHandle {
    async fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| SupervisorError::MonitorClosed)
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.send(make(reply)).await?;
        rx.await.map_err(|_| SupervisorError::MonitorClosed)
    }

    /// Start the configured command. `Ok(None)` if it was already running.
    pub async fn start(&self) -> Result<Option<u64>> {
        self.request(|reply| Command::Start { reply }).await?
    }

    /// Stop the service. Resolves once the exit has been observed.
    pub async fn stop(&self) -> Result<()> {
        self.request(|done| Command::Stop { done }).await
    }

    /// Stop, then start again after the restart delay. Returns immediately.
    pub async fn restart(&self) -> Result<()> {
        self.request(|reply| Command::Restart { reply }).await?
    }

    /// Track a task id by hand. False if it was already tracked.
    pub async fn add_task(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.request(|reply| Command::AddTask { id, reply }).await
    }

    /// Drop completed tasks. Returns how many were removed.
    pub async fn clear_completed(&self) -> Result<usize> {
        self.request(|reply| Command::ClearCompleted { reply }).await
    }

    /// Probe health and poll tasks now, outside the timer.
    pub async fn poll_now(&self) -> Result<()> {
        self.send(Command::PollNow).await
    }

    /// Start polling at the configured interval.
    pub async fn start_polling(&self) -> Result<()> {
        self.send(Command::StartPolling { interval: None }).await
    }

    pub async fn start_polling_every(&self, interval: Duration) -> Result<()> {
        self.send(Command::StartPolling {
            interval: Some(interval),
        })
        .await
    }

    pub async fn stop_polling(&self) -> Result<()> {
        self.send(Command::StopPolling).await
    }

    pub async fn snapshot(&self) -> Result<Snapshot> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Stop polling, stop the service if we launched one, and end the loop.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|done| Command::Shutdown { done }).await
    }

    /// Events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.bus.subscribe()
    }
}

pub struct Monitor;

impl Monitor {
    /// Spawn the monitor loop with the platform terminator. Must be called
    /// from within a tokio runtime.
    pub fn spawn(settings: MonitorSettings, client: RemoteClient, tracker: TaskTracker) -> MonitorHandle {
        let terminator = default_terminator(settings.termination);
        Self::spawn_with_terminator(settings, client, tracker, terminator)
    }

    pub fn spawn_with_terminator(
        settings: MonitorSettings,
        client: RemoteClient,
        tracker: TaskTracker,
        terminator: Arc<dyn Terminator>,
    ) -> MonitorHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (state, inbox) = MonitorLoop::new(settings, client, tracker, terminator);
        let bus = state.bus.clone();
        tokio::spawn(state.run(cmd_rx, inbox));

        MonitorHandle { tx: cmd_tx, bus }
    }
}

/// A finished poll cycle and the generation that started it.
struct CycleDone {
    generation: Option<u64>,
    results: CycleResults,
}

/// Receivers for everything the loop's own tasks report back.
struct Inbox {
    process: mpsc::UnboundedReceiver<ProcessEvent>,
    polls: mpsc::UnboundedReceiver<PollSignal>,
    cycles: mpsc::UnboundedReceiver<CycleDone>,
}

struct MonitorLoop {
    settings: MonitorSettings,
    supervisor: ProcessSupervisor,
    poller: HealthPoller,
    tracker: TaskTracker,
    client: RemoteClient,
    reconciler: StatusReconciler,
    /// Latest applied health result
    reachable: bool,
    epoch: u64,
    /// Partial output per run
    assemblers: HashMap<u64, LineAssembler>,
    /// Stop callers, keyed by the run that was tracked when they asked.
    stop_waiters: Vec<(Option<u64>, oneshot::Sender<()>)>,
    shutdown_waiters: Vec<oneshot::Sender<()>>,
    shutting_down: bool,
    finished: bool,
    cycle_tx: mpsc::UnboundedSender<CycleDone>,
    bus: Bus,
}

impl MonitorLoop {
    fn new(
        settings: MonitorSettings,
        client: RemoteClient,
        tracker: TaskTracker,
        terminator: Arc<dyn Terminator>,
    ) -> (Self, Inbox) {
        let (proc_tx, proc_rx) = mpsc::unbounded_channel();
        let (poll_tx, poll_rx) = mpsc::unbounded_channel();
        let (cycle_tx, cycle_rx) = mpsc::unbounded_channel();
        let bus = Bus::new(settings.bus_capacity);

        let supervisor = ProcessSupervisor::new(
            terminator,
            settings.kill_pattern.clone(),
            settings.restart_delay,
            proc_tx,
        );
        let poller = HealthPoller::new(client.clone(), poll_tx);

        let state = MonitorLoop {
            settings,
            supervisor,
            poller,
            tracker,
            client,
            reconciler: StatusReconciler::new(),
            reachable: false,
            epoch: 0,
            assemblers: HashMap::new(),
            stop_waiters: Vec::new(),
            shutdown_waiters: Vec::new(),
            shutting_down: false,
            finished: false,
            cycle_tx,
            bus,
        };
        let inbox = Inbox {
            process: proc_rx,
            polls: poll_rx,
            cycles: cycle_rx,
        };
        (state, inbox)
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>, mut inbox: Inbox) {
        let mut commands_open = true;
        while !self.finished {
            tokio::select! {
                command = commands.recv(), if commands_open => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        commands_open = false;
                        if !self.shutting_down {
                            debug!("all monitor handles dropped, shutting down");
                            self.begin_shutdown(None);
                        }
                    }
                },
                Some(event) = inbox.process.recv() => self.handle_process(event),
                Some(signal) = inbox.polls.recv() => self.handle_poll(signal),
                Some(done) = inbox.cycles.recv() => self.handle_cycle(done),
                else => break,
            }
        }
        debug!("monitor loop exited");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start { reply } => {
                let result = if self.shutting_down {
                    Err(SupervisorError::MonitorClosed)
                } else {
                    self.start_service()
                };
                let _ = reply.send(result);
            }
            Command::Stop { done } => {
                self.stop_waiters.push((self.supervisor.run_id(), done));
                self.stop_service();
            }
            Command::Restart { reply } => {
                let result = if self.shutting_down {
                    Err(SupervisorError::MonitorClosed)
                } else {
                    self.restart_service()
                };
                let _ = reply.send(result);
            }
            Command::AddTask { id, reply } => {
                let added = self.tracker.add(&id);
                if added {
                    self.bus.publish(MonitorEvent::TaskDiscovered {
                        task_id: id.trim().to_string(),
                    });
                }
                let _ = reply.send(added);
            }
            Command::ClearCompleted { reply } => {
                let removed = self.tracker.clear_completed();
                if removed > 0 {
                    info!(removed, "cleared completed tasks");
                }
                let _ = reply.send(removed);
            }
            Command::PollNow => {
                self.poller.spawn_probe(None, self.epoch);
                self.start_cycle(None);
            }
            Command::StartPolling { interval } => {
                if !self.shutting_down {
                    self.poller
                        .start_polling(interval.unwrap_or(self.settings.poll_interval));
                }
            }
            Command::StopPolling => self.poller.stop_polling(),
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::Shutdown { done } => self.begin_shutdown(Some(done)),
        }
    }

    fn start_service(&mut self) -> Result<Option<u64>> {
        let Some(command) = self.settings.command.clone() else {
            self.log_supervisor("cannot start: no service command configured".to_string());
            return Err(SupervisorError::NoCommand);
        };
        self.launch(StartRequest {
            command,
            working_dir: self.settings.working_dir.clone(),
        })
    }

    fn launch(&mut self, request: StartRequest) -> Result<Option<u64>> {
        let result = self
            .supervisor
            .start(&request.command, request.working_dir.as_deref());
        match &result {
            Ok(Some(run_id)) => {
                self.assemblers.insert(*run_id, LineAssembler::new());
                self.lifecycle_changed(false);
            }
            Ok(None) => {}
            Err(e) => {
                error!(error = %e, "failed to start service");
                self.log_supervisor(e.to_string());
                self.lifecycle_changed(false);
            }
        }
        result
    }

    fn stop_service(&mut self) {
        let tracked = self.supervisor.run_id().is_some();
        if self.supervisor.stop() && tracked {
            self.lifecycle_changed(true);
        }
    }

    fn restart_service(&mut self) -> Result<()> {
        let Some(command) = self.settings.command.clone() else {
            self.log_supervisor("cannot restart: no service command configured".to_string());
            return Err(SupervisorError::NoCommand);
        };
        let tracked = self.supervisor.run_id().is_some();
        info!(delay = ?self.settings.restart_delay, "restarting service");
        self.supervisor
            .restart(&command, self.settings.working_dir.clone());
        if tracked {
            self.lifecycle_changed(true);
        }
        Ok(())
    }

    fn begin_shutdown(&mut self, done: Option<oneshot::Sender<()>>) {
        self.shutting_down = true;
        self.shutdown_waiters.extend(done);
        self.poller.stop_polling();
        if self.supervisor.run_id().is_some() {
            self.stop_service();
        } else {
            self.finish();
        }
    }

    fn finish(&mut self) {
        self.finished = true;
        for (_, done) in self.stop_waiters.drain(..) {
            let _ = done.send(());
        }
        for done in self.shutdown_waiters.drain(..) {
            let _ = done.send(());
        }
    }

    fn handle_process(&mut self, event: ProcessEvent) {
        match event {
            ProcessEvent::Output { run_id, bytes } => {
                let lines = self.assemblers.entry(run_id).or_default().feed(&bytes);
                for line in lines {
                    self.emit_line(line);
                }
            }
            ProcessEvent::Exited { run_id, exit } => {
                if let Some(line) = self
                    .assemblers
                    .remove(&run_id)
                    .and_then(|mut assembler| assembler.finish())
                {
                    self.emit_line(line);
                }
                if exit.code == Some(0) {
                    info!(run_id, %exit, "service exited");
                } else {
                    warn!(run_id, %exit, "service exited");
                }
                self.bus.publish(MonitorEvent::exited(run_id, exit));
                if self.supervisor.on_exited(run_id) {
                    self.lifecycle_changed(true);
                }
            }
            ProcessEvent::StopFinished { run_id } => {
                let before = self.supervisor.lifecycle();
                let pending = self.supervisor.on_stop_finished(run_id);
                if self.supervisor.lifecycle() != before {
                    self.lifecycle_changed(true);
                }

                // Whatever run these callers asked about is gone now, even
                // if a newer one has been started since.
                let (done, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.stop_waiters)
                    .into_iter()
                    .partition(|(waited_on, _)| *waited_on == run_id);
                self.stop_waiters = waiting;
                for (_, done) in done {
                    let _ = done.send(());
                }
                self.bus.publish(MonitorEvent::StopCompleted);

                let settled = !self.supervisor.is_running()
                    && self.supervisor.lifecycle() != Lifecycle::Stopping;
                if settled && self.shutting_down {
                    self.finish();
                    return;
                }

                if let Some(request) = pending {
                    let _ = self.launch(request);
                }
            }
            ProcessEvent::RestartDue { seq, request } => {
                if self.shutting_down {
                    return;
                }
                if let Some(request) = self.supervisor.on_restart_due(seq, request) {
                    let _ = self.launch(request);
                }
            }
        }
    }

    /// One complete line of child output.
    fn emit_line(&mut self, line: String) {
        let line = match line.strip_suffix('\r') {
            Some(stripped) => stripped.to_string(),
            None => line,
        };
        info!(target: "svcwarden::child", "{}", line);
        let discovered = self.tracker.observe_line(&line);
        self.bus.publish(MonitorEvent::LogLine {
            source: LogSource::Service,
            line,
        });
        for task_id in discovered {
            self.bus.publish(MonitorEvent::TaskDiscovered { task_id });
        }
    }

    fn log_supervisor(&self, line: String) {
        self.bus.publish(MonitorEvent::LogLine {
            source: LogSource::Supervisor,
            line,
        });
    }

    fn handle_poll(&mut self, signal: PollSignal) {
        match signal {
            PollSignal::Tick { generation } => {
                if !self.poller.is_current(generation) {
                    return;
                }
                self.poller.spawn_probe(Some(generation), self.epoch);
                self.start_cycle(Some(generation));
            }
            PollSignal::Health {
                generation,
                epoch,
                reachable,
            } => {
                if epoch != self.epoch {
                    debug!(epoch, current = self.epoch, "dropping probe from before lifecycle change");
                    return;
                }
                if generation.is_some_and(|g| !self.poller.is_current(g)) {
                    debug!(?generation, "dropping probe from stopped polling");
                    return;
                }
                self.reachable = reachable;
                self.publish_status();
            }
        }
    }

    fn start_cycle(&mut self, generation: Option<u64>) {
        let Some(ids) = self.tracker.begin_cycle() else {
            return;
        };
        debug!(count = ids.len(), "polling task status");
        let client = self.client.clone();
        let tx = self.cycle_tx.clone();
        tokio::spawn(async move {
            let results = run_cycle(&client, ids).await;
            let _ = tx.send(CycleDone {
                generation,
                results,
            });
        });
    }

    fn handle_cycle(&mut self, done: CycleDone) {
        if done.generation.is_some_and(|g| !self.poller.is_current(g)) {
            debug!("dropping task results from stopped polling");
            self.tracker.abandon_cycle();
            return;
        }

        let summary = self.tracker.finish_cycle(done.results, Utc::now());
        for task_id in &summary.newly_completed {
            let status = self
                .tracker
                .tasks()
                .get(task_id)
                .map(|t| t.status_label().to_string())
                .unwrap_or_default();
            info!(task_id = %task_id, %status, "task finished");
        }
        if !summary.persisted {
            self.log_supervisor("failed to save tracked tasks".to_string());
        }
        self.bus.publish(MonitorEvent::TasksUpdated {
            active: summary.active,
            total: self.tracker.tasks().len(),
            newly_completed: summary.newly_completed,
        });
    }

    /// Called after every start, stop or exit.
    fn lifecycle_changed(&mut self, reset_reachable: bool) {
        self.epoch += 1;
        if reset_reachable {
            self.reachable = false;
        }
        self.publish_status();
        if self.poller.is_polling() {
            self.poller.spawn_probe(None, self.epoch);
        }
    }

    fn publish_status(&mut self) {
        let signals = Signals {
            lifecycle: self.supervisor.lifecycle(),
            running: self.supervisor.is_running(),
            reachable: self.reachable,
        };
        if let Some(status) = self.reconciler.update(signals) {
            info!(%status, "service status changed");
            self.bus.publish(MonitorEvent::StatusChanged { status });
        }
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            status: self.reconciler.current(),
            lifecycle: self.supervisor.lifecycle(),
            pid: self.supervisor.pid(),
            reachable: self.reachable,
            polling: self.poller.is_polling(),
            active_tasks: self.tracker.active_count(),
            tasks: self.tracker.tasks().iter().cloned().collect(),
        }
    }
}
