//! Periodic reachability probing.
//!
//! A ticker task fires on a fixed interval and tells the owner loop about each
//! tick; the owner then spawns the probe and the task cycle. Ticks never wait
//! on probes, so a slow endpoint produces late results, not late ticks.
//! Every tick and probe is tagged with the polling generation it belongs to;
//! restarting or stopping polling bumps the generation so stragglers can be
//! recognised and dropped.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::remote::RemoteClient;

/// Messages from the ticker and probes back to the owner loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollSignal {
    Tick {
        generation: u64,
    },
    Health {
        /// `None` for one-off probes outside the timer.
        generation: Option<u64>,
        /// Lifecycle epoch when the probe was issued
        epoch: u64,
        reachable: bool,
    },
}

#[derive(Debug)]
pub struct HealthPoller {
    client: RemoteClient,
    cancel: Option<CancellationToken>,
    generation: u64,
    tx: mpsc::UnboundedSender<PollSignal>,
}

impl HealthPoller {
    pub fn new(client: RemoteClient, tx: mpsc::UnboundedSender<PollSignal>) -> Self {
        Self {
            client,
            cancel: None,
            generation: 0,
            tx,
        }
    }

    pub fn is_polling(&self) -> bool {
        self.cancel.is_some()
    }

    /// Whether a tick or probe from `generation` should still be applied.
    pub fn is_current(&self, generation: u64) -> bool {
        self.is_polling() && generation == self.generation
    }

    /// Start ticking every `interval`, replacing any previous timer. The
    /// first tick fires immediately.
    pub fn start_polling(&mut self, interval: Duration) -> u64 {
        self.stop_polling();
        self.generation += 1;
        let generation = self.generation;

        let token = CancellationToken::new();
        let cancel = token.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if tx.send(PollSignal::Tick { generation }).is_err() {
                            break;
                        }
                    }
                }
            }
            debug!(generation, "poll timer stopped");
        });

        self.cancel = Some(token);
        debug!(generation, ?interval, "polling started");
        generation
    }

    /// Cancel future ticks. Safe to call when not polling.
    pub fn stop_polling(&mut self) {
        if let Some(token) = self.cancel.take() {
            token.cancel();
            self.generation += 1;
        }
    }

    /// Probe on a spawned task; the result comes back as
    /// [`PollSignal::Health`].
    pub fn spawn_probe(&self, generation: Option<u64>, epoch: u64) {
        let client = self.client.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let reachable = client.is_reachable().await;
            let _ = tx.send(PollSignal::Health {
                generation,
                epoch,
                reachable,
            });
        });
    }
}

impl Drop for HealthPoller {
    fn drop(&mut self) {
        self.stop_polling();
    }
}
