//! Foreground supervision: `svw run`
//!
//! Starts the service (unless `--no-start`), polls health and task status on
//! the configured interval, and prints every status change, output line and
//! task update until Ctrl-C. On Ctrl-C the service is stopped before exit.

use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use svcwarden::config::Config;
use svcwarden::events::{LogSource, MonitorEvent};
use svcwarden::monitor::{Monitor, MonitorSettings};
use svcwarden::remote::RemoteClient;

use super::{load_tracker, runtime};

pub fn run(dir: &Path, no_start: bool, interval: Option<u64>, json: bool) -> Result<()> {
    let config = Config::load(dir)?;
    if !no_start && config.service.command.is_none() {
        anyhow::bail!(
            "No service command configured. Set service.command in {} or use --no-start",
            dir.join("config.toml").display()
        );
    }

    let client = RemoteClient::from_config(&config.remote)?;
    let tracker = load_tracker(dir, &config)?;
    let settings = MonitorSettings::from_config(&config);

    let rt = runtime()?;
    rt.block_on(async move {
        let monitor = Monitor::spawn(settings, client, tracker);
        let mut events = monitor.subscribe();

        if !no_start {
            // A failed spawn is reported on the bus; keep watching the endpoint.
            if let Err(e) = monitor.start().await {
                warn!(error = %e, "service did not start");
            }
        }
        match interval {
            Some(secs) => {
                monitor
                    .start_polling_every(Duration::from_secs(secs.max(1)))
                    .await?
            }
            None => monitor.start_polling().await?,
        }

        loop {
            tokio::select! {
                signal = tokio::signal::ctrl_c() => {
                    signal.context("Failed to listen for Ctrl-C")?;
                    break;
                }
                event = events.recv() => match event {
                    Ok(event) => print_event(&event, json)?,
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "event output fell behind"),
                    Err(RecvError::Closed) => break,
                },
            }
        }

        if !json {
            eprintln!("Shutting down...");
        }
        monitor.shutdown().await?;
        while let Ok(event) = events.try_recv() {
            print_event(&event, json)?;
        }
        Ok::<(), anyhow::Error>(())
    })
}

fn print_event(event: &MonitorEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }
    if let Some(line) = format_event(event) {
        println!("{}", line);
    }
    Ok(())
}

fn format_event(event: &MonitorEvent) -> Option<String> {
    let line = match event {
        MonitorEvent::StatusChanged { status } => format!("== status: {}", status),
        MonitorEvent::LogLine {
            source: LogSource::Service,
            line,
        } => line.clone(),
        MonitorEvent::LogLine {
            source: LogSource::Supervisor,
            line,
        } => format!("[svw] {}", line),
        MonitorEvent::TaskDiscovered { task_id } => format!("== tracking task {}", task_id),
        MonitorEvent::TasksUpdated {
            active,
            total,
            newly_completed,
        } => {
            if newly_completed.is_empty() {
                return None;
            }
            format!(
                "== finished: {} ({} of {} tasks still active)",
                newly_completed.join(", "),
                active,
                total
            )
        }
        MonitorEvent::ProcessExited { code, signal, .. } => match (code, signal) {
            (Some(code), _) => format!("== service exited with code {}", code),
            (None, Some(signal)) => format!("== service killed by signal {}", signal),
            (None, None) => "== service exited".to_string(),
        },
        MonitorEvent::StopCompleted => "== service stopped".to_string(),
    };
    Some(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use svcwarden::status::ServiceStatus;

    #[test]
    fn test_format_event() {
        assert_eq!(
            format_event(&MonitorEvent::StatusChanged {
                status: ServiceStatus::Online
            })
            .as_deref(),
            Some("== status: online")
        );
        assert_eq!(
            format_event(&MonitorEvent::LogLine {
                source: LogSource::Supervisor,
                line: "no command".to_string()
            })
            .as_deref(),
            Some("[svw] no command")
        );
        // Quiet cycles print nothing.
        assert!(format_event(&MonitorEvent::TasksUpdated {
            active: 2,
            total: 2,
            newly_completed: vec![],
        })
        .is_none());
        assert_eq!(
            format_event(&MonitorEvent::ProcessExited {
                run_id: 1,
                code: None,
                signal: Some(9)
            })
            .as_deref(),
            Some("== service killed by signal 9")
        );
    }
}
