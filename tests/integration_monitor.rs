//! Monitor tests against real `sh` children.

use std::time::Duration;

use serial_test::serial;
use svcwarden::monitor::{Monitor, MonitorHandle, MonitorSettings};
use svcwarden::process::TerminationPolicy;
use svcwarden::{Lifecycle, MonitorEvent, RemoteClient, ServiceStatus, TaskStore, TaskTracker};
use tempfile::TempDir;
use tokio::sync::broadcast;

fn settings(command: &str) -> MonitorSettings {
    MonitorSettings {
        command: Some(command.to_string()),
        working_dir: None,
        kill_pattern: None,
        restart_delay: Duration::from_millis(100),
        poll_interval: Duration::from_secs(60),
        termination: TerminationPolicy {
            grace: Duration::from_millis(300),
            interrupt_wait: Duration::from_millis(200),
            poll: Duration::from_millis(20),
        },
        bus_capacity: 256,
    }
}

fn spawn(command: &str, tracker: TaskTracker) -> MonitorHandle {
    let client = RemoteClient::new("http://127.0.0.1:9", Duration::from_millis(300), None).unwrap();
    Monitor::spawn(settings(command), client, tracker)
}

async fn wait_for(
    rx: &mut broadcast::Receiver<MonitorEvent>,
    mut pred: impl FnMut(&MonitorEvent) -> bool,
) -> MonitorEvent {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("event bus closed: {}", e),
            }
        }
    })
    .await
    .expect("timed out waiting for monitor event")
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn test_stop_escalates_and_waits_for_exit() {
    // Ignores TERM and INT; only SIGKILL ends it.
    let monitor = spawn("trap '' TERM INT; echo ready; sleep 30", TaskTracker::in_memory());
    let mut events = monitor.subscribe();

    monitor.start().await.unwrap();
    wait_for(&mut events, |e| matches!(e, MonitorEvent::LogLine { line, .. } if line == "ready")).await;

    monitor.stop().await.unwrap();
    let snapshot = monitor.snapshot().await.unwrap();
    assert!(snapshot.pid.is_none());
    assert_eq!(snapshot.lifecycle, Lifecycle::Offline);
    assert_eq!(snapshot.status, ServiceStatus::Offline);

    let exited = wait_for(&mut events, |e| matches!(e, MonitorEvent::ProcessExited { .. })).await;
    assert!(matches!(exited, MonitorEvent::ProcessExited { signal: Some(9), .. }));

    monitor.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn test_status_sequence_through_stop() {
    let monitor = spawn("sleep 30", TaskTracker::in_memory());
    let mut events = monitor.subscribe();

    monitor.start().await.unwrap();
    monitor.stop().await.unwrap();

    let mut statuses = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let MonitorEvent::StatusChanged { status } = event {
            statuses.push(status);
        }
    }
    assert_eq!(
        statuses,
        vec![
            ServiceStatus::Starting,
            ServiceStatus::Stopping,
            ServiceStatus::Offline
        ]
    );
    monitor.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn test_discovered_tasks_are_persisted() {
    let temp_dir = TempDir::new().unwrap();
    let store = TaskStore::new(temp_dir.path().join("tasks.json"));
    let tracker = TaskTracker::load(store.clone()).unwrap();

    // The id is split across two writes to exercise line reassembly.
    let monitor = spawn(
        "printf 'Task queued: 3fa85f64-5717-'; sleep 0.1; printf '4562-b3fc-2c963f66afa6 accepted\\n'; sleep 30",
        tracker,
    );
    let mut events = monitor.subscribe();

    monitor.start().await.unwrap();
    let discovered =
        wait_for(&mut events, |e| matches!(e, MonitorEvent::TaskDiscovered { .. })).await;
    assert_eq!(
        discovered,
        MonitorEvent::TaskDiscovered {
            task_id: "3fa85f64-5717-4562-b3fc-2c963f66afa6".to_string()
        }
    );

    let saved = store.load().unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(
        saved
            .get("3fa85f64-5717-4562-b3fc-2c963f66afa6")
            .unwrap()
            .status_label(),
        "queued"
    );

    monitor.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn test_dropping_every_handle_stops_the_service() {
    let monitor = spawn("echo up; sleep 30", TaskTracker::in_memory());
    let mut events = monitor.subscribe();
    monitor.start().await.unwrap();
    wait_for(&mut events, |e| matches!(e, MonitorEvent::LogLine { line, .. } if line == "up")).await;

    drop(monitor);
    wait_for(&mut events, |e| matches!(e, MonitorEvent::StopCompleted)).await;
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn test_restart_from_offline_survives_its_own_orphan_cleanup() {
    let command = "sleep 31.5";
    let mut settings = settings(command);
    settings.kill_pattern = Some(command.to_string());
    settings.restart_delay = Duration::ZERO;
    let client = RemoteClient::new("http://127.0.0.1:9", Duration::from_millis(300), None).unwrap();
    let monitor = Monitor::spawn(settings, client, TaskTracker::in_memory());
    let mut events = monitor.subscribe();

    monitor.restart().await.unwrap();
    wait_for(&mut events, |e| {
        matches!(e, MonitorEvent::StatusChanged { status: ServiceStatus::Starting })
    })
    .await;

    // Long enough for a stray pkill to have landed.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let snapshot = monitor.snapshot().await.unwrap();
    assert!(snapshot.pid.is_some());
    assert_eq!(snapshot.lifecycle, Lifecycle::Starting);
    assert_eq!(snapshot.status, ServiceStatus::Starting);
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, MonitorEvent::ProcessExited { .. }));
    }

    monitor.shutdown().await.unwrap();
}
