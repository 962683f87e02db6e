//! Integration tests for the `svw` binary's offline commands.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::TempDir;

const TASK_A: &str = "3fa85f64-5717-4562-b3fc-2c963f66afa6";
const TASK_B: &str = "11111111-2222-3333-4444-555555555555";

fn svw_binary() -> PathBuf {
    let mut path = std::env::current_exe().expect("could not get current exe path");
    path.pop();
    if path.ends_with("deps") {
        path.pop();
    }
    path.push("svw");
    assert!(
        path.exists(),
        "svw binary not found at {:?}. Run `cargo build` first.",
        path
    );
    path
}

fn svw_cmd(svw_dir: &Path, args: &[&str]) -> std::process::Output {
    Command::new(svw_binary())
        .arg("--dir")
        .arg(svw_dir)
        .args(args)
        .env_remove("SVW_API_KEY")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .unwrap_or_else(|e| panic!("Failed to run svw {:?}: {}", args, e))
}

fn svw_ok(svw_dir: &Path, args: &[&str]) -> String {
    let output = svw_cmd(svw_dir, args);
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    assert!(
        output.status.success(),
        "svw {:?} failed.\nstdout: {}\nstderr: {}",
        args,
        stdout,
        stderr
    );
    stdout
}

fn svw_json(svw_dir: &Path, args: &[&str]) -> serde_json::Value {
    let mut full = vec!["--json"];
    full.extend_from_slice(args);
    let stdout = svw_ok(svw_dir, &full);
    serde_json::from_str(&stdout)
        .unwrap_or_else(|e| panic!("svw {:?} did not print JSON ({}): {}", args, e, stdout))
}

fn setup() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let svw_dir = tmp.path().join(".svw");
    svw_ok(&svw_dir, &["init"]);
    (tmp, svw_dir)
}

#[test]
fn test_init_then_config_show() {
    let (_tmp, svw_dir) = setup();
    assert!(svw_dir.join("config.toml").exists());

    let config = svw_json(&svw_dir, &["config", "show"]);
    assert_eq!(config["remote"]["base_url"], "http://127.0.0.1:5001");
    assert_eq!(config["remote"]["api_key_set"], false);

    // Second init refuses.
    assert!(!svw_cmd(&svw_dir, &["init"]).status.success());
}

#[test]
fn test_config_set_round_trips() {
    let (_tmp, svw_dir) = setup();
    svw_ok(
        &svw_dir,
        &[
            "config",
            "set",
            "--command",
            "/opt/svc/bin/serve",
            "--base-url",
            "http://127.0.0.1:6001",
        ],
    );

    let config = svw_json(&svw_dir, &["config", "show"]);
    assert_eq!(config["service"]["command"], "/opt/svc/bin/serve");
    assert_eq!(config["remote"]["base_url"], "http://127.0.0.1:6001");
}

#[test]
fn test_tasks_add_list_and_duplicates() {
    let (_tmp, svw_dir) = setup();

    let added = svw_json(&svw_dir, &["tasks", "add", TASK_A, TASK_B, TASK_A]);
    assert_eq!(added["added"].as_array().unwrap().len(), 2);
    assert_eq!(added["skipped"], serde_json::json!([TASK_A]));
    assert_eq!(added["total"], 2);

    let listed = svw_json(&svw_dir, &["tasks", "list"]);
    let tasks = listed.as_array().unwrap();
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0]["id"], TASK_A);
    assert_eq!(tasks[0]["last_known_status"], "queued");
    assert_eq!(tasks[1]["id"], TASK_B);

    let text = svw_ok(&svw_dir, &["tasks", "list"]);
    assert!(text.contains("2 active, 2 total"));
}

#[test]
fn test_tasks_scan_log_file() {
    let (tmp, svw_dir) = setup();
    let log = tmp.path().join("service.log");
    let mut file = fs::File::create(&log).unwrap();
    writeln!(file, "starting up").unwrap();
    writeln!(file, "Task queued: {} accepted", TASK_A).unwrap();
    writeln!(file, "Task {} progress 10%", TASK_A).unwrap();
    write!(file, "Task queued: {}", TASK_B).unwrap();
    drop(file);

    let scanned = svw_json(&svw_dir, &["tasks", "scan", log.to_str().unwrap()]);
    assert_eq!(scanned["discovered"], serde_json::json!([TASK_A, TASK_B]));

    // Rescanning finds nothing new.
    let again = svw_json(&svw_dir, &["tasks", "scan", log.to_str().unwrap()]);
    assert_eq!(again["discovered"], serde_json::json!([]));
    assert_eq!(again["total"], 2);
}

#[test]
fn test_clear_completed_keeps_active_tasks() {
    let (_tmp, svw_dir) = setup();
    svw_ok(&svw_dir, &["tasks", "add", TASK_A, TASK_B]);

    // Mark one completed directly in the store.
    let store = svw_dir.join("tasks.json");
    let mut tasks: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&store).unwrap()).unwrap();
    tasks[0]["completed"] = serde_json::Value::Bool(true);
    tasks[0]["last_known_status"] = serde_json::Value::String("success".to_string());
    fs::write(&store, serde_json::to_string_pretty(&tasks).unwrap()).unwrap();

    let cleared = svw_json(&svw_dir, &["tasks", "clear-completed"]);
    assert_eq!(cleared["removed"], 1);
    assert_eq!(cleared["remaining"], 1);

    let listed = svw_json(&svw_dir, &["tasks", "list"]);
    assert_eq!(listed[0]["id"], TASK_B);
}

#[test]
fn test_poll_with_no_active_tasks() {
    let (_tmp, svw_dir) = setup();
    let polled = svw_json(&svw_dir, &["tasks", "poll"]);
    assert_eq!(polled["polled"], 0);
}

#[test]
fn test_check_unreachable_exits_nonzero() {
    let (_tmp, svw_dir) = setup();
    svw_ok(
        &svw_dir,
        &["config", "set", "--base-url", "http://127.0.0.1:9"],
    );
    let output = svw_cmd(&svw_dir, &["--json", "check"]);
    assert!(!output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["reachable"], false);
}

#[test]
fn test_run_without_command_fails() {
    let (_tmp, svw_dir) = setup();
    let output = svw_cmd(&svw_dir, &["run"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("No service command configured"));
}
