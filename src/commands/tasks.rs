//! Tracked task commands
//!
//! Usage:
//!   svw tasks list
//!   svw tasks add <id>...             # duplicates are reported, not re-added
//!   svw tasks scan service.log        # track ids found in a log ("-" = stdin)
//!   svw tasks poll                    # one status fetch for every active task
//!   svw tasks clear-completed

use anyhow::{Context, Result};
use chrono::Utc;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use svcwarden::config::Config;
use svcwarden::lines::LineAssembler;
use svcwarden::remote::RemoteClient;
use svcwarden::tasks::{run_cycle, TaskTracker, TrackedTask};

use super::{load_tracker, runtime};

pub fn list(dir: &Path, json: bool) -> Result<()> {
    let config = Config::load(dir)?;
    let tracker = load_tracker(dir, &config)?;
    let tasks = tracker.tasks();

    if json {
        println!("{}", serde_json::to_string_pretty(tasks.as_slice())?);
        return Ok(());
    }

    if tasks.is_empty() {
        println!("No tracked tasks.");
        return Ok(());
    }

    for task in tasks.iter() {
        println!("{}", format_task(task));
    }
    println!();
    println!("{} active, {} total", tracker.active_count(), tasks.len());
    Ok(())
}

fn format_task(task: &TrackedTask) -> String {
    let marker = if task.completed { "x" } else { " " };
    let mut line = format!("[{}] {}  {}", marker, task.id, task.status_label());
    if let Some(position) = task.position {
        line.push_str(&format!("  (queue position {})", position));
    }
    if let Some(progress) = &task.progress {
        if let (Some(done), Some(total)) = (progress.processed, progress.total) {
            line.push_str(&format!("  {}/{}", done, total));
        }
    }
    if let Some(updated) = task.updated_at {
        line.push_str(&format!("  updated {}", updated.format("%Y-%m-%d %H:%M:%S")));
    }
    line
}

pub fn add(dir: &Path, ids: &[String], json: bool) -> Result<()> {
    let config = Config::load(dir)?;
    let mut tracker = load_tracker(dir, &config)?;

    let mut added = Vec::new();
    let mut skipped = Vec::new();
    for id in ids {
        if tracker.add(id) {
            added.push(id.trim().to_string());
        } else {
            skipped.push(id.trim().to_string());
        }
    }

    if json {
        let output = serde_json::json!({
            "added": added,
            "skipped": skipped,
            "total": tracker.tasks().len(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        for id in &added {
            println!("Tracking {}", id);
        }
        for id in &skipped {
            println!("Already tracked (or blank): '{}'", id);
        }
    }
    Ok(())
}

/// Feed `source` through the line assembler and track every id it mentions.
fn scan_reader(tracker: &mut TaskTracker, mut source: impl Read) -> Result<Vec<String>> {
    let mut assembler = LineAssembler::new();
    let mut discovered = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = source.read(&mut buf).context("Failed to read log input")?;
        if n == 0 {
            break;
        }
        for line in assembler.feed(&buf[..n]) {
            discovered.extend(tracker.observe_line(&line));
        }
    }
    if let Some(line) = assembler.finish() {
        discovered.extend(tracker.observe_line(&line));
    }
    Ok(discovered)
}

pub fn scan(dir: &Path, file: &Path, json: bool) -> Result<()> {
    let config = Config::load(dir)?;
    let mut tracker = load_tracker(dir, &config)?;

    let discovered = if file == Path::new("-") {
        scan_reader(&mut tracker, io::stdin().lock())?
    } else {
        let source =
            File::open(file).with_context(|| format!("Failed to open {}", file.display()))?;
        scan_reader(&mut tracker, source)?
    };

    if json {
        let output = serde_json::json!({
            "discovered": discovered,
            "total": tracker.tasks().len(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else if discovered.is_empty() {
        println!("No new task ids found.");
    } else {
        for id in &discovered {
            println!("Tracking {}", id);
        }
        println!("{} new task(s)", discovered.len());
    }
    Ok(())
}

pub fn poll(dir: &Path, json: bool) -> Result<()> {
    let config = Config::load(dir)?;
    let mut tracker = load_tracker(dir, &config)?;
    let client = RemoteClient::from_config(&config.remote)?;

    let Some(ids) = tracker.begin_cycle() else {
        if json {
            println!("{}", serde_json::json!({ "polled": 0, "active": 0 }));
        } else {
            println!("No active tasks to poll.");
        }
        return Ok(());
    };

    let rt = runtime()?;
    let cycle = rt.block_on(run_cycle(&client, ids));
    let summary = tracker.finish_cycle(cycle, Utc::now());

    if json {
        let output = serde_json::json!({
            "polled": summary.polled,
            "updated": summary.updated,
            "failed": summary.failed,
            "newly_completed": summary.newly_completed,
            "active": summary.active,
            "persisted": summary.persisted,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!(
            "Polled {} task(s): {} updated, {} failed",
            summary.polled, summary.updated, summary.failed
        );
        for id in &summary.newly_completed {
            if let Some(task) = tracker.tasks().get(id) {
                println!("  {} finished: {}", id, task.status_label());
            }
        }
        println!("{} still active", summary.active);
    }

    if !summary.persisted {
        anyhow::bail!("Failed to save tracked tasks");
    }
    Ok(())
}

pub fn clear_completed(dir: &Path, json: bool) -> Result<()> {
    let config = Config::load(dir)?;
    let mut tracker = load_tracker(dir, &config)?;
    let removed = tracker.clear_completed();

    if json {
        let output = serde_json::json!({
            "removed": removed,
            "remaining": tracker.tasks().len(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("Removed {} completed task(s)", removed);
    }
    Ok(())
}
