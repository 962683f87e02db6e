//! Configuration management commands

use anyhow::Result;
use std::path::Path;

use svcwarden::config::{Config, API_KEY_ENV};

/// Values `svw config set` can change. `None` leaves a value alone.
#[derive(Debug, Default)]
pub struct ConfigUpdate {
    pub command: Option<String>,
    pub working_dir: Option<String>,
    pub kill_pattern: Option<String>,
    pub base_url: Option<String>,
    pub poll_interval: Option<u64>,
    pub api_key_header: Option<String>,
}

/// Show current configuration
pub fn show(dir: &Path, json: bool) -> Result<()> {
    let mut config = Config::load(dir)?;
    let key_set = config.remote.api_key().is_some();
    // Never print the key itself.
    config.remote.api_key = None;

    if json {
        let mut value = serde_json::to_value(&config)?;
        value["remote"]["api_key_set"] = serde_json::Value::Bool(key_set);
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("svcwarden Configuration");
    println!("=======================");
    println!();
    println!("[service]");
    match &config.service.command {
        Some(command) => println!("  command = \"{}\"", command),
        None => println!("  command = (not set)"),
    }
    if let Some(ref wd) = config.service.working_dir {
        println!("  working_dir = \"{}\"", wd);
    }
    if let Some(pattern) = config.service.kill_pattern() {
        println!("  kill_pattern = \"{}\"", pattern);
    }
    println!("  restart_delay_ms = {}", config.service.restart_delay_ms);
    println!(
        "  termination = {}ms TERM / {}ms INT (poll {}ms)",
        config.service.termination.grace_ms,
        config.service.termination.interrupt_ms,
        config.service.termination.poll_ms
    );
    println!();
    println!("[remote]");
    println!("  base_url = \"{}\"", config.remote.base_url);
    println!("  poll_interval = {}", config.remote.poll_interval);
    println!("  request_timeout = {}", config.remote.request_timeout);
    println!("  api_key_header = \"{}\"", config.remote.api_key_header);
    println!(
        "  api_key = {}",
        if key_set { "(set)" } else { "(not set)" }
    );
    println!();
    println!("[tasks]");
    println!("  store = \"{}\"", config.tasks_path(dir).display());
    println!();
    println!("The API key can also be given in ${}.", API_KEY_ENV);

    Ok(())
}

fn apply(config: &mut Config, update: ConfigUpdate) -> Vec<String> {
    let mut changed = Vec::new();

    if let Some(command) = update.command {
        changed.push(format!("service.command = \"{}\"", command));
        config.service.command = Some(command);
    }
    if let Some(wd) = update.working_dir {
        changed.push(format!("service.working_dir = \"{}\"", wd));
        config.service.working_dir = Some(wd);
    }
    if let Some(pattern) = update.kill_pattern {
        changed.push(format!("service.kill_pattern = \"{}\"", pattern));
        config.service.kill_pattern = Some(pattern);
    }
    if let Some(url) = update.base_url {
        changed.push(format!("remote.base_url = \"{}\"", url));
        config.remote.base_url = url;
    }
    if let Some(interval) = update.poll_interval {
        changed.push(format!("remote.poll_interval = {}", interval));
        config.remote.poll_interval = interval;
    }
    if let Some(header) = update.api_key_header {
        changed.push(format!("remote.api_key_header = \"{}\"", header));
        config.remote.api_key_header = header;
    }

    changed
}

/// Update configuration values
pub fn update(dir: &Path, update: ConfigUpdate) -> Result<()> {
    let mut config = Config::load(dir)?;
    let changed = apply(&mut config, update);

    if changed.is_empty() {
        println!("No changes specified. Use `svw config show` to view current config.");
        return Ok(());
    }

    config.save(dir)?;
    for line in &changed {
        println!("Set {}", line);
    }
    println!("Configuration saved.");
    Ok(())
}
