//! Clean up service processes we hold no handle to.
//!
//! `svw run` stops its own child on exit. This is for a service left behind
//! by a crashed or killed `svw run`, matched by command line.

use anyhow::Result;
use std::path::Path;

use svcwarden::config::Config;
use svcwarden::process::{default_terminator, TerminationPolicy};

use super::runtime;

pub fn run(dir: &Path, json: bool) -> Result<()> {
    let config = Config::load(dir)?;
    let Some(pattern) = config.service.kill_pattern() else {
        anyhow::bail!(
            "No kill pattern: set service.command or service.kill_pattern in {}",
            dir.join("config.toml").display()
        );
    };

    let terminator = default_terminator(TerminationPolicy::from_config(
        &config.service.termination,
    ));
    let rt = runtime()?;
    rt.block_on(terminator.kill_orphans(pattern));

    if json {
        let output = serde_json::json!({ "pattern": pattern, "signalled": true });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("Signalled processes matching '{}'", pattern);
    }
    Ok(())
}
