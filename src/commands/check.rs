//! One-off health probe

use anyhow::Result;
use std::path::Path;

use svcwarden::config::Config;
use svcwarden::remote::RemoteClient;

use super::runtime;

/// Probe `/health` once. Returns whether the service answered with a 2xx.
pub fn run(dir: &Path, json: bool) -> Result<bool> {
    let config = Config::load(dir)?;
    let client = RemoteClient::from_config(&config.remote)?;

    let rt = runtime()?;
    let result = rt.block_on(client.health());

    if json {
        let output = serde_json::json!({
            "url": client.health_url(),
            "reachable": result.is_ok(),
            "error": result.as_ref().err().map(|e| e.to_string()),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        match &result {
            Ok(()) => println!("{} is reachable", client.base_url()),
            Err(e) => println!("{} is unreachable: {}", client.base_url(), e),
        }
    }

    Ok(result.is_ok())
}
