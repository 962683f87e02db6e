use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use svcwarden::config::Config;

/// Default content for .svw/.gitignore
const GITIGNORE_CONTENT: &str = r#"# svcwarden gitignore
# Tracked task state is machine-local
tasks.json
.*.tmp.*
"#;

pub fn run(dir: &Path) -> Result<()> {
    if dir.join("config.toml").exists() {
        anyhow::bail!("svcwarden already initialized at {}", dir.display());
    }

    Config::init(dir).context("Failed to write default config")?;

    let gitignore_path = dir.join(".gitignore");
    fs::write(&gitignore_path, GITIGNORE_CONTENT).context("Failed to create .gitignore")?;

    println!("Initialized svcwarden at {}", dir.display());
    println!("Set the service to supervise with: svw config set --command <path>");
    Ok(())
}
