//! Configuration for svcwarden
//!
//! Configuration is stored in `<dir>/config.toml` (default `.svw/config.toml`)
//! and controls which service command is supervised, where its remote API
//! lives, and how often it is polled.
//!
//! The API key can be kept out of the file: `SVW_API_KEY` in the environment
//! takes precedence over `remote.api_key`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding `remote.api_key`.
pub const API_KEY_ENV: &str = "SVW_API_KEY";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Supervised service process
    #[serde(default)]
    pub service: ServiceConfig,

    /// Remote health and task status API
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Tracked task persistence
    #[serde(default)]
    pub tasks: TasksConfig,
}

/// Service process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Path of the command to launch (run through `/bin/sh -c`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Working directory for the service (None = inherit)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    /// Command-line substring used by the orphan cleanup (`pkill -f`).
    /// Defaults to `command` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kill_pattern: Option<String>,

    /// Delay between stop and start during a restart (milliseconds)
    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,

    /// Escalation timings for stopping the service
    #[serde(default)]
    pub termination: TerminationConfig,
}

/// Timings for the SIGTERM -> SIGINT -> SIGKILL escalation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminationConfig {
    /// How long to wait after SIGTERM (milliseconds)
    #[serde(default = "default_grace_ms")]
    pub grace_ms: u64,

    /// How long to wait after SIGINT (milliseconds)
    #[serde(default = "default_interrupt_ms")]
    pub interrupt_ms: u64,

    /// Liveness poll interval while waiting (milliseconds)
    #[serde(default = "default_poll_ms")]
    pub poll_ms: u64,
}

/// Remote API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the service API (e.g., "http://127.0.0.1:5001")
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Poll interval in seconds for health and task status
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,

    /// Total per-request timeout in seconds, connection included
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    /// Header name the API key is sent in
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,

    /// Static API key (None = unauthenticated requests)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

/// Tracked task persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TasksConfig {
    /// Task store file, relative to the config directory
    #[serde(default = "default_store")]
    pub store: String,
}

fn default_restart_delay_ms() -> u64 {
    2500
}

fn default_grace_ms() -> u64 {
    2000
}

fn default_interrupt_ms() -> u64 {
    500
}

fn default_poll_ms() -> u64 {
    50
}

fn default_base_url() -> String {
    "http://127.0.0.1:5001".to_string()
}

fn default_poll_interval() -> u64 {
    5
}

fn default_request_timeout() -> u64 {
    5
}

fn default_api_key_header() -> String {
    "X-Api-Key".to_string()
}

fn default_store() -> String {
    "tasks.json".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            command: None,
            working_dir: None,
            kill_pattern: None,
            restart_delay_ms: default_restart_delay_ms(),
            termination: TerminationConfig::default(),
        }
    }
}

impl Default for TerminationConfig {
    fn default() -> Self {
        Self {
            grace_ms: default_grace_ms(),
            interrupt_ms: default_interrupt_ms(),
            poll_ms: default_poll_ms(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            poll_interval: default_poll_interval(),
            request_timeout: default_request_timeout(),
            api_key_header: default_api_key_header(),
            api_key: None,
        }
    }
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            store: default_store(),
        }
    }
}

impl ServiceConfig {
    /// Pattern for the orphan cleanup: explicit `kill_pattern`, else the command.
    pub fn kill_pattern(&self) -> Option<&str> {
        self.kill_pattern
            .as_deref()
            .or(self.command.as_deref())
            .filter(|p| !p.trim().is_empty())
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
}

impl RemoteConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout.max(1))
    }

    /// Resolve the API key, preferring the environment over the file.
    pub fn api_key(&self) -> Option<String> {
        self.api_key_with_env(std::env::var(API_KEY_ENV).ok())
    }

    fn api_key_with_env(&self, env: Option<String>) -> Option<String> {
        env.or_else(|| self.api_key.clone())
            .filter(|k| !k.trim().is_empty())
    }
}

impl Config {
    /// Load configuration from <dir>/config.toml
    /// Returns default config if file doesn't exist
    pub fn load(dir: &Path) -> anyhow::Result<Self> {
        let config_path = dir.join("config.toml");

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("Failed to read config: {}", e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))?;

        Ok(config)
    }

    /// Save configuration to <dir>/config.toml
    pub fn save(&self, dir: &Path) -> anyhow::Result<()> {
        fs::create_dir_all(dir)
            .map_err(|e| anyhow::anyhow!("Failed to create config directory: {}", e))?;

        let config_path = dir.join("config.toml");

        let content = toml::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize config: {}", e))?;

        fs::write(&config_path, content)
            .map_err(|e| anyhow::anyhow!("Failed to write config: {}", e))?;

        Ok(())
    }

    /// Initialize default config file if it doesn't exist
    pub fn init(dir: &Path) -> anyhow::Result<bool> {
        let config_path = dir.join("config.toml");

        if config_path.exists() {
            return Ok(false); // Already exists
        }

        let config = Self::default();
        config.save(dir)?;
        Ok(true) // Created new
    }

    /// Absolute path of the task store for a given config directory
    pub fn tasks_path(&self, dir: &Path) -> PathBuf {
        let store = Path::new(&self.tasks.store);
        if store.is_absolute() {
            store.to_path_buf()
        } else {
            dir.join(store)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.remote.base_url, "http://127.0.0.1:5001");
        assert_eq!(config.remote.poll_interval, 5);
        assert_eq!(config.remote.api_key_header, "X-Api-Key");
        assert_eq!(config.service.restart_delay_ms, 2500);
        assert_eq!(config.service.termination.grace_ms, 2000);
        assert_eq!(config.service.termination.interrupt_ms, 500);
        assert_eq!(config.service.termination.poll_ms, 50);
        assert!(config.service.command.is_none());
    }

    #[test]
    fn test_load_missing_config() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load(temp_dir.path()).unwrap();
        assert_eq!(config.tasks.store, "tasks.json");
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();

        let mut config = Config::default();
        config.service.command = Some("/opt/svc/run.sh".to_string());
        config.remote.poll_interval = 30;
        config.save(temp_dir.path()).unwrap();

        let loaded = Config::load(temp_dir.path()).unwrap();
        assert_eq!(loaded.service.command.as_deref(), Some("/opt/svc/run.sh"));
        assert_eq!(loaded.remote.poll_interval, 30);
    }

    #[test]
    fn test_init_config() {
        let temp_dir = TempDir::new().unwrap();

        let created = Config::init(temp_dir.path()).unwrap();
        assert!(created);

        let created = Config::init(temp_dir.path()).unwrap();
        assert!(!created);
    }

    #[test]
    fn test_parse_custom_config() {
        let toml_str = r#"
[service]
command = "/usr/local/bin/serve --port 5001"
working_dir = "/srv"
restart_delay_ms = 4000

[service.termination]
grace_ms = 100

[remote]
base_url = "http://localhost:8080"
api_key = "secret"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.service.working_dir.as_deref(), Some("/srv"));
        assert_eq!(config.service.restart_delay(), Duration::from_millis(4000));
        assert_eq!(config.service.termination.grace_ms, 100);
        assert_eq!(config.service.termination.interrupt_ms, 500);
        assert_eq!(config.remote.base_url, "http://localhost:8080");
        assert_eq!(config.remote.poll_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_kill_pattern_falls_back_to_command() {
        let mut service = ServiceConfig::default();
        assert!(service.kill_pattern().is_none());

        service.command = Some("/opt/svc/run.sh".to_string());
        assert_eq!(service.kill_pattern(), Some("/opt/svc/run.sh"));

        service.kill_pattern = Some("svc-worker".to_string());
        assert_eq!(service.kill_pattern(), Some("svc-worker"));

        service.kill_pattern = Some("  ".to_string());
        service.command = None;
        assert!(service.kill_pattern().is_none());
    }

    #[test]
    fn test_api_key_env_takes_precedence() {
        let mut remote = RemoteConfig::default();
        assert!(remote.api_key_with_env(None).is_none());

        remote.api_key = Some("from-file".to_string());
        assert_eq!(remote.api_key_with_env(None).as_deref(), Some("from-file"));
        assert_eq!(
            remote.api_key_with_env(Some("from-env".to_string())).as_deref(),
            Some("from-env")
        );
        assert!(remote.api_key_with_env(Some("".to_string())).is_none());
    }

    #[test]
    fn test_tasks_path_relative_and_absolute() {
        let mut config = Config::default();
        assert_eq!(
            config.tasks_path(Path::new("/state")),
            PathBuf::from("/state/tasks.json")
        );
        config.tasks.store = "/var/lib/svw/tasks.json".to_string();
        assert_eq!(
            config.tasks_path(Path::new("/state")),
            PathBuf::from("/var/lib/svw/tasks.json")
        );
    }

    #[test]
    fn test_poll_interval_never_zero() {
        let mut remote = RemoteConfig::default();
        remote.poll_interval = 0;
        assert_eq!(remote.poll_interval(), Duration::from_secs(1));
    }
}
