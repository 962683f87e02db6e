//! Error taxonomy for the supervisor runtime.
//!
//! None of these are fatal to the host. The monitor logs them and falls back
//! to the safe default for the affected signal.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SupervisorError {
    /// The service command could not be launched.
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    /// Network error or timeout talking to the remote endpoint.
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        source: reqwest::Error,
    },

    /// The remote answered with a non-success status code.
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    /// The response body did not match the expected shape.
    #[error("malformed response from {url}: {reason}")]
    Decode { url: String, reason: String },

    /// Start or restart requested with no `service.command` configured.
    #[error("no service command configured")]
    NoCommand,

    /// The monitor loop has exited.
    #[error("monitor is no longer running")]
    MonitorClosed,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("JSON error in {path}: {source}")]
    Json {
        path: String,
        source: serde_json::Error,
    },
}

pub type Result<T, E = SupervisorError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_target() {
        let status = SupervisorError::Status {
            url: "http://127.0.0.1:5001/health".to_string(),
            status: 503,
        };
        assert_eq!(
            status.to_string(),
            "http://127.0.0.1:5001/health returned HTTP 503"
        );

        let decode = SupervisorError::Decode {
            url: "u".to_string(),
            reason: "missing field".to_string(),
        };
        assert_eq!(decode.to_string(), "malformed response from u: missing field");

        let spawn = SupervisorError::Spawn {
            command: "/nope".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        assert!(spawn.to_string().contains("/nope"));
    }
}
