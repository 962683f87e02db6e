//! HTTP access to the supervised service's API.
//!
//! Two endpoints are used:
//! - `GET {base}/health`: any 2xx means the service is reachable
//! - `GET {base}/v1/status/poll/{task_id}`: JSON status for one task
//!
//! Every request is bounded by the client timeout (connection included).
//! An optional static API key is attached as a header to every request.

use std::time::Duration;

use anyhow::Context;
use reqwest::Client as HttpClient;
use reqwest::header::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::config::RemoteConfig;
use crate::error::{Result, SupervisorError};

/// Health probe path under the base URL
pub const HEALTH_PATH: &str = "/health";

/// Task status path prefix under the base URL
pub const STATUS_POLL_PATH: &str = "/v1/status/poll";

/// Status response for a single task.
///
/// Only the id and status are required; the queue position and processing
/// counters are kept when present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    #[serde(alias = "id")]
    pub task_id: String,

    #[serde(alias = "status")]
    pub task_status: String,

    #[serde(default, alias = "position", skip_serializing_if = "Option::is_none")]
    pub task_position: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_meta: Option<TaskMeta>,
}

/// Processing counters reported alongside a task status
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskMeta {
    #[serde(default)]
    pub num_docs: Option<u64>,
    #[serde(default)]
    pub num_processed: Option<u64>,
    #[serde(default)]
    pub num_succeeded: Option<u64>,
    #[serde(default)]
    pub num_failed: Option<u64>,
}

/// Client for the service API. Cheap to clone; clones share one connection pool.
#[derive(Clone, Debug)]
pub struct RemoteClient {
    http: HttpClient,
    base_url: String,
    auth: Option<(HeaderName, HeaderValue)>,
}

impl RemoteClient {
    /// Create a client for `base_url`.
    ///
    /// `auth` is an optional `(header name, key)` pair sent on every request.
    pub fn new(base_url: &str, timeout: Duration, auth: Option<(&str, &str)>) -> anyhow::Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            anyhow::bail!("remote base_url is empty");
        }

        let http = HttpClient::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        let auth = match auth {
            Some((name, key)) => {
                let name = HeaderName::from_bytes(name.as_bytes())
                    .with_context(|| format!("Invalid API key header name '{}'", name))?;
                let mut value =
                    HeaderValue::from_str(key).context("API key is not a valid header value")?;
                value.set_sensitive(true);
                Some((name, value))
            }
            None => None,
        };

        Ok(Self {
            http,
            base_url,
            auth,
        })
    }

    /// Build a client from the `[remote]` config section.
    pub fn from_config(config: &RemoteConfig) -> anyhow::Result<Self> {
        let key = config.api_key();
        let auth = key
            .as_deref()
            .map(|k| (config.api_key_header.as_str(), k));
        Self::new(&config.base_url, config.request_timeout(), auth)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn health_url(&self) -> String {
        format!("{}{}", self.base_url, HEALTH_PATH)
    }

    /// The id is sent as a single path segment, whatever it contains.
    pub fn status_url(&self, task_id: &str) -> String {
        format!(
            "{}{}/{}",
            self.base_url,
            STATUS_POLL_PATH,
            urlencoding::encode(task_id)
        )
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let req = self.http.get(url);
        match &self.auth {
            Some((name, value)) => req.header(name.clone(), value.clone()),
            None => req,
        }
    }

    /// Probe the health endpoint. `Ok` only for a 2xx response.
    pub async fn health(&self) -> Result<()> {
        let url = self.health_url();
        let resp = self
            .get(&url)
            .send()
            .await
            .map_err(|source| SupervisorError::Transport {
                url: url.clone(),
                source,
            })?;

        if !resp.status().is_success() {
            return Err(SupervisorError::Status {
                url,
                status: resp.status().as_u16(),
            });
        }
        Ok(())
    }

    /// Health probe collapsed to reachability.
    pub async fn is_reachable(&self) -> bool {
        match self.health().await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(error = %e, "health probe failed");
                false
            }
        }
    }

    /// Fetch the remote status of one task.
    pub async fn task_status(&self, task_id: &str) -> Result<TaskStatusResponse> {
        let url = self.status_url(task_id);
        let resp = self
            .get(&url)
            .send()
            .await
            .map_err(|source| SupervisorError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(SupervisorError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let body = resp
            .bytes()
            .await
            .map_err(|source| SupervisorError::Transport {
                url: url.clone(),
                source,
            })?;

        serde_json::from_slice(&body).map_err(|e| SupervisorError::Decode {
            url,
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
pub(crate) mod test_server {
    //! Minimal HTTP/1.1 responder for exercising the client in tests.

    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// What the responder should do for a request path.
    #[derive(Clone, Debug)]
    pub enum Reply {
        Json(u16, String),
        Status(u16),
        /// Accept the connection and never answer.
        Hang,
    }

    /// Recorded request: path plus raw header block (lowercased).
    #[derive(Clone, Debug)]
    pub struct Seen {
        pub path: String,
        pub headers: String,
    }

    pub struct TestServer {
        pub addr: SocketAddr,
        pub seen: Arc<Mutex<Vec<Seen>>>,
    }

    impl TestServer {
        pub fn url(&self) -> String {
            format!("http://{}", self.addr)
        }

        pub fn paths(&self) -> Vec<String> {
            self.seen.lock().unwrap().iter().map(|s| s.path.clone()).collect()
        }
    }

    pub async fn serve<F>(router: F) -> TestServer
    where
        F: Fn(&str) -> Reply + Send + Sync + 'static,
    {
        let router = Arc::new(router);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_bg = seen.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let router = router.clone();
                let seen = seen_bg.clone();
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 8192];
                    let mut read = 0;
                    loop {
                        let n = match stream.read(&mut buf[read..]).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => n,
                        };
                        read += n;
                        if buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                            break;
                        }
                    }
                    let head = String::from_utf8_lossy(&buf[..read]).to_string();
                    let path = head
                        .lines()
                        .next()
                        .and_then(|l| l.split_whitespace().nth(1))
                        .unwrap_or("/")
                        .to_string();
                    seen.lock().unwrap().push(Seen {
                        path: path.clone(),
                        headers: head.to_lowercase(),
                    });

                    let (code, body) = match (*router)(&path) {
                        Reply::Json(code, body) => (code, body),
                        Reply::Status(code) => (code, String::new()),
                        Reply::Hang => {
                            tokio::time::sleep(Duration::from_secs(3600)).await;
                            return;
                        }
                    };
                    let resp = format!(
                        "HTTP/1.1 {} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                        code,
                        body.len(),
                        body
                    );
                    let _ = stream.write_all(resp.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        TestServer { addr, seen }
    }
}
