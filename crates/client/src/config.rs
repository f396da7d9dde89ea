//! Client configuration from environment variables.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use fieldprime_shared::{ENGINE_IO_VERSION, SOCKET_IO_PATH};
use url::Url;

use crate::socket::ReconnectConfig;

pub const DEFAULT_API_URL: &str = "http://localhost:5000";
pub const DEFAULT_SOCKET_URL: &str = "http://127.0.0.1:5000";

/// Transport configuration, read once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Base URL of the REST API.
    pub api_base_url: String,
    /// Base URL of the Socket.IO server (http/https or ws/wss).
    pub socket_url: String,
    /// Default timeout for request transport calls.
    pub request_timeout: Duration,
    /// Timeout for the analysis call, which is known to be slow.
    pub analysis_timeout: Duration,
    /// How long an acquisition waits for socket data before falling back.
    pub socket_wait: Duration,
    /// Automatic retries of a timed-out load in the data loader.
    pub max_retries: u32,
    pub reconnect: ReconnectConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            socket_url: DEFAULT_SOCKET_URL.to_string(),
            request_timeout: Duration::from_secs(30),
            analysis_timeout: Duration::from_secs(60),
            socket_wait: Duration::from_millis(5000),
            max_retries: 2,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Build the configuration from environment variables.
    ///
    /// Environment variables (all optional):
    /// - `FIELDPRIME_API_URL`: REST base URL (default: "http://localhost:5000")
    /// - `FIELDPRIME_SOCKET_URL`: socket base URL (default: "http://127.0.0.1:5000")
    /// - `FIELDPRIME_REQUEST_TIMEOUT_MS`: default request timeout (default: 30000)
    /// - `FIELDPRIME_ANALYSIS_TIMEOUT_MS`: analysis timeout (default: 60000)
    /// - `FIELDPRIME_SOCKET_WAIT_MS`: socket wait before fallback (default: 5000)
    /// - `FIELDPRIME_MAX_RETRIES`: loader retries on timeout (default: 2)
    /// - `FIELDPRIME_RECONNECT_ATTEMPTS`: socket reconnect ceiling (default: 5)
    /// - `FIELDPRIME_RECONNECT_DELAY_MS`: delay between reconnects (default: 1000)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let millis = |key: &str, default: Duration| -> Result<Duration> {
            match lookup(key) {
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_millis)
                    .with_context(|| format!("{key} must be a number of milliseconds, got {raw:?}")),
                None => Ok(default),
            }
        };
        let count = |key: &str, default: u32| -> Result<u32> {
            match lookup(key) {
                Some(raw) => raw
                    .trim()
                    .parse::<u32>()
                    .with_context(|| format!("{key} must be a non-negative integer, got {raw:?}")),
                None => Ok(default),
            }
        };

        Ok(Self {
            api_base_url: lookup("FIELDPRIME_API_URL").unwrap_or(defaults.api_base_url),
            socket_url: lookup("FIELDPRIME_SOCKET_URL").unwrap_or(defaults.socket_url),
            request_timeout: millis("FIELDPRIME_REQUEST_TIMEOUT_MS", defaults.request_timeout)?,
            analysis_timeout: millis("FIELDPRIME_ANALYSIS_TIMEOUT_MS", defaults.analysis_timeout)?,
            socket_wait: millis("FIELDPRIME_SOCKET_WAIT_MS", defaults.socket_wait)?,
            max_retries: count("FIELDPRIME_MAX_RETRIES", defaults.max_retries)?,
            reconnect: ReconnectConfig {
                max_attempts: count(
                    "FIELDPRIME_RECONNECT_ATTEMPTS",
                    defaults.reconnect.max_attempts,
                )?,
                delay: millis("FIELDPRIME_RECONNECT_DELAY_MS", defaults.reconnect.delay)?,
            },
        })
    }

    /// WebSocket URL of the Socket.IO endpoint derived from `socket_url`.
    pub fn socket_endpoint(&self) -> Result<String> {
        let mut url = Url::parse(&self.socket_url)
            .with_context(|| format!("invalid socket url {:?}", self.socket_url))?;

        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => bail!("unsupported socket scheme {other:?}"),
        };
        url.set_scheme(scheme)
            .map_err(|_| anyhow!("cannot switch {:?} to {scheme}", self.socket_url))?;
        url.set_path(SOCKET_IO_PATH);
        url.query_pairs_mut()
            .clear()
            .append_pair("EIO", &ENGINE_IO_VERSION.to_string())
            .append_pair("transport", "websocket");

        Ok(url.into())
    }
}
