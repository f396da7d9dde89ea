//! HTTP client for the analytics backend's REST endpoints.

use std::time::Duration;

use async_trait::async_trait;
use fieldprime_shared::{check_outcome, ApiError, ExportRequest, HealthIndex, ReportRequest};
use reqwest::{Client, RequestBuilder};
use serde::Serialize;
use serde_json::Value;

use crate::config::ClientConfig;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const ANALYSIS_TIMEOUT: Duration = Duration::from_secs(60);

/// The request/response transport the acquisition layer falls back to.
///
/// Every call resolves to the raw response payload or an [`ApiError`]; the
/// caller decides whether to retry.
#[async_trait]
pub trait RequestTransport: Send + Sync {
    /// Fetch the current full-state snapshot.
    async fn load_snapshot(&self) -> Result<Value, ApiError>;

    /// Trigger the server-side analysis. Slow; uses the extended timeout and
    /// reports [`ApiError::Timeout`] when it expires.
    async fn run_analysis(&self) -> Result<Value, ApiError>;

    /// Fetch the spectral signature of one pixel.
    async fn get_spectral_signature(
        &self,
        x: u32,
        y: u32,
        crop_type: Option<&str>,
    ) -> Result<Value, ApiError>;
}

/// reqwest-backed [`RequestTransport`].
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    default_timeout: Duration,
    analysis_timeout: Duration,
}

impl ApiClient {
    /// Create a new API client
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            base_url: String::new(),
            default_timeout: DEFAULT_TIMEOUT,
            analysis_timeout: ANALYSIS_TIMEOUT,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new()
            .with_base_url(config.api_base_url.clone())
            .with_timeouts(config.request_timeout, config.analysis_timeout)
    }

    /// Set the base URL for API requests
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeouts(mut self, default_timeout: Duration, analysis_timeout: Duration) -> Self {
        self.default_timeout = default_timeout;
        self.analysis_timeout = analysis_timeout;
        self
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if self.base_url.is_empty() {
            if path.starts_with('/') {
                path.to_string()
            } else {
                format!("/{path}")
            }
        } else {
            let base = self.base_url.trim_end_matches('/');
            let path = path.trim_start_matches('/');
            format!("{base}/{path}")
        }
    }

    /// Send a request and decode the payload.
    ///
    /// `operation` names the call in timeout errors so callers can tell a
    /// slow analysis apart from an unreachable server.
    async fn send(
        &self,
        operation: &str,
        rb: RequestBuilder,
        timeout: Duration,
    ) -> Result<Value, ApiError> {
        let map_err = |e: reqwest::Error| {
            if e.is_timeout() {
                ApiError::Timeout {
                    operation: operation.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                }
            } else {
                ApiError::Network(e.to_string())
            }
        };

        let resp = rb.timeout(timeout).send().await.map_err(map_err)?;

        let status = resp.status().as_u16();
        let is_success = resp.status().is_success();
        let text = resp.text().await.map_err(map_err)?;

        if !is_success {
            return Err(ApiError::Http { status, body: text });
        }

        let payload = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).map_err(|e| ApiError::Deserialize(e.to_string()))?
        };
        check_outcome(payload, rejection_message(operation))
    }

    /// GET with the default timeout.
    pub async fn get_json(&self, operation: &str, path: &str) -> Result<Value, ApiError> {
        self.get_json_with_timeout(operation, path, self.default_timeout)
            .await
    }

    pub async fn get_json_with_timeout(
        &self,
        operation: &str,
        path: &str,
        timeout: Duration,
    ) -> Result<Value, ApiError> {
        let url = self.url(path);
        crate::log_debug!("GET {}", url);
        self.send(operation, self.client.get(&url), timeout).await
    }

    /// POST a JSON body with the default timeout.
    pub async fn post_json<TReq: Serialize>(
        &self,
        operation: &str,
        path: &str,
        body: &TReq,
    ) -> Result<Value, ApiError> {
        let url = self.url(path);
        crate::log_debug!("POST {}", url);
        let rb = self.client.post(&url).json(body);
        self.send(operation, rb, self.default_timeout).await
    }

    /// Render a vegetation health map.
    pub async fn get_healthmap(&self, index: HealthIndex) -> Result<Value, ApiError> {
        self.get_json(
            "get_healthmap",
            &format!("/api/get_healthmap?index_type={}", index.as_str()),
        )
        .await
    }

    /// Generate the agricultural report.
    pub async fn generate_report(&self, request: &ReportRequest) -> Result<Value, ApiError> {
        self.post_json("generate_report", "/api/generate_report", request)
            .await
    }

    /// Export the current dataset.
    pub async fn export_data(&self, request: &ExportRequest) -> Result<Value, ApiError> {
        self.post_json("export_data", "/api/export_data", request)
            .await
    }
}

impl Default for ApiClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Error text for a `success: false` reply to `operation` that carries no
/// message.
fn rejection_message(operation: &str) -> &'static str {
    match operation {
        "load_data" => "Error loading data",
        "run_analysis" => "Error running analysis",
        "get_spectral_signature" => "Error getting spectral data",
        "get_healthmap" => "Error loading health map",
        "generate_report" => "Error generating report",
        "export_data" => "Error exporting data",
        _ => "Request failed",
    }
}

/// Path and query of the spectral signature endpoint.
///
/// `crop_type` is omitted from the query when absent.
fn spectral_path(x: u32, y: u32, crop_type: Option<&str>) -> String {
    let mut path = format!("/api/get_spectral_signature?x={x}&y={y}");
    if let Some(crop) = crop_type {
        path.push_str("&crop_type=");
        path.push_str(&urlencoding::encode(crop));
    }
    path
}

#[async_trait]
impl RequestTransport for ApiClient {
    async fn load_snapshot(&self) -> Result<Value, ApiError> {
        self.get_json("load_data", "/api/load_data").await
    }

    async fn run_analysis(&self) -> Result<Value, ApiError> {
        self.get_json_with_timeout("run_analysis", "/api/run_analysis", self.analysis_timeout)
            .await
    }

    async fn get_spectral_signature(
        &self,
        x: u32,
        y: u32,
        crop_type: Option<&str>,
    ) -> Result<Value, ApiError> {
        self.get_json("get_spectral_signature", &spectral_path(x, y, crop_type))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joining() {
        let client = ApiClient::new().with_base_url("http://localhost:5000/");
        assert_eq!(
            client.url("/api/load_data"),
            "http://localhost:5000/api/load_data"
        );
        assert_eq!(
            client.url("api/run_analysis"),
            "http://localhost:5000/api/run_analysis"
        );
        assert_eq!(
            client.url("https://elsewhere.io/api/x"),
            "https://elsewhere.io/api/x"
        );

        let relative = ApiClient::new();
        assert_eq!(relative.url("api/load_data"), "/api/load_data");
    }

    #[test]
    fn test_spectral_path() {
        assert_eq!(
            spectral_path(12, 40, None),
            "/api/get_spectral_signature?x=12&y=40"
        );
        assert_eq!(
            spectral_path(0, 1, Some("winter wheat")),
            "/api/get_spectral_signature?x=0&y=1&crop_type=winter%20wheat"
        );
    }

    #[test]
    fn test_rejection_message_per_operation() {
        assert_eq!(rejection_message("load_data"), "Error loading data");
        assert_eq!(rejection_message("run_analysis"), "Error running analysis");
        assert_eq!(rejection_message("unknown"), "Request failed");
    }

    #[test]
    fn test_from_config_timeouts() {
        let config = ClientConfig {
            request_timeout: Duration::from_secs(5),
            analysis_timeout: Duration::from_secs(90),
            ..ClientConfig::default()
        };
        let client = ApiClient::from_config(&config);
        assert_eq!(client.default_timeout, Duration::from_secs(5));
        assert_eq!(client.analysis_timeout, Duration::from_secs(90));
        assert_eq!(client.base_url, "http://localhost:5000");
    }
}
