//! # Spoolman REST Client
//!
//! A small asynchronous client for the versioned Spoolman HTTP API, built on
//! `reqwest`. Non-2xx statuses are captured in the [`ApiResponse`] envelope
//! instead of being raised, so callers can react to specific codes (404 in
//! particular) without unwinding.

// Re-exported so callers of `forward` need no reqwest dependency of their own.
pub use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::{ResolvedUrls, SpoolmanConfig};

/// A standardized container for Spoolman API responses.
///
/// Wraps the deserialized body (when the request succeeded) together with the
/// HTTP status metadata, so that error classification stays with the caller.
#[derive(Debug)]
pub struct ApiResponse<T> {
    /// The deserialized response body, present on success when the body parsed.
    pub data: Option<T>,
    /// The raw error body returned by the server if the request failed.
    pub error_body: Option<String>,
    /// The numeric HTTP status code.
    pub status: u16,
    /// Indicates if the status code was in the 2xx range.
    pub success: bool,
}

impl<T> ApiResponse<T> {
    /// Builds a log-friendly description of a failed response, enriched with
    /// the Spoolman `message` field when the error body carries one.
    pub fn error_summary(&self) -> String {
        let mut msg = format!("HTTP error: {}", self.status);
        if let Some(body) = &self.error_body {
            if let Ok(parsed) = serde_json::from_str::<Value>(body) {
                if let Some(text) = parsed.get("message").and_then(Value::as_str) {
                    msg.push_str(&format!(", Spoolman message: {text}"));
                }
            }
        }
        msg
    }
}

/// Asynchronous client for one Spoolman instance.
pub struct SpoolmanClient {
    /// The underlying reqwest client, configured with the engine's timeouts.
    inner: reqwest::Client,
    /// HTTP API base, e.g. `http://host:7912/api`.
    http_base: String,
    /// Short request bound for the post-connect liveness check.
    check_request_timeout: std::time::Duration,
}

impl SpoolmanClient {
    /// Creates a new client from resolved endpoint URLs and timing configuration.
    pub fn new(urls: &ResolvedUrls, config: &SpoolmanConfig) -> anyhow::Result<Self> {
        let inner = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            inner,
            http_base: urls.http_base.clone(),
            check_request_timeout: config.check_request_timeout,
        })
    }

    /// The HTTP API base this client targets.
    pub fn http_base(&self) -> &str {
        &self.http_base
    }

    /// Fetch-by-id used by the liveness check. Runs under the short check
    /// timeout; a 404 is reported through the envelope, not as an error.
    pub async fn get_spool(&self, spool_id: i64) -> anyhow::Result<ApiResponse<Value>> {
        let url = format!("{}/v1/spool/{}", self.http_base, spool_id);
        let request = self.inner.get(url).timeout(self.check_request_timeout);
        Self::execute(request).await
    }

    /// Reports accumulated filament usage for a spool via
    /// `PUT /v1/spool/{id}/use`.
    pub async fn report_usage(
        &self,
        spool_id: i64,
        use_length: f64,
    ) -> anyhow::Result<ApiResponse<Value>> {
        let url = format!("{}/v1/spool/{}/use", self.http_base, spool_id);
        let request = self
            .inner
            .put(url)
            .json(&serde_json::json!({ "use_length": use_length }));
        Self::execute(request).await
    }

    /// Forwards an arbitrary request to the API base. `path_and_query` must
    /// already carry the version prefix; the body is sent verbatim as JSON.
    pub async fn forward(
        &self,
        method: Method,
        path_and_query: &str,
        body: Option<Value>,
    ) -> anyhow::Result<ApiResponse<Value>> {
        let url = format!("{}{}", self.http_base, path_and_query);
        let mut request = self.inner.request(method, url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        Self::execute(request).await
    }

    /// Executes a prepared request and folds the response into the envelope.
    ///
    /// Transport failures (connect, timeout) surface as errors; any HTTP
    /// status comes back as an `ApiResponse`. A success body that is not
    /// valid JSON yields `data: None` rather than an error, since some
    /// endpoints respond with an empty body.
    async fn execute<T>(request: reqwest::RequestBuilder) -> anyhow::Result<ApiResponse<T>>
    where
        T: DeserializeOwned,
    {
        let response = request.send().await?;
        let status = response.status();
        let success = status.is_success();
        let text = response.text().await.unwrap_or_default();
        if success {
            Ok(ApiResponse {
                data: serde_json::from_str(&text).ok(),
                error_body: None,
                status: status.as_u16(),
                success: true,
            })
        } else {
            Ok(ApiResponse {
                data: None,
                error_body: (!text.is_empty()).then_some(text),
                status: status.as_u16(),
                success: false,
            })
        }
    }
}
