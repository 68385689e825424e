//! # Proxy Gateway
//!
//! Validated pass-through of arbitrary versioned API calls to Spoolman on
//! behalf of a caller. The gateway holds no state of its own; it is gated on
//! the stream's liveness flag and maps transport/HTTP failures to
//! caller-visible errors.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;

use crate::retrieve::spoolman_http::SpoolmanClient;

/// Caller-visible errors from the proxy gateway.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),
    #[error("GET requests cannot have a body")]
    BodyWithGet,
    #[error("Invalid path, must start with the API version, e.g. /v1")]
    InvalidPath,
    /// The streaming connection is down; calls fail fast instead of timing out.
    #[error("Spoolman server not available")]
    NotAvailable,
    /// Spoolman answered with a non-success status.
    #[error("{message}")]
    Http { status: u16, message: String },
    /// The request could not be delivered at all.
    #[error("Spoolman request failed: {0}")]
    Transport(String),
}

/// A request to forward to the Spoolman API.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyRequest {
    /// HTTP method name; one of GET, POST, PUT, PATCH, DELETE.
    pub request_method: String,
    /// Path starting with the API version prefix, e.g. `/v1/spool`.
    pub path: String,
    /// Optional raw query string, appended verbatim.
    #[serde(default)]
    pub query: Option<String>,
    /// Optional JSON body, forwarded verbatim. Not allowed with GET.
    #[serde(default)]
    pub body: Option<Value>,
}

/// Stateless pass-through gateway to the Spoolman API.
pub struct ProxyGateway {
    client: Arc<SpoolmanClient>,
    connected: Arc<AtomicBool>,
}

impl ProxyGateway {
    pub fn new(client: Arc<SpoolmanClient>, connected: Arc<AtomicBool>) -> Self {
        Self { client, connected }
    }

    /// Validates and forwards one request, returning the decoded response
    /// body. All input validation happens before any network activity.
    pub async fn forward(&self, request: ProxyRequest) -> Result<Value, ProxyError> {
        let method = match request.request_method.as_str() {
            "GET" => Method::GET,
            "POST" => Method::POST,
            "PUT" => Method::PUT,
            "PATCH" => Method::PATCH,
            "DELETE" => Method::DELETE,
            other => return Err(ProxyError::InvalidMethod(other.to_string())),
        };
        if request.body.is_some() && method == Method::GET {
            return Err(ProxyError::BodyWithGet);
        }
        if !request.path.starts_with("/v1/") {
            return Err(ProxyError::InvalidPath);
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ProxyError::NotAvailable);
        }
        let path_and_query = match &request.query {
            Some(query) => format!("{}?{}", request.path, query),
            None => request.path.clone(),
        };
        log::debug!("Proxying {method} request to {path_and_query}");
        let response = self
            .client
            .forward(method, &path_and_query, request.body)
            .await
            .map_err(|e| ProxyError::Transport(format!("{e:#}")))?;
        if !response.success {
            return Err(ProxyError::Http {
                status: response.status,
                message: response.error_summary(),
            });
        }
        Ok(response.data.unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::RawQuery;
    use axum::http::StatusCode;
    use axum::routing::{delete, get};
    use axum::{Json, Router};
    use serde_json::json;

    use crate::config::SpoolmanConfig;

    fn gateway_for(server: &str, connected: bool) -> ProxyGateway {
        let config = SpoolmanConfig {
            server: server.to_string(),
            ..Default::default()
        };
        let urls = config.resolve_urls().unwrap();
        let client = Arc::new(SpoolmanClient::new(&urls, &config).unwrap());
        ProxyGateway::new(client, Arc::new(AtomicBool::new(connected)))
    }

    fn request(method: &str, path: &str, body: Option<Value>) -> ProxyRequest {
        ProxyRequest {
            request_method: method.to_string(),
            path: path.to_string(),
            query: None,
            body,
        }
    }

    #[tokio::test]
    async fn test_rejects_invalid_method_before_network() {
        // The endpoint does not exist; a network attempt would error differently.
        let gw = gateway_for("127.0.0.1:1", true);
        let err = gw.forward(request("TRACE", "/v1/spool", None)).await.unwrap_err();
        assert!(matches!(err, ProxyError::InvalidMethod(m) if m == "TRACE"));
    }

    #[tokio::test]
    async fn test_rejects_get_with_body_before_network() {
        let gw = gateway_for("127.0.0.1:1", true);
        let err = gw
            .forward(request("GET", "/v1/spool", Some(json!({"x": 1}))))
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::BodyWithGet));
    }

    #[tokio::test]
    async fn test_rejects_unversioned_path() {
        let gw = gateway_for("127.0.0.1:1", true);
        for path in ["/spool", "/v1", "v1/spool", "/v2/spool"] {
            let err = gw.forward(request("GET", path, None)).await.unwrap_err();
            assert!(matches!(err, ProxyError::InvalidPath), "path {path:?}");
        }
    }

    #[tokio::test]
    async fn test_disconnected_fails_fast_with_unavailable() {
        let gw = gateway_for("127.0.0.1:1", false);
        let err = gw.forward(request("GET", "/v1/spool/1", None)).await.unwrap_err();
        assert!(matches!(err, ProxyError::NotAvailable));
    }

    #[tokio::test]
    async fn test_forwards_path_query_and_returns_body() {
        let router = Router::new().route(
            "/api/v1/spool",
            get(|RawQuery(query): RawQuery| async move {
                Json(json!({"spools": [], "echo_query": query}))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let gw = gateway_for(&format!("http://{addr}"), true);
        let mut req = request("GET", "/v1/spool", None);
        req.query = Some("allow_archived=false".to_string());
        let value = gw.forward(req).await.unwrap();
        assert_eq!(value["echo_query"], json!("allow_archived=false"));
    }

    #[tokio::test]
    async fn test_remote_error_status_surfaces_to_caller() {
        let router = Router::new().route(
            "/api/v1/spool/{id}",
            delete(|| async {
                (StatusCode::CONFLICT, Json(json!({"message": "spool is in use"})))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let gw = gateway_for(&format!("http://{addr}"), true);
        let err = gw
            .forward(request("DELETE", "/v1/spool/12", None))
            .await
            .unwrap_err();
        match err {
            ProxyError::Http { status, message } => {
                assert_eq!(status, 409);
                assert!(message.contains("spool is in use"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
