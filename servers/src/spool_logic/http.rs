use crate::spool_logic::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use lib_spool::{ProxyError, ProxyRequest};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use tokio::sync::broadcast;

pub async fn run(port: u16, app_state: AppState, mut shutdown: broadcast::Receiver<()>) {
    let app = Router::new()
        .route(
            "/server/spoolman/spool_id",
            get(get_spool_id).post(post_spool_id),
        )
        .route("/server/spoolman/proxy", axum::routing::post(proxy_handler))
        .route("/health", get(health_handler))
        .with_state(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    log::info!("Spool server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind server port");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.recv().await.ok();
            log::info!("Spool server shutting down.");
        })
        .await
        .expect("Server error");
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "spoolman_connected": state.stream.connected(),
        "pending_mm": state.accumulator.pending().await,
    }))
}

async fn get_spool_id(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "spool_id": state.active.active_id().await }))
}

#[derive(Debug, Deserialize)]
struct SpoolIdRequest {
    // Absent and null both clear the selection.
    #[serde(default)]
    spool_id: Option<i64>,
}

async fn post_spool_id(
    State(state): State<AppState>,
    Json(request): Json<SpoolIdRequest>,
) -> impl IntoResponse {
    state.active.set_active(request.spool_id).await;
    Json(json!({ "spool_id": state.active.active_id().await }))
}

async fn proxy_handler(
    State(state): State<AppState>,
    Json(request): Json<ProxyRequest>,
) -> impl IntoResponse {
    match state.gateway.forward(request).await {
        Ok(value) => (StatusCode::OK, Json(value)).into_response(),
        Err(e) => proxy_error_response(e).into_response(),
    }
}

/// Maps gateway errors onto HTTP statuses for the caller.
fn proxy_error_response(error: ProxyError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match &error {
        ProxyError::InvalidMethod(_) | ProxyError::BodyWithGet | ProxyError::InvalidPath => {
            StatusCode::BAD_REQUEST
        }
        ProxyError::NotAvailable => StatusCode::SERVICE_UNAVAILABLE,
        ProxyError::Http { status, .. } => {
            StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
        }
        ProxyError::Transport(_) => StatusCode::BAD_GATEWAY,
    };
    (status, Json(json!({ "error": error.to_string() })))
}
