//! HTTP control API.
//!
//! ```text
//! GET /stats   current counter snapshot
//! PUT /update  live update, e.g. {"rps": 500}
//! ```

use std::net::SocketAddr;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, put},
    Router,
};
use serde_json::{json, Value};

use crate::error::HammerError;
use crate::hammer::HammerHandle;

#[derive(Clone)]
struct ApiState {
    hammer: HammerHandle,
}

pub fn router(hammer: HammerHandle) -> Router {
    Router::new()
        .route("/stats", get(handle_stats))
        .route("/update", put(handle_update))
        .with_state(ApiState { hammer })
}

/// Serve the API until `shutdown` resolves.
pub async fn serve(
    addr: SocketAddr,
    hammer: HammerHandle,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "API listening");
    axum::serve(listener, router(hammer))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn handle_stats(State(state): State<ApiState>) -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(state.hammer.stats_json()))
}

async fn handle_update(State(state): State<ApiState>, body: Bytes) -> (StatusCode, Json<Value>) {
    let update: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": format!("body is not JSON: {e}")})),
            )
        }
    };
    match state.hammer.update(&update) {
        Ok(()) => {
            tracing::info!(update = %update, "update applied");
            (StatusCode::OK, Json(json!({"status": "ok"})))
        }
        Err(e @ HammerError::NotRunning) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": e.to_string()})),
        ),
        Err(e) => (StatusCode::BAD_REQUEST, Json(json!({"error": e.to_string()}))),
    }
}
