//! Health check endpoints.

use crate::AppState;
use crate::distributed::NodeRole;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(ready))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn ready(State(state): State<AppState>) -> Response {
    let Ok(registry) = state.registry() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "starting" })),
        )
            .into_response();
    };

    let role = registry.role();
    let degraded = matches!(role, NodeRole::Satellite { degraded: true, .. });
    Json(json!({
        "status": "ready",
        "role": role.name(),
        "degraded": degraded,
    }))
    .into_response()
}
