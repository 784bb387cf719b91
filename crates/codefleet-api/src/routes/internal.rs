//! Node-to-node endpoints: the liveness check and forwarded service calls.

use crate::AppState;
use crate::distributed::{LivenessToken, TOKEN_HEADER};
use crate::error::ApiError;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/check", get(check))
        .route("/{service}/{method}", post(call))
}

#[derive(Debug, Deserialize)]
struct CheckQuery {
    token: String,
}

/// Answers whether the probing process is this one.
async fn check(
    State(state): State<AppState>,
    Query(query): Query<CheckQuery>,
) -> Result<Json<Value>, ApiError> {
    let token = LivenessToken::parse(&query.token)
        .filter(|token| state.verify(token))
        .ok_or_else(|| {
            warn!("Rejected liveness probe with an invalid token");
            ApiError::Unauthorized("invalid liveness token".to_string())
        })?;
    Ok(Json(json!({ "me": state.is_self(&token) })))
}

async fn call(
    State(state): State<AppState>,
    Path((service, method)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let authorized = headers
        .get(TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(LivenessToken::parse)
        .is_some_and(|token| state.verify(&token));
    if !authorized {
        return Err(ApiError::Unauthorized("invalid node token".to_string()));
    }

    let registry = state.registry()?;
    if !registry.role().runs_jobs() {
        return Err(ApiError::Unavailable(format!(
            "{} does not serve forwarded calls",
            registry.role().name()
        )));
    }

    debug!(%service, %method, "Serving forwarded call");
    Ok(Json(registry.dispatch(&service, &method, body).await?))
}
