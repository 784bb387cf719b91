//! Repository endpoints.
//!
//! Repository uris contain slashes, so everything below `/repo/` is one
//! wildcard and the `index/` and `status/` prefixes are split off here.

use super::{NodeHeader, locate_service};
use crate::AppState;
use crate::error::ApiError;
use crate::services::{
    CloneRequest, IndexRequest, JobAccepted, RepositoryRequest, RepositoryService,
    RepositoryServiceDefinition, RepositoryStatus,
};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use codefleet_core::RepositoryUri;
use serde::Deserialize;
use std::sync::Arc;

pub fn router() -> Router<AppState> {
    Router::new().route("/", post(clone_repository)).route(
        "/{*path}",
        post(post_by_path)
            .get(get_by_path)
            .delete(delete_repository),
    )
}

#[derive(Debug, Default, Deserialize)]
struct IndexBody {
    #[serde(default)]
    revision: Option<String>,
    #[serde(default)]
    reindex: bool,
}

type Accepted = (StatusCode, NodeHeader, Json<JobAccepted>);

fn repository_service(
    state: &AppState,
    headers: &HeaderMap,
    uri: &str,
) -> Result<(NodeHeader, Arc<dyn RepositoryService>), ApiError> {
    locate_service::<RepositoryServiceDefinition>(state, headers, uri)
}

async fn clone_repository(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CloneRequest>,
) -> Result<Accepted, ApiError> {
    let uri = RepositoryUri::from_url(&request.url)?;
    let (node, service) = repository_service(&state, &headers, uri.as_str())?;
    let accepted = service.clone_repository(request).await?;
    Ok((StatusCode::ACCEPTED, node, Json(accepted)))
}

async fn delete_repository(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(uri): Path<String>,
) -> Result<Accepted, ApiError> {
    let (node, service) = repository_service(&state, &headers, &uri)?;
    let accepted = service.delete_repository(RepositoryRequest { uri }).await?;
    Ok((StatusCode::ACCEPTED, node, Json(accepted)))
}

async fn post_by_path(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(path): Path<String>,
    body: Bytes,
) -> Result<Accepted, ApiError> {
    let Some(uri) = path.strip_prefix("index/") else {
        return Err(ApiError::NotFound(format!("no route for /api/code/repo/{path}")));
    };

    let body: IndexBody = if body.is_empty() {
        IndexBody::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?
    };

    let (node, service) = repository_service(&state, &headers, uri)?;
    let accepted = service
        .index_repository(IndexRequest {
            uri: uri.to_string(),
            revision: body.revision,
            reindex: body.reindex,
        })
        .await?;
    Ok((StatusCode::ACCEPTED, node, Json(accepted)))
}

/// `GET /repo/status/{uri}`, or `GET /repo/{uri}` for the same record.
async fn get_by_path(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(path): Path<String>,
) -> Result<(NodeHeader, Json<RepositoryStatus>), ApiError> {
    let uri = path.strip_prefix("status/").unwrap_or(&path);
    let (node, service) = repository_service(&state, &headers, uri)?;
    let status = service
        .status(RepositoryRequest {
            uri: uri.to_string(),
        })
        .await?;
    Ok((node, Json(status)))
}
