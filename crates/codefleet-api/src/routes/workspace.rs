//! Workspace endpoints.
//!
//! `POST /workspace/{uri}/{revision}` splits the revision off the last path
//! segment, since the uri itself contains slashes.

use super::{NodeHeader, locate_service};
use crate::AppState;
use crate::error::ApiError;
use crate::services::{InitReport, InitRequest, WorkspaceRepo, WorkspaceServiceDefinition};
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_repo_configs))
        .route("/{*path}", post(init_workspace))
}

#[derive(Debug, Default, Deserialize)]
struct InitQuery {
    #[serde(default)]
    force: bool,
}

async fn list_repo_configs(
    State(state): State<AppState>,
) -> Result<Json<Vec<WorkspaceRepo>>, ApiError> {
    let service = state
        .registry()?
        .service_for::<WorkspaceServiceDefinition>()?;
    Ok(Json(service.repo_configs().await?))
}

async fn init_workspace(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(path): Path<String>,
    Query(query): Query<InitQuery>,
) -> Result<(NodeHeader, Json<InitReport>), ApiError> {
    let Some((uri, revision)) = path
        .rsplit_once('/')
        .filter(|(uri, revision)| !uri.is_empty() && !revision.is_empty())
    else {
        return Err(ApiError::BadRequest(format!(
            "expected /workspace/{{uri}}/{{revision}}, got /workspace/{path}"
        )));
    };

    let (node, service) = locate_service::<WorkspaceServiceDefinition>(&state, &headers, uri)?;
    let report = service
        .init(InitRequest {
            uri: uri.to_string(),
            revision: revision.to_string(),
            force: query.force,
        })
        .await?;
    Ok((node, Json(report)))
}
