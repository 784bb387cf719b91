//! API routes.

pub mod health;
pub mod internal;
pub mod repo;
pub mod setup;
pub mod workspace;

use crate::AppState;
use crate::distributed::{NodeEndpoint, RequestContext, ServiceDefinition};
use crate::error::ApiError;
use axum::Router;
use axum::http::HeaderMap;
use std::sync::Arc;

/// Response header naming the node that owns the requested repository.
pub const NODE_HEADER: &str = "x-codefleet-node";

/// Header part of a response served for a located repository.
pub(crate) type NodeHeader = [(&'static str, String); 1];

/// Locate the node that owns `uri` and fetch the handler for `D`.
pub(crate) fn locate_service<D: ServiceDefinition>(
    state: &AppState,
    headers: &HeaderMap,
    uri: &str,
) -> Result<(NodeHeader, Arc<D::Handler>), ApiError> {
    let registry = state.registry()?;
    let endpoint: NodeEndpoint = registry.locate(&RequestContext::from_headers(headers), uri);
    let service = registry.service_for::<D>()?;
    Ok(([(NODE_HEADER, endpoint.identity)], service))
}

/// Build the main API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/code", api_router())
        .merge(health::router())
        .with_state(state)
}

fn api_router() -> Router<AppState> {
    Router::new()
        .nest("/setup", setup::router())
        .nest("/repo", repo::router())
        .nest("/workspace", workspace::router())
        .nest("/internal", internal::router())
}
