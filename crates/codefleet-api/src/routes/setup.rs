use crate::AppState;
use crate::error::ApiError;
use crate::services::{SetupServiceDefinition, SetupStatus};
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(setup))
}

async fn setup(State(state): State<AppState>) -> Result<Json<SetupStatus>, ApiError> {
    let service = state.registry()?.service_for::<SetupServiceDefinition>()?;
    Ok(Json(service.setup().await?))
}
