use axum::{Json, extract::State};
use std::sync::Arc;

use crate::error::GatewayError;
use crate::state::AppState;
use crate::system::{DatabaseStatus, SystemResources, current_resources, database_status};

pub async fn resources_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SystemResources>, GatewayError> {
    Ok(Json(current_resources(&state.cache).await?))
}

pub async fn database_handler(State(state): State<Arc<AppState>>) -> Json<DatabaseStatus> {
    let config = &state.config;
    Json(database_status(config.database_addr.as_deref(), config.probe_timeout).await)
}
