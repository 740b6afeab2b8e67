use axum::{Json, extract::State};
use std::sync::Arc;

use crate::error::Result;
use crate::models::{GenerateRequest, GenerateResponse};
use crate::state::AppState;

pub async fn generate_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>> {
    let response = state
        .upstream
        .generate(&state.load_balancer, &payload)
        .await?;
    Ok(Json(response))
}
