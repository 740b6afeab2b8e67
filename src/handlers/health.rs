use axum::{Json, response::IntoResponse};

// liveness only; dependency health lives under /gateway/health
pub async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}
