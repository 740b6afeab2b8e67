mod gateway;
mod generate;
mod health;
mod metrics;
mod system;

pub use gateway::{admission_status_handler, health_snapshot_handler, telemetry_handler};
pub use generate::generate_handler;
pub use health::health_handler;
pub use metrics::metrics_handler;
pub use system::{database_handler, resources_handler};

use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::middleware::{gateway_pipeline, require_credential};
use crate::state::AppState;

// Everything except /metrics runs through the gateway pipeline; CORS is open
pub fn router(state: Arc<AppState>) -> Router {
    let open: Router<Arc<AppState>> = Router::new()
        .route("/health", get(health_handler))
        .route_layer(from_fn_with_state(state.clone(), gateway_pipeline));

    let protected: Router<Arc<AppState>> = Router::new()
        .route("/gateway/admission/{client_id}", get(admission_status_handler))
        .route("/gateway/telemetry", get(telemetry_handler))
        .route("/gateway/health", get(health_snapshot_handler))
        .route("/system/resources", get(resources_handler))
        .route("/system/database", get(database_handler))
        .route("/api/generate", post(generate_handler))
        .route_layer(from_fn_with_state(state.clone(), gateway_pipeline))
        .route_layer(from_fn_with_state(state.clone(), require_credential));

    Router::new()
        .route("/metrics", get(metrics_handler))
        .merge(open)
        .merge(protected)
        .with_state(state)
        .layer(CorsLayer::permissive())
}
