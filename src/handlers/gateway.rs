use axum::{
    Json,
    extract::{Path, State},
};
use std::sync::Arc;
use tokio::time::Instant;

use crate::admission::AdmissionStatus;
use crate::health::HealthReport;
use crate::state::AppState;
use crate::telemetry::{GlobalStats, STATS_KEY, TelemetryReport};

fn admission_key(client_id: &str) -> String {
    format!("admission:{}", client_id)
}

pub async fn admission_status_handler(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
) -> Json<AdmissionStatus> {
    let key = admission_key(&client_id);
    if let Some(status) = state.cache.get::<AdmissionStatus>(&key).await {
        return Json(status);
    }

    let status = state.admission.status(&client_id, Instant::now());
    if let Err(e) = state
        .cache
        .put(&key, &status, state.config.snapshot_interval)
        .await
    {
        tracing::warn!(client_id = %client_id, error = %e, "Failed to publish admission status");
    }
    Json(status)
}

pub async fn telemetry_handler(State(state): State<Arc<AppState>>) -> Json<TelemetryReport> {
    let stats = match state.cache.get::<GlobalStats>(STATS_KEY).await {
        Some(stats) => stats,
        None => {
            state
                .telemetry
                .publish(&state.cache, state.config.snapshot_ttl())
                .await
        }
    };
    Json(TelemetryReport::from(&stats))
}

pub async fn health_snapshot_handler(State(state): State<Arc<AppState>>) -> Json<HealthReport> {
    Json(state.health.current().await)
}
