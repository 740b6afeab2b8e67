//! Request pipeline: credential check, admission, then telemetry around the
//! handler.

use axum::{
    extract::{ConnectInfo, MatchedPath, Request, State},
    http::{HeaderMap, HeaderValue, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::Instant;

use crate::admission::Admission;
use crate::error::GatewayError;
use crate::metrics::{ADMISSION_REJECTED, REQUEST_LATENCY, REQUEST_TOTAL};
use crate::state::AppState;

pub const PROCESS_TIME_HEADER: &str = "x-process-time";

// First X-Forwarded-For hop, then the peer address
pub fn client_id(req: &Request) -> String {
    if let Some(forwarded) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return forwarded.to_string();
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

// "METHOD /route" keyed by the matched route so path params don't fan out
pub fn endpoint_key(req: &Request) -> String {
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str())
        .unwrap_or_else(|| req.uri().path());
    format!("{} {}", req.method(), path)
}

fn presented_credential(headers: &HeaderMap) -> Option<&str> {
    if let Some(key) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        return Some(key);
    }
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

pub async fn require_credential(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    if state.requires_credential() {
        let authorized = presented_credential(req.headers())
            .is_some_and(|key| state.credential_matches(key));
        if !authorized {
            tracing::debug!(endpoint = %endpoint_key(&req), "Missing or invalid credential");
            return GatewayError::Unauthorized.into_response();
        }
    }
    next.run(req).await
}

pub async fn gateway_pipeline(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let client = client_id(&req);
    let endpoint = endpoint_key(&req);

    if let Admission::Rejected { retry_after } = state.admission.admit(&client, Instant::now()) {
        ADMISSION_REJECTED.inc();
        return GatewayError::AdmissionRejected { retry_after }.into_response();
    }

    let started = Instant::now();
    let mut response = next.run(req).await;
    let latency = started.elapsed();

    let success = !response.status().is_server_error();
    state.telemetry.record_call(&endpoint, success, latency);

    let outcome = if success { "success" } else { "error" };
    REQUEST_TOTAL.with_label_values(&[endpoint.as_str(), outcome]).inc();
    REQUEST_LATENCY
        .with_label_values(&[endpoint.as_str()])
        .observe(latency.as_secs_f64());

    if let Ok(value) = HeaderValue::from_str(&format!("{:.6}", latency.as_secs_f64())) {
        response.headers_mut().insert(PROCESS_TIME_HEADER, value);
    }
    response
}
