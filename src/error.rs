use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

// Failures of the cache store
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),

    // malformed payload at the cache boundary, surfaced to the caller
    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// Probe outcomes that turn into an Unhealthy status, never raised upward
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("probe failed: {0}")]
    Failure(String),
}

/// Errors visible at the HTTP surface of the gateway.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Expected outcome: the client must back off for `retry_after`.
    #[error("rate limit exceeded, retry after {retry_after:?}")]
    AdmissionRejected { retry_after: Duration },

    #[error("unauthorized")]
    Unauthorized,

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("no healthy backends available")]
    NoHealthyBackend,

    #[error("upstream request failed: {0}")]
    Upstream(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("system metrics unavailable: {0}")]
    System(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::AdmissionRejected { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::Cache(CacheError::Serialization(_)) => StatusCode::BAD_REQUEST,
            GatewayError::Cache(CacheError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::NoHealthyBackend => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Upstream(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Config(_) | GatewayError::System(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// Whole seconds, rounded up, so a client honoring the header is never early
pub fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs();
    if retry_after.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": {
                "message": self.to_string(),
                "code": status.as_u16()
            }
        }));

        let mut response = (status, body).into_response();
        if let GatewayError::AdmissionRejected { retry_after } = self {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from(retry_after_secs(retry_after)),
            );
        }
        response
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_after_rounds_up() {
        assert_eq!(retry_after_secs(Duration::from_secs(35)), 35);
        assert_eq!(retry_after_secs(Duration::from_millis(34_001)), 35);
        assert_eq!(retry_after_secs(Duration::ZERO), 0);
    }

    #[test]
    fn test_rejection_response_carries_retry_after() {
        let response = GatewayError::AdmissionRejected {
            retry_after: Duration::from_secs(35),
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "35");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(GatewayError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            GatewayError::NoHealthyBackend.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            GatewayError::Cache(CacheError::Unavailable("down".into())).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
