use lazy_static::lazy_static;
use prometheus::{
    Encoder, GaugeVec, HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder,
    register_gauge_vec, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge,
};

lazy_static! {
    pub static ref REQUEST_TOTAL: IntCounterVec = register_int_counter_vec!(
        "gateway_requests_total",
        "Total number of handled requests",
        &["endpoint", "outcome"]
    )
    .expect("register gateway_requests_total");
    pub static ref REQUEST_LATENCY: HistogramVec = register_histogram_vec!(
        "gateway_request_latency_seconds",
        "Handler latency in seconds",
        &["endpoint"],
        vec![0.005, 0.025, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0]
    )
    .expect("register gateway_request_latency_seconds");
    pub static ref ADMISSION_REJECTED: IntCounter = register_int_counter!(
        "gateway_admission_rejected_total",
        "Requests rejected by the admission controller"
    )
    .expect("register gateway_admission_rejected_total");
    pub static ref TRACKED_CLIENTS: IntGauge = register_int_gauge!(
        "gateway_admission_clients",
        "Clients with live admission windows"
    )
    .expect("register gateway_admission_clients");
    pub static ref CACHE_HITS: IntCounter =
        register_int_counter!("gateway_cache_hits_total", "Total cache hits")
            .expect("register gateway_cache_hits_total");
    pub static ref CACHE_MISSES: IntCounter =
        register_int_counter!("gateway_cache_misses_total", "Total cache misses")
            .expect("register gateway_cache_misses_total");
    pub static ref CACHE_SIZE: IntGauge =
        register_int_gauge!("gateway_cache_size", "Current number of items in cache")
            .expect("register gateway_cache_size");
    pub static ref COMPONENT_HEALTH: GaugeVec = register_gauge_vec!(
        "gateway_component_health",
        "Downstream component health (1=healthy, 0=unhealthy or unknown)",
        &["component"]
    )
    .expect("register gateway_component_health");
}

// Render the default registry in Prometheus text format
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
