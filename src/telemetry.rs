// Per-endpoint counters, each updated as one unit under its map shard

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};

use crate::cache::TtlCache;

pub const STATS_KEY: &str = "api_stats";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointStat {
    pub total_calls: u64,
    pub error_calls: u64,
    #[serde(rename = "total_latency_us", with = "micros")]
    pub total_latency: Duration,
}

impl EndpointStat {
    pub fn success_calls(&self) -> u64 {
        self.total_calls - self.error_calls
    }

    // Derived on every read
    pub fn avg_latency(&self) -> Duration {
        if self.total_calls == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos((self.total_latency.as_nanos() / self.total_calls as u128) as u64)
    }
}

/// Point-in-time copy of every endpoint's counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalStats {
    pub total_requests: u64,
    pub total_errors: u64,
    pub per_endpoint: BTreeMap<String, EndpointStat>,
    pub generated_at: DateTime<Utc>,
}

impl GlobalStats {
    pub fn error_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.total_errors as f64 / self.total_requests as f64 * 100.0
        }
    }
}

// Read-side view with the derived figures filled in
#[derive(Debug, Clone, Serialize)]
pub struct EndpointReport {
    pub total_calls: u64,
    pub error_calls: u64,
    pub success_calls: u64,
    pub total_latency_ms: f64,
    pub avg_latency_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TelemetryReport {
    pub total_requests: u64,
    pub total_errors: u64,
    pub error_rate: f64,
    pub endpoints: BTreeMap<String, EndpointReport>,
    pub generated_at: DateTime<Utc>,
}

impl From<&GlobalStats> for TelemetryReport {
    fn from(stats: &GlobalStats) -> Self {
        let endpoints = stats
            .per_endpoint
            .iter()
            .map(|(key, stat)| {
                let report = EndpointReport {
                    total_calls: stat.total_calls,
                    error_calls: stat.error_calls,
                    success_calls: stat.success_calls(),
                    total_latency_ms: stat.total_latency.as_secs_f64() * 1000.0,
                    avg_latency_ms: stat.avg_latency().as_secs_f64() * 1000.0,
                };
                (key.clone(), report)
            })
            .collect();

        Self {
            total_requests: stats.total_requests,
            total_errors: stats.total_errors,
            error_rate: stats.error_rate(),
            endpoints,
            generated_at: stats.generated_at,
        }
    }
}

#[derive(Default)]
pub struct TelemetryAggregator {
    endpoints: DashMap<String, EndpointStat>,
}

impl TelemetryAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_call(&self, endpoint_key: &str, success: bool, latency: Duration) {
        // fast path avoids allocating the key for known endpoints
        if let Some(mut stat) = self.endpoints.get_mut(endpoint_key) {
            apply(&mut stat, success, latency);
            return;
        }
        let mut stat = self.endpoints.entry(endpoint_key.to_string()).or_default();
        apply(&mut stat, success, latency);
    }

    pub fn snapshot(&self) -> GlobalStats {
        let mut per_endpoint = BTreeMap::new();
        let mut total_requests = 0;
        let mut total_errors = 0;

        for entry in self.endpoints.iter() {
            let stat = entry.value().clone();
            total_requests += stat.total_calls;
            total_errors += stat.error_calls;
            per_endpoint.insert(entry.key().clone(), stat);
        }

        GlobalStats {
            total_requests,
            total_errors,
            per_endpoint,
            generated_at: Utc::now(),
        }
    }

    pub async fn publish(&self, cache: &TtlCache, ttl: Duration) -> GlobalStats {
        let stats = self.snapshot();
        if let Err(e) = cache.put(STATS_KEY, &stats, ttl).await {
            tracing::warn!(error = %e, "Failed to publish telemetry snapshot");
        }
        stats
    }
}

fn apply(stat: &mut EndpointStat, success: bool, latency: Duration) {
    stat.total_calls += 1;
    if !success {
        stat.error_calls += 1;
    }
    stat.total_latency += latency;
}

// Push snapshots until shutdown is signalled
pub async fn run_publisher(
    aggregator: Arc<TelemetryAggregator>,
    cache: TtlCache,
    push_interval: Duration,
    ttl: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(push_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(interval = ?push_interval, "Telemetry publisher started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                aggregator.publish(&cache, ttl).await;
            }
            _ = shutdown.changed() => break,
        }
    }

    tracing::info!("Telemetry publisher stopped");
}

mod micros {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_micros() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_micros)
    }
}
