//! Health monitoring of downstream dependencies. Each check runs under its
//! own timeout; a failing or hanging one only marks its component unhealthy.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, watch};
use tokio::time::{Instant, MissedTickBehavior, interval, timeout};

use crate::cache::{CacheBackend, TtlCache};
use crate::error::ProbeError;
use crate::load_balancer::Backend;
use crate::metrics::COMPONENT_HEALTH;

pub const HEALTH_KEY: &str = "service_health";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub component: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub latency_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// Aggregated record published under [`HEALTH_KEY`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub components: Vec<HealthSnapshot>,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn from_snapshots(components: Vec<HealthSnapshot>) -> Self {
        let status = if components.is_empty() {
            HealthStatus::Unknown
        } else if components.iter().all(|c| c.status == HealthStatus::Healthy) {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };

        Self {
            status,
            components,
            checked_at: Utc::now(),
        }
    }
}

/// A liveness check against one downstream dependency.
#[async_trait]
pub trait Probe: Send + Sync {
    fn name(&self) -> &str;

    async fn check(&self) -> Result<(), ProbeError>;

    // Called when the monitor drops a check that ran past its timeout
    fn timed_out(&self) {}
}

// Cache backend reachability
pub struct CacheProbe {
    backend: Arc<dyn CacheBackend>,
}

impl CacheProbe {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Probe for CacheProbe {
    fn name(&self) -> &str {
        "cache"
    }

    async fn check(&self) -> Result<(), ProbeError> {
        self.backend
            .ping()
            .await
            .map_err(|e| ProbeError::Failure(e.to_string()))
    }
}

// Persistence backend liveness: the listener accepts a connection
pub struct TcpProbe {
    name: String,
    addr: String,
}

impl TcpProbe {
    pub fn new(name: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            addr: addr.into(),
        }
    }
}

#[async_trait]
impl Probe for TcpProbe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self) -> Result<(), ProbeError> {
        TcpStream::connect(self.addr.as_str())
            .await
            .map(drop)
            .map_err(|e| ProbeError::Failure(format!("{}: {}", self.addr, e)))
    }
}

// Upstream model server, also drives the load balancer's health flag
pub struct UpstreamProbe {
    name: String,
    backend: Arc<Backend>,
    client: reqwest::Client,
    timeout: Duration,
}

impl UpstreamProbe {
    pub fn new(backend: Arc<Backend>, client: reqwest::Client, timeout: Duration) -> Self {
        Self {
            name: format!("upstream:{}", backend.url),
            backend,
            client,
            timeout,
        }
    }

    fn mark(&self, healthy: bool) {
        let was_healthy = self.backend.set_healthy(healthy);

        // Log status changes
        if was_healthy != healthy {
            if healthy {
                tracing::info!(url = %self.backend.url, "Upstream is now healthy");
            } else {
                tracing::warn!(url = %self.backend.url, "Upstream is now unhealthy");
            }
        }
    }

    async fn probe(&self) -> Result<(), ProbeError> {
        let url = format!("{}/api/tags", self.backend.url);
        let res = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ProbeError::Failure(e.to_string()))?;

        if res.status().is_success() {
            Ok(())
        } else {
            Err(ProbeError::Failure(format!("status {}", res.status())))
        }
    }
}

#[async_trait]
impl Probe for UpstreamProbe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self) -> Result<(), ProbeError> {
        let result = self.probe().await;
        self.mark(result.is_ok());
        result
    }

    fn timed_out(&self) {
        self.mark(false);
    }
}

pub struct HealthMonitor {
    probes: Vec<Arc<dyn Probe>>,
    probe_timeout: Duration,
    cache: TtlCache,
    ttl: Duration,
    // single-flight guard for on-demand refreshes
    refresh: Mutex<()>,
}

impl HealthMonitor {
    pub fn new(probes: Vec<Arc<dyn Probe>>, probe_timeout: Duration, cache: TtlCache, ttl: Duration) -> Self {
        Self {
            probes,
            probe_timeout,
            cache,
            ttl,
            refresh: Mutex::new(()),
        }
    }

    pub async fn check_health(&self) -> Vec<HealthSnapshot> {
        join_all(self.probes.iter().map(|probe| self.run_probe(probe.as_ref()))).await
    }

    async fn run_probe(&self, probe: &dyn Probe) -> HealthSnapshot {
        let started = Instant::now();
        let outcome = match timeout(self.probe_timeout, probe.check()).await {
            Ok(result) => result,
            Err(_) => {
                probe.timed_out();
                Err(ProbeError::Timeout(self.probe_timeout))
            }
        };

        let (status, latency_ms, error) = match outcome {
            Ok(()) => (
                HealthStatus::Healthy,
                Some(started.elapsed().as_secs_f64() * 1000.0),
                None,
            ),
            Err(e @ ProbeError::Timeout(_)) => (HealthStatus::Unhealthy, None, Some(e.to_string())),
            Err(e) => (
                HealthStatus::Unhealthy,
                Some(started.elapsed().as_secs_f64() * 1000.0),
                Some(e.to_string()),
            ),
        };

        if let Some(error) = &error {
            tracing::warn!(component = probe.name(), error = %error, "Health probe failed");
        }
        COMPONENT_HEALTH
            .with_label_values(&[probe.name()])
            .set(if status == HealthStatus::Healthy { 1.0 } else { 0.0 });

        HealthSnapshot {
            component: probe.name().to_string(),
            status,
            latency_ms,
            error,
            checked_at: Utc::now(),
        }
    }

    // Run one cycle and publish it
    pub async fn refresh(&self) -> HealthReport {
        let report = HealthReport::from_snapshots(self.check_health().await);
        if let Err(e) = self.cache.put(HEALTH_KEY, &report, self.ttl).await {
            tracing::warn!(error = %e, "Failed to publish health report");
        }
        report
    }

    /// Latest published report, or a fresh one when the cache has none.
    pub async fn current(&self) -> HealthReport {
        if let Some(report) = self.cache.get(HEALTH_KEY).await {
            return report;
        }

        let _guard = self.refresh.lock().await;
        // another caller may have refreshed while we waited
        if let Some(report) = self.cache.get(HEALTH_KEY).await {
            return report;
        }
        tracing::debug!("No published health report, probing on demand");
        self.refresh().await
    }

    pub async fn run(self: Arc<Self>, check_interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(interval = ?check_interval, probes = self.probes.len(), "Health monitor started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = {
                        let _guard = self.refresh.lock().await;
                        self.refresh().await
                    };
                    tracing::debug!(status = ?report.status, "Health cycle complete");
                }
                _ = shutdown.changed() => break,
            }
        }

        tracing::info!("Health monitor stopped");
    }
}
