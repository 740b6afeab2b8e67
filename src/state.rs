use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use crate::admission::AdmissionController;
use crate::cache::TtlCache;
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::health::{CacheProbe, HealthMonitor, Probe, TcpProbe, UpstreamProbe};
use crate::load_balancer::LoadBalancer;
use crate::proxy::Upstream;
use crate::telemetry::TelemetryAggregator;

// app's shared state, built once at startup and passed to every handler

pub struct AppState {
    pub config: GatewayConfig,
    pub cache: TtlCache,
    pub admission: Arc<AdmissionController>,
    pub telemetry: Arc<TelemetryAggregator>,
    pub health: Arc<HealthMonitor>,
    pub load_balancer: Arc<LoadBalancer>,
    pub upstream: Upstream,
    api_key_digest: Option<Vec<u8>>,
}

impl AppState {
    pub fn new(config: GatewayConfig, cache: TtlCache) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| GatewayError::Config(format!("http client: {}", e)))?;

        let load_balancer = Arc::new(LoadBalancer::new(&config.upstreams)?);

        let mut probes: Vec<Arc<dyn Probe>> = vec![Arc::new(CacheProbe::new(cache.backend()))];
        if let Some(addr) = &config.database_addr {
            probes.push(Arc::new(TcpProbe::new("database", addr.clone())));
        }
        for backend in load_balancer.all_backends() {
            probes.push(Arc::new(UpstreamProbe::new(
                Arc::clone(backend),
                client.clone(),
                config.probe_timeout,
            )));
        }

        let health = Arc::new(HealthMonitor::new(
            probes,
            config.probe_timeout,
            cache.clone(),
            config.health_ttl(),
        ));

        Ok(Self {
            admission: Arc::new(AdmissionController::new(config.rate_limit, config.rate_window)),
            telemetry: Arc::new(TelemetryAggregator::new()),
            health,
            load_balancer,
            upstream: Upstream::new(client, cache.clone(), config.cache_ttl, config.upstream_timeout),
            api_key_digest: config.api_key.as_deref().map(digest),
            cache,
            config,
        })
    }

    // Replace the default dependency probes
    pub fn with_probes(mut self, probes: Vec<Arc<dyn Probe>>) -> Self {
        self.health = Arc::new(HealthMonitor::new(
            probes,
            self.config.probe_timeout,
            self.cache.clone(),
            self.config.health_ttl(),
        ));
        self
    }

    pub fn requires_credential(&self) -> bool {
        self.api_key_digest.is_some()
    }

    pub fn credential_matches(&self, presented: &str) -> bool {
        match &self.api_key_digest {
            Some(expected) => digest(presented) == *expected,
            None => true,
        }
    }
}

fn digest(key: &str) -> Vec<u8> {
    Sha256::digest(key.as_bytes()).to_vec()
}
