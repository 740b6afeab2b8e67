use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::error::GatewayError;

// Single upstream server

pub struct Backend {
    pub url: String,
    healthy: AtomicBool,
}

impl Backend {
    pub fn new(url: String) -> Self {
        Self {
            url,
            healthy: AtomicBool::new(true),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    // Returns the previous state so callers can log transitions
    pub fn set_healthy(&self, healthy: bool) -> bool {
        self.healthy.swap(healthy, Ordering::Relaxed)
    }
}

// Round-robin over upstreams that the health monitor last saw alive

pub struct LoadBalancer {
    backends: Vec<Arc<Backend>>,
    current: AtomicUsize,
}

impl LoadBalancer {
    pub fn new(urls: &[String]) -> Result<Self, GatewayError> {
        if urls.is_empty() {
            return Err(GatewayError::Config("at least one upstream required".into()));
        }

        let backends: Vec<Arc<Backend>> = urls
            .iter()
            .map(|url| Arc::new(Backend::new(url.clone())))
            .collect();

        for (i, b) in backends.iter().enumerate() {
            tracing::info!(index = i + 1, url = %b.url, "Upstream registered");
        }

        Ok(Self {
            backends,
            current: AtomicUsize::new(0),
        })
    }

    // Get next healthy backend (round-robin)
    pub fn get_backend(&self) -> Option<Arc<Backend>> {
        let len = self.backends.len();
        let start = self.current.fetch_add(1, Ordering::Relaxed) % len;

        (0..len)
            .map(|i| &self.backends[(start + i) % len])
            .find(|backend| backend.is_healthy())
            .map(Arc::clone)
    }

    pub fn all_backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }
}
