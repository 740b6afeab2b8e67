use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use sysinfo::{Disks, MINIMUM_CPU_UPDATE_INTERVAL, System};
use tokio::time::timeout;

use crate::cache::TtlCache;
use crate::error::GatewayError;
use crate::health::{Probe, TcpProbe};

pub const SYSTEM_METRICS_KEY: &str = "system_metrics";
pub const SYSTEM_METRICS_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDetails {
    pub memory_total: u64,
    pub memory_available: u64,
    pub disk_total: u64,
    pub disk_free: u64,
    pub timestamp: DateTime<Utc>,
}

// Host usage in percent, one decimal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemResources {
    pub cpu: f64,
    pub memory: f64,
    pub disk: f64,
    pub details: ResourceDetails,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseStatus {
    pub address: Option<String>,
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let pct = used as f64 / total as f64 * 100.0;
    ((pct * 10.0).round() / 10.0).clamp(0.0, 100.0)
}

// Blocks for one CPU sampling interval
pub fn sample_resources() -> SystemResources {
    let mut sys = System::new();
    sys.refresh_cpu_usage();
    std::thread::sleep(MINIMUM_CPU_UPDATE_INTERVAL);
    sys.refresh_cpu_usage();
    sys.refresh_memory();

    let memory_total = sys.total_memory();
    let memory_available = sys.available_memory();

    // root filesystem, or every disk summed when nothing is mounted at "/"
    let disks = Disks::new_with_refreshed_list();
    let (disk_total, disk_free) = match disks
        .list()
        .iter()
        .find(|disk| disk.mount_point() == Path::new("/"))
    {
        Some(root) => (root.total_space(), root.available_space()),
        None => disks.list().iter().fold((0u64, 0u64), |(total, free), disk| {
            (
                total.saturating_add(disk.total_space()),
                free.saturating_add(disk.available_space()),
            )
        }),
    };

    let cpu = (f64::from(sys.global_cpu_usage()) * 10.0).round() / 10.0;

    SystemResources {
        cpu: cpu.clamp(0.0, 100.0),
        memory: percent(memory_total.saturating_sub(memory_available), memory_total),
        disk: percent(disk_total.saturating_sub(disk_free), disk_total),
        details: ResourceDetails {
            memory_total,
            memory_available,
            disk_total,
            disk_free,
            timestamp: Utc::now(),
        },
    }
}

/// Host resource usage, read from the cache store when a recent sample exists.
pub async fn current_resources(cache: &TtlCache) -> Result<SystemResources, GatewayError> {
    if let Some(resources) = cache.get(SYSTEM_METRICS_KEY).await {
        return Ok(resources);
    }

    let resources = tokio::task::spawn_blocking(sample_resources)
        .await
        .map_err(|e| GatewayError::System(e.to_string()))?;
    tracing::debug!(
        cpu = resources.cpu,
        memory = resources.memory,
        disk = resources.disk,
        "Sampled host resources"
    );

    if let Err(e) = cache
        .put(SYSTEM_METRICS_KEY, &resources, SYSTEM_METRICS_TTL)
        .await
    {
        tracing::warn!(error = %e, "Failed to publish system metrics");
    }
    Ok(resources)
}

pub async fn database_status(addr: Option<&str>, within: Duration) -> DatabaseStatus {
    let Some(addr) = addr else {
        return DatabaseStatus {
            address: None,
            connected: false,
            error: Some("no database address configured".to_string()),
        };
    };

    let check = TcpProbe::new("database", addr);
    let error = match timeout(within, check.check()).await {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e.to_string()),
        Err(_) => Some(format!("connect timed out after {:?}", within)),
    };
    if let Some(error) = &error {
        tracing::warn!(addr, error = %error, "Database unreachable");
    }

    DatabaseStatus {
        address: Some(addr.to_string()),
        connected: error.is_none(),
        error,
    }
}
