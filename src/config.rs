use clap::Parser;
use std::time::Duration;

use crate::error::GatewayError;

// Upper bounds keep deadline arithmetic far from overflow
const MAX_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);
const MAX_PROBE_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_IDLE_WINDOWS: u32 = 1000;

// CLI argument structure
#[derive(Parser, Debug, Clone)]
#[command(name = "agent-gateway")]
#[command(about = "Admission-controlled gateway for LLM backends")]
pub struct Args {
    // Port to run the server on
    #[arg(short, long, env = "GATEWAY_PORT", default_value_t = 8080)]
    pub port: u16,

    // Upstream servers (comma-separated)
    // Example: "localhost:11434,localhost:11435"
    #[arg(short, long, env = "GATEWAY_UPSTREAMS", default_value = "localhost:11434")]
    pub upstreams: String,

    // Response cache TTL in seconds
    #[arg(short, long, env = "GATEWAY_CACHE_TTL", default_value_t = 30)]
    pub cache_ttl: u64,

    // Max admitted requests per client per window
    #[arg(long, env = "GATEWAY_RATE_LIMIT", default_value_t = 60)]
    pub rate_limit: u32,

    // Rate limit window in seconds
    #[arg(long, env = "GATEWAY_RATE_WINDOW", default_value_t = 60)]
    pub rate_window: u64,

    // Idle windows before a client's admission state is reclaimed
    #[arg(long, env = "GATEWAY_IDLE_WINDOWS", default_value_t = 3)]
    pub idle_windows: u32,

    // Health check interval in seconds
    #[arg(long, env = "GATEWAY_HEALTH_INTERVAL", default_value_t = 300)]
    pub health_interval: u64,

    // Per-probe timeout in milliseconds
    #[arg(long, env = "GATEWAY_PROBE_TIMEOUT_MS", default_value_t = 2000)]
    pub probe_timeout_ms: u64,

    // Timeout for a forwarded upstream request in seconds
    #[arg(long, env = "GATEWAY_UPSTREAM_TIMEOUT", default_value_t = 120)]
    pub upstream_timeout: u64,

    // Telemetry snapshot push interval in seconds
    #[arg(long, env = "GATEWAY_SNAPSHOT_INTERVAL", default_value_t = 5)]
    pub snapshot_interval: u64,

    // Persistence backend address for the liveness probe, e.g. "localhost:5432"
    #[arg(long, env = "GATEWAY_DATABASE_ADDR")]
    pub database_addr: Option<String>,

    // Shared credential checked on every gateway route
    #[arg(long, env = "GATEWAY_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,
}

/// Runtime configuration of the gateway core, validated at startup.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub port: u16,
    pub upstreams: Vec<String>,
    pub cache_ttl: Duration,
    pub rate_limit: u32,
    pub rate_window: Duration,
    pub idle_windows: u32,
    pub health_interval: Duration,
    pub probe_timeout: Duration,
    pub upstream_timeout: Duration,
    pub snapshot_interval: Duration,
    pub database_addr: Option<String>,
    pub api_key: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            upstreams: vec!["http://localhost:11434".to_string()],
            cache_ttl: Duration::from_secs(30),
            rate_limit: 60,
            rate_window: Duration::from_secs(60),
            idle_windows: 3,
            health_interval: Duration::from_secs(300),
            probe_timeout: Duration::from_secs(2),
            upstream_timeout: Duration::from_secs(120),
            snapshot_interval: Duration::from_secs(5),
            database_addr: None,
            api_key: None,
        }
    }
}

impl GatewayConfig {
    // TTL for published telemetry: one missed push still reads as present, two expire
    pub fn snapshot_ttl(&self) -> Duration {
        self.snapshot_interval.saturating_add(self.snapshot_interval / 2)
    }

    pub fn health_ttl(&self) -> Duration {
        self.health_interval.saturating_add(self.health_interval / 2)
    }

    // How long a client may stay quiet before its window is reclaimed
    pub fn idle_after(&self) -> Duration {
        self.rate_window.saturating_mul(self.idle_windows)
    }

    pub fn validate(self) -> Result<Self, GatewayError> {
        if self.rate_limit == 0 {
            return Err(GatewayError::Config("rate limit must be at least 1".into()));
        }
        if self.rate_window.is_zero() {
            return Err(GatewayError::Config("rate window must be non-zero".into()));
        }
        if self.idle_windows == 0 {
            return Err(GatewayError::Config("idle windows must be at least 1".into()));
        }
        if self.health_interval.is_zero() || self.snapshot_interval.is_zero() {
            return Err(GatewayError::Config("intervals must be non-zero".into()));
        }
        if self.probe_timeout.is_zero() || self.upstream_timeout.is_zero() {
            return Err(GatewayError::Config("timeouts must be non-zero".into()));
        }
        if self.probe_timeout > MAX_PROBE_TIMEOUT {
            return Err(GatewayError::Config(format!(
                "probe timeout must be at most {:?}",
                MAX_PROBE_TIMEOUT
            )));
        }
        let periods = [
            ("cache ttl", self.cache_ttl),
            ("rate window", self.rate_window),
            ("health interval", self.health_interval),
            ("snapshot interval", self.snapshot_interval),
            ("upstream timeout", self.upstream_timeout),
        ];
        if let Some((name, _)) = periods.iter().find(|(_, value)| *value > MAX_PERIOD) {
            return Err(GatewayError::Config(format!(
                "{} must be at most {:?}",
                name, MAX_PERIOD
            )));
        }
        if self.idle_windows > MAX_IDLE_WINDOWS {
            return Err(GatewayError::Config(format!(
                "idle windows must be at most {}",
                MAX_IDLE_WINDOWS
            )));
        }
        if self.upstreams.is_empty() {
            return Err(GatewayError::Config("at least one upstream required".into()));
        }
        if matches!(self.api_key.as_deref(), Some("")) {
            return Err(GatewayError::Config("api key must not be empty".into()));
        }
        Ok(self)
    }
}

// add http:// if not present
pub fn normalize_url(url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        url.trim_end_matches('/').to_string()
    } else {
        format!("http://{}", url.trim_end_matches('/'))
    }
}

impl TryFrom<Args> for GatewayConfig {
    type Error = GatewayError;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let upstreams = args
            .upstreams
            .split(',')
            .map(|s| s.trim()) // remove spaces
            .filter(|s| !s.is_empty()) // remove empty strings
            .map(normalize_url)
            .collect();

        GatewayConfig {
            port: args.port,
            upstreams,
            cache_ttl: Duration::from_secs(args.cache_ttl),
            rate_limit: args.rate_limit,
            rate_window: Duration::from_secs(args.rate_window),
            idle_windows: args.idle_windows,
            health_interval: Duration::from_secs(args.health_interval),
            probe_timeout: Duration::from_millis(args.probe_timeout_ms),
            upstream_timeout: Duration::from_secs(args.upstream_timeout),
            snapshot_interval: Duration::from_secs(args.snapshot_interval),
            database_addr: args.database_addr,
            api_key: args.api_key,
        }
        .validate()
    }
}
