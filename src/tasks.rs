use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval};

use crate::admission::AdmissionController;
use crate::cache::TtlCache;
use crate::metrics::{CACHE_SIZE, TRACKED_CLIENTS};
use crate::state::AppState;
use crate::telemetry::run_publisher;

/// Periodic work that runs beside request handling. Every loop watches one
/// shutdown signal; [`BackgroundTasks::shutdown`] waits for all of them.
pub struct BackgroundTasks {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    pub fn spawn(state: &AppState) -> Self {
        let (shutdown, rx) = watch::channel(false);
        let config = &state.config;

        let handles = vec![
            tokio::spawn(
                Arc::clone(&state.health).run(config.health_interval, rx.clone()),
            ),
            tokio::spawn(run_publisher(
                Arc::clone(&state.telemetry),
                state.cache.clone(),
                config.snapshot_interval,
                config.snapshot_ttl(),
                rx.clone(),
            )),
            tokio::spawn(run_janitor(
                Arc::clone(&state.admission),
                state.cache.clone(),
                config.rate_window,
                config.idle_after(),
                rx,
            )),
        ];

        Self { shutdown, handles }
    }

    pub async fn shutdown(self) {
        // receivers only go away when their task already ended
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Background task ended abnormally");
            }
        }
    }
}

// Reclaim idle admission windows and expired cache entries
pub async fn run_janitor(
    admission: Arc<AdmissionController>,
    cache: TtlCache,
    every: Duration,
    idle_after: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let clients = admission.sweep(Instant::now(), idle_after);
                let entries = cache.purge_expired();
                if clients > 0 || entries > 0 {
                    tracing::debug!(clients, entries, "Janitor reclaimed state");
                }
                TRACKED_CLIENTS.set(admission.tracked_clients() as i64);
                CACHE_SIZE.set(cache.len() as i64);
            }
            _ = shutdown.changed() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;

    #[tokio::test(start_paused = true)]
    async fn test_janitor_reclaims_idle_clients() {
        let admission = Arc::new(AdmissionController::new(3, Duration::from_secs(60)));
        let cache = TtlCache::in_memory();
        cache.put("short", "v", Duration::from_secs(1)).await.unwrap();
        admission.admit("idle", Instant::now());

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(run_janitor(
            Arc::clone(&admission),
            cache.clone(),
            Duration::from_secs(60),
            Duration::from_secs(180),
            rx,
        ));

        tokio::time::sleep(Duration::from_secs(190)).await;
        assert_eq!(admission.tracked_clients(), 0);
        assert!(cache.is_empty());

        tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_stops_every_task() {
        let config = GatewayConfig {
            // nothing listens here, the upstream probe just fails
            upstreams: vec!["http://127.0.0.1:9".to_string()],
            ..GatewayConfig::default()
        };
        let state = AppState::new(config, TtlCache::in_memory()).unwrap();

        let tasks = BackgroundTasks::spawn(&state);
        tokio::time::timeout(Duration::from_secs(10), tasks.shutdown())
            .await
            .expect("tasks should stop promptly");
    }
}
