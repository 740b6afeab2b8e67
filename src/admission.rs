// Per-client sliding window over admitted request timestamps

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Rejected { retry_after: Duration },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed)
    }
}

// Admitted request times for one client, oldest first
#[derive(Debug, Default)]
pub struct ClientWindow {
    timestamps: VecDeque<Instant>,
}

impl ClientWindow {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.timestamps.front() {
            if now.saturating_duration_since(oldest) >= window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    fn retry_after(&self, now: Instant, window: Duration) -> Duration {
        self.timestamps
            .front()
            .map(|&oldest| (oldest + window).saturating_duration_since(now))
            .unwrap_or_default()
    }

    fn last_seen(&self) -> Option<Instant> {
        self.timestamps.back().copied()
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

// Read-only view of one client's window
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdmissionStatus {
    pub client_id: String,
    pub limit: u32,
    pub window_secs: f64,
    pub in_window: u32,
    pub remaining: u32,
    pub retry_after_secs: f64,
}

pub struct AdmissionController {
    windows: DashMap<String, ClientWindow>,
    limit: u32,
    window: Duration,
}

impl AdmissionController {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            limit,
            window,
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn admit(&self, client_id: &str, now: Instant) -> Admission {
        // shard write lock held only for this client's update
        let mut window = self.windows.entry(client_id.to_string()).or_default();
        window.prune(now, self.window);

        if window.len() < self.limit as usize {
            // keep the sequence non-decreasing even if callers race on `now`
            let at = window.last_seen().map_or(now, |last| last.max(now));
            window.timestamps.push_back(at);
            Admission::Allowed
        } else {
            let retry_after = window.retry_after(now, self.window);
            tracing::debug!(
                client_id,
                retry_after_ms = retry_after.as_millis() as u64,
                "Admission rejected"
            );
            Admission::Rejected { retry_after }
        }
    }

    // Never mutates: a status read must not consume or prune quota
    pub fn status(&self, client_id: &str, now: Instant) -> AdmissionStatus {
        let (in_window, retry_after) = match self.windows.get(client_id) {
            Some(window) => {
                let live: Vec<Instant> = window
                    .timestamps
                    .iter()
                    .copied()
                    .filter(|&ts| now.saturating_duration_since(ts) < self.window)
                    .collect();
                let retry_after = if live.len() >= self.limit as usize {
                    live.first()
                        .map(|&oldest| (oldest + self.window).saturating_duration_since(now))
                        .unwrap_or_default()
                } else {
                    Duration::ZERO
                };
                (live.len() as u32, retry_after)
            }
            None => (0, Duration::ZERO),
        };

        AdmissionStatus {
            client_id: client_id.to_string(),
            limit: self.limit,
            window_secs: self.window.as_secs_f64(),
            in_window,
            remaining: self.limit.saturating_sub(in_window),
            retry_after_secs: retry_after.as_secs_f64(),
        }
    }

    // Drop clients idle for `idle_after`, returns how many went
    pub fn sweep(&self, now: Instant, idle_after: Duration) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, window| {
            window
                .last_seen()
                .is_some_and(|last| now.saturating_duration_since(last) < idle_after)
        });
        let reclaimed = before.saturating_sub(self.windows.len());
        if reclaimed > 0 {
            tracing::debug!(reclaimed, "Reclaimed idle admission windows");
        }
        reclaimed
    }

    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn test_sliding_window_scenario() {
        let limiter = AdmissionController::new(3, secs(60));
        let t0 = Instant::now();

        assert_eq!(limiter.admit("A", t0), Admission::Allowed);
        assert_eq!(limiter.admit("A", t0 + secs(10)), Admission::Allowed);
        assert_eq!(limiter.admit("A", t0 + secs(20)), Admission::Allowed);
        assert_eq!(
            limiter.admit("A", t0 + secs(25)),
            Admission::Rejected {
                retry_after: secs(35)
            }
        );
        assert_eq!(limiter.admit("A", t0 + secs(61)), Admission::Allowed);
    }

    #[test]
    fn test_limit_plus_one_within_window_is_rejected() {
        let limiter = AdmissionController::new(5, secs(60));
        let t0 = Instant::now();

        for i in 0..5 {
            assert!(limiter.admit("client", t0 + secs(i)).is_allowed());
        }
        assert!(!limiter.admit("client", t0 + secs(59)).is_allowed());
    }

    #[test]
    fn test_spaced_requests_always_allowed() {
        let limiter = AdmissionController::new(1, secs(60));
        let t0 = Instant::now();

        for i in 0..10 {
            assert!(limiter.admit("client", t0 + secs(61 * i)).is_allowed());
        }
    }

    #[test]
    fn test_oldest_leaves_window_exactly_at_boundary() {
        let limiter = AdmissionController::new(1, secs(60));
        let t0 = Instant::now();

        assert!(limiter.admit("A", t0).is_allowed());
        assert!(!limiter.admit("A", t0 + Duration::from_millis(59_999)).is_allowed());
        assert!(limiter.admit("A", t0 + secs(60)).is_allowed());
    }

    #[test]
    fn test_rejections_do_not_consume_quota() {
        let limiter = AdmissionController::new(2, secs(60));
        let t0 = Instant::now();

        limiter.admit("A", t0);
        limiter.admit("A", t0 + secs(1));
        for i in 2..20 {
            assert!(!limiter.admit("A", t0 + secs(i)).is_allowed());
        }
        // only the two admitted timestamps need to expire
        assert!(limiter.admit("A", t0 + secs(61)).is_allowed());
    }

    #[test]
    fn test_clients_are_isolated() {
        let limiter = AdmissionController::new(2, secs(60));
        let t0 = Instant::now();

        limiter.admit("A", t0);
        limiter.admit("A", t0);
        assert!(!limiter.admit("A", t0).is_allowed());

        assert!(limiter.admit("B", t0).is_allowed());
        assert!(limiter.admit("B", t0).is_allowed());
    }

    #[test]
    fn test_status_reports_usage_without_mutating() {
        let limiter = AdmissionController::new(3, secs(60));
        let t0 = Instant::now();

        limiter.admit("A", t0);
        limiter.admit("A", t0 + secs(10));
        limiter.admit("A", t0 + secs(20));

        let status = limiter.status("A", t0 + secs(25));
        assert_eq!(status.in_window, 3);
        assert_eq!(status.remaining, 0);
        assert_eq!(status.retry_after_secs, 35.0);

        let later = limiter.status("A", t0 + secs(65));
        assert_eq!(later.in_window, 2);
        assert_eq!(later.remaining, 1);
        assert_eq!(later.retry_after_secs, 0.0);

        let unknown = limiter.status("nobody", t0);
        assert_eq!(unknown.in_window, 0);
        assert_eq!(unknown.remaining, 3);
    }

    #[test]
    fn test_sweep_reclaims_idle_clients_only() {
        let limiter = AdmissionController::new(3, secs(60));
        let t0 = Instant::now();

        limiter.admit("idle", t0);
        limiter.admit("active", t0 + secs(170));

        assert_eq!(limiter.sweep(t0 + secs(181), secs(180)), 1);
        assert_eq!(limiter.tracked_clients(), 1);
        assert_eq!(limiter.status("active", t0 + secs(181)).in_window, 1);
    }

    #[test]
    fn test_window_never_exceeds_limit_under_contention() {
        let limiter = Arc::new(AdmissionController::new(10, secs(60)));
        let now = Instant::now();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || {
                    (0..50)
                        .filter(|_| limiter.admit("shared", now).is_allowed())
                        .count()
                })
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 10);
        assert_eq!(limiter.status("shared", now).in_window, 10);
    }
}
