//! Directory health analysis.
//!
//! Each probe is recorded; health is derived from the recent history rather
//! than from the last probe alone, so a flapping directory shows up as
//! degraded before it is declared down.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use keyward_auth::{DirectoryClient, DirectoryHealth, DirectorySnapshot, DirectoryStatus};
use keyward_core::Clock;

/// Thresholds used to turn probe history into a health verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryHealthPolicy {
    /// Probes older than this are ignored by the analysis.
    pub window_secs: i64,
    /// Hard cap on retained probe records.
    pub max_history: usize,
    /// Failure share (percent) within the window that means degraded.
    pub degradation_threshold_pct: f64,
    /// Share (percent) of the window's failures sitting in its most recent
    /// half that means degraded.
    pub concentrated_threshold_pct: f64,
    /// Consecutive failed probes before the directory is declared down.
    pub down_after: u32,
    /// Deadline for a single health check.
    pub probe_timeout_ms: u64,
}

impl Default for DirectoryHealthPolicy {
    fn default() -> Self {
        Self {
            window_secs: 60 * 60,
            max_history: 512,
            degradation_threshold_pct: 70.0,
            concentrated_threshold_pct: 90.0,
            down_after: 3,
            probe_timeout_ms: 5_000,
        }
    }
}

impl DirectoryHealthPolicy {
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.window_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Outcome of one health check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeRecord {
    pub at: DateTime<Utc>,
    pub healthy: bool,
    /// What the client itself reported.
    pub reported: DirectoryHealth,
    pub latency_ms: u64,
    pub detail: Option<String>,
}

/// Probes the directory and publishes the resulting connection state.
pub struct DirectoryMonitor {
    client: Arc<dyn DirectoryClient>,
    status: DirectoryStatus,
    policy: DirectoryHealthPolicy,
    clock: Arc<dyn Clock>,
    history: Mutex<VecDeque<ProbeRecord>>,
}

impl core::fmt::Debug for DirectoryMonitor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DirectoryMonitor")
            .field("policy", &self.policy)
            .field("status", &self.status.snapshot())
            .finish_non_exhaustive()
    }
}

impl DirectoryMonitor {
    pub fn new(
        client: Arc<dyn DirectoryClient>,
        status: DirectoryStatus,
        policy: DirectoryHealthPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            client,
            status,
            policy,
            clock,
            history: Mutex::new(VecDeque::new()),
        }
    }

    pub fn status(&self) -> &DirectoryStatus {
        &self.status
    }

    /// Run one health check, record it and publish the new state.
    pub async fn probe(&self) -> DirectorySnapshot {
        let started = Instant::now();
        let timeout = self.policy.probe_timeout();
        let (reported, detail) = match tokio::time::timeout(timeout, self.client.health_check()).await {
            Ok(health) => (health, None),
            Err(_) => (DirectoryHealth::Down, Some(format!("health check timed out after {timeout:?}"))),
        };

        let now = self.clock.now();
        let record = ProbeRecord {
            at: now,
            healthy: reported != DirectoryHealth::Down,
            reported,
            latency_ms: started.elapsed().as_millis() as u64,
            detail,
        };

        let previous = self.status.snapshot();
        let consecutive_failures = if record.healthy {
            0
        } else {
            previous.consecutive_failures.saturating_add(1)
        };

        let health = {
            let mut history = self.history.lock().unwrap_or_else(|p| p.into_inner());
            history.push_back(record.clone());
            self.trim(&mut history, now);
            self.assess(&history, &record, consecutive_failures)
        };

        let snapshot = DirectorySnapshot {
            health,
            last_success: if record.healthy { Some(now) } else { previous.last_success },
            last_checked: Some(now),
            consecutive_failures,
        };

        if health != previous.health {
            match health {
                DirectoryHealth::Up => info!(from = %previous.health, "directory recovered"),
                _ => warn!(from = %previous.health, to = %health, consecutive_failures, "directory health changed"),
            }
        } else {
            debug!(health = %health, latency_ms = record.latency_ms, "directory probed");
        }

        self.status.publish(snapshot.clone());
        snapshot
    }

    pub fn latest(&self) -> Option<ProbeRecord> {
        let history = self.history.lock().unwrap_or_else(|p| p.into_inner());
        history.back().cloned()
    }

    /// Probes taken in `[start, end]`, oldest first.
    pub fn history_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<ProbeRecord> {
        let history = self.history.lock().unwrap_or_else(|p| p.into_inner());
        history
            .iter()
            .filter(|r| r.at >= start && r.at <= end)
            .cloned()
            .collect()
    }

    fn trim(&self, history: &mut VecDeque<ProbeRecord>, now: DateTime<Utc>) {
        let cutoff = now - self.policy.window();
        while history.front().is_some_and(|r| r.at < cutoff) || history.len() > self.policy.max_history {
            history.pop_front();
        }
    }

    fn assess(&self, history: &VecDeque<ProbeRecord>, latest: &ProbeRecord, consecutive_failures: u32) -> DirectoryHealth {
        if consecutive_failures >= self.policy.down_after {
            return DirectoryHealth::Down;
        }
        if !latest.healthy || latest.reported == DirectoryHealth::Degraded {
            return DirectoryHealth::Degraded;
        }

        let total = history.len();
        let failures = history.iter().filter(|r| !r.healthy).count();
        if total == 0 || failures == 0 {
            return DirectoryHealth::Up;
        }

        let failure_pct = failures as f64 * 100.0 / total as f64;
        let recent_failures = history.iter().skip(total / 2).filter(|r| !r.healthy).count();
        let concentrated_pct = recent_failures as f64 * 100.0 / failures as f64;

        if failure_pct >= self.policy.degradation_threshold_pct
            || concentrated_pct >= self.policy.concentrated_threshold_pct
        {
            DirectoryHealth::Degraded
        } else {
            DirectoryHealth::Up
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{DirectoryMode, InMemoryDirectory};
    use keyward_core::ManualClock;

    fn monitor(dir: Arc<InMemoryDirectory>, clock: &ManualClock) -> DirectoryMonitor {
        DirectoryMonitor::new(
            dir,
            DirectoryStatus::new(),
            DirectoryHealthPolicy::default(),
            Arc::new(clock.clone()),
        )
    }

    #[tokio::test]
    async fn consecutive_failures_mark_down_then_recover() {
        let clock = ManualClock::starting_now();
        let dir = InMemoryDirectory::arc();
        let monitor = monitor(dir.clone(), &clock);

        assert_eq!(monitor.probe().await.health, DirectoryHealth::Up);

        dir.set_mode(DirectoryMode::Unreachable);
        clock.advance(chrono::Duration::minutes(1));
        assert_eq!(monitor.probe().await.health, DirectoryHealth::Degraded);
        clock.advance(chrono::Duration::minutes(1));
        assert_eq!(monitor.probe().await.health, DirectoryHealth::Degraded);
        clock.advance(chrono::Duration::minutes(1));
        let down = monitor.probe().await;
        assert_eq!(down.health, DirectoryHealth::Down);
        assert_eq!(down.consecutive_failures, 3);
        assert_eq!(monitor.status().health(), DirectoryHealth::Down);

        dir.set_mode(DirectoryMode::Up);
        clock.advance(chrono::Duration::minutes(1));
        let back = monitor.probe().await;
        assert_eq!(back.consecutive_failures, 0);
        assert_eq!(back.last_success, Some(clock.now()));
        assert_eq!(back.health, DirectoryHealth::Up);
        assert_eq!(monitor.history_between(clock.now() - chrono::Duration::minutes(10), clock.now()).len(), 5);
    }

    #[tokio::test]
    async fn old_failures_age_out_of_the_window() {
        let clock = ManualClock::starting_now();
        let dir = InMemoryDirectory::arc();
        let monitor = monitor(dir.clone(), &clock);

        dir.set_mode(DirectoryMode::Unreachable);
        monitor.probe().await;
        dir.set_mode(DirectoryMode::Up);

        clock.advance(chrono::Duration::hours(2));
        assert_eq!(monitor.probe().await.health, DirectoryHealth::Up);
        assert_eq!(monitor.history_between(clock.now() - chrono::Duration::hours(3), clock.now()).len(), 1);
    }

    #[tokio::test]
    async fn scattered_failures_below_thresholds_stay_up() {
        let clock = ManualClock::starting_now();
        let dir = InMemoryDirectory::arc();
        let monitor = monitor(dir.clone(), &clock);

        // One early failure followed by many successes.
        dir.set_mode(DirectoryMode::Unreachable);
        monitor.probe().await;
        dir.set_mode(DirectoryMode::Up);
        for _ in 0..9 {
            clock.advance(chrono::Duration::minutes(1));
            monitor.probe().await;
        }

        assert_eq!(monitor.status().health(), DirectoryHealth::Up);
        assert!(monitor.latest().unwrap().healthy);
    }

    #[tokio::test]
    async fn recent_failure_cluster_degrades_despite_healthy_latest() {
        let clock = ManualClock::starting_now();
        let dir = InMemoryDirectory::arc();
        let monitor = monitor(dir.clone(), &clock);

        for _ in 0..8 {
            monitor.probe().await;
            clock.advance(chrono::Duration::minutes(1));
        }
        dir.set_mode(DirectoryMode::Unreachable);
        monitor.probe().await;
        clock.advance(chrono::Duration::minutes(1));
        dir.set_mode(DirectoryMode::Up);

        let snapshot = monitor.probe().await;
        assert_eq!(snapshot.consecutive_failures, 0);
        assert_eq!(snapshot.health, DirectoryHealth::Degraded);
    }

    #[tokio::test]
    async fn self_reported_degradation_is_kept() {
        let clock = ManualClock::starting_now();
        let dir = InMemoryDirectory::arc();
        dir.set_mode(DirectoryMode::Degraded);
        let monitor = monitor(dir, &clock);

        let snapshot = monitor.probe().await;
        assert_eq!(snapshot.health, DirectoryHealth::Degraded);
        assert_eq!(snapshot.consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_health_check_counts_as_failure() {
        let clock = ManualClock::starting_now();
        let dir = InMemoryDirectory::arc();
        dir.set_mode(DirectoryMode::Hanging);
        let monitor = monitor(dir, &clock);

        let snapshot = monitor.probe().await;
        assert_eq!(snapshot.consecutive_failures, 1);
        assert!(monitor.latest().unwrap().detail.unwrap().contains("timed out"));
    }
}
