//! The two recurring maintenance jobs.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use keyward_auth::SessionStore;
use keyward_core::{AuthConfig, Clock};

use super::scheduler::Scheduler;
use super::types::{JobError, JobHandler, JobReport, JobSpec, SchedulerError};
use crate::directory::DirectoryMonitor;

pub const SESSION_SWEEP_JOB: &str = "session-sweep";
pub const DIRECTORY_PROBE_JOB: &str = "directory-probe";

/// Deletes session entries past their expiry, revoked or not.
pub struct SessionSweepJob {
    sessions: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
}

impl SessionSweepJob {
    pub fn new(sessions: Arc<dyn SessionStore>, clock: Arc<dyn Clock>) -> Self {
        Self { sessions, clock }
    }
}

#[async_trait]
impl JobHandler for SessionSweepJob {
    async fn run(&self) -> Result<JobReport, JobError> {
        let now = self.clock.now();
        let removed = self
            .sessions
            .sweep_expired(now)
            .await
            .map_err(|e| JobError::failed(e.to_string()))?;

        if removed > 0 {
            info!(job = SESSION_SWEEP_JOB, removed, "expired sessions swept");
        }
        Ok(JobReport::new(removed, format!("{removed} expired sessions removed")))
    }
}

/// Probes the directory and publishes its connection state.
///
/// An unhealthy directory is a finding, not a job failure.
pub struct DirectoryProbeJob {
    monitor: Arc<DirectoryMonitor>,
}

impl DirectoryProbeJob {
    pub fn new(monitor: Arc<DirectoryMonitor>) -> Self {
        Self { monitor }
    }
}

#[async_trait]
impl JobHandler for DirectoryProbeJob {
    async fn run(&self) -> Result<JobReport, JobError> {
        let snapshot = self.monitor.probe().await;
        Ok(JobReport::new(1, format!("directory {}", snapshot.health)))
    }
}

/// Scheduler with the sweep job and, when a directory is configured, the
/// probe job, at the configured intervals.
///
/// Each run is bounded by its own interval, so a hung dependency can at worst
/// cost one skipped tick.
pub fn maintenance_scheduler(
    config: &AuthConfig,
    sessions: Arc<dyn SessionStore>,
    monitor: Option<Arc<DirectoryMonitor>>,
    clock: Arc<dyn Clock>,
) -> Result<Scheduler, SchedulerError> {
    let mut scheduler = Scheduler::new(Arc::clone(&clock));

    scheduler.register(
        JobSpec::new(SESSION_SWEEP_JOB, config.sweep_interval()).with_timeout(config.sweep_interval()),
        Arc::new(SessionSweepJob::new(sessions, clock)),
    )?;

    if let Some(monitor) = monitor {
        scheduler.register(
            JobSpec::new(DIRECTORY_PROBE_JOB, config.probe_interval())
                .with_timeout(config.probe_interval())
                .run_on_start(),
            Arc::new(DirectoryProbeJob::new(monitor)),
        )?;
    }

    Ok(scheduler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::RunOutcome;
    use crate::session_store::InMemorySessionStore;
    use keyward_auth::SessionEntry;
    use keyward_core::{ManualClock, TokenId, Username};

    #[tokio::test]
    async fn sweep_reports_removed_count() {
        let clock = ManualClock::starting_now();
        let sessions = InMemorySessionStore::arc();
        let now = clock.now();
        for ttl in [10, 20, 3600] {
            sessions
                .register(SessionEntry::new(
                    TokenId::new(),
                    Username::new("henry"),
                    now,
                    now + chrono::Duration::seconds(ttl),
                ))
                .await
                .unwrap();
        }

        let scheduler =
            maintenance_scheduler(&AuthConfig::default(), sessions.clone(), None, Arc::new(clock.clone())).unwrap();
        assert_eq!(scheduler.job_names(), vec![SESSION_SWEEP_JOB]);

        clock.advance(chrono::Duration::seconds(30));
        let outcome = scheduler.run_now(SESSION_SWEEP_JOB).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Completed(ref r) if r.affected == 2));
        assert_eq!(sessions.len(), 1);
    }
}
