//! Job contracts, outcomes and statistics.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Work performed on every tick of a scheduled job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self) -> Result<JobReport, JobError>;
}

/// What a successful run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobReport {
    /// Items touched (sessions removed, probes taken, ...).
    pub affected: u64,
    pub summary: String,
}

impl JobReport {
    pub fn new(affected: u64, summary: impl Into<String>) -> Self {
        Self {
            affected,
            summary: summary.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl JobError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("job already registered: {0}")]
    DuplicateJob(String),

    #[error("job {0} has a zero interval")]
    ZeroInterval(String),

    #[error("unknown job: {0}")]
    UnknownJob(String),
}

/// Registration parameters for a recurring job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub name: String,
    pub interval: Duration,
    /// Upper bound on a single run; `None` lets runs take as long as they need.
    pub timeout: Option<Duration>,
    /// Fire the first tick immediately instead of after one interval.
    pub run_on_start: bool,
}

impl JobSpec {
    pub fn new(name: impl Into<String>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            interval,
            timeout: None,
            run_on_start: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn run_on_start(mut self) -> Self {
        self.run_on_start = true;
        self
    }
}

/// Result of one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(JobReport),
    Failed(String),
    TimedOut,
    /// The previous run was still in progress.
    Skipped,
}

/// Per-job runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    pub name: String,
    /// Runs started (skipped ticks excluded).
    pub runs: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
    pub timed_out: u64,
    pub running: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}
