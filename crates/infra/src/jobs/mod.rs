//! Maintenance scheduling.
//!
//! ## Design
//!
//! - Jobs are registered by name with an interval and an async handler
//! - Each job ticks on its own task, independent of the other jobs
//! - A job never overlaps itself: a tick that finds the previous run still
//!   going is skipped and counted, not queued
//! - Failures, timeouts and panics are contained per run and recorded
//!
//! ## Components
//!
//! - `Scheduler`: job registry; `run_now` executes a job inline
//! - `SchedulerHandle`: started scheduler; stats and shutdown
//! - `SessionSweepJob`, `DirectoryProbeJob`: the maintenance jobs

pub mod maintenance;
pub mod scheduler;
pub mod types;

pub use maintenance::{DIRECTORY_PROBE_JOB, DirectoryProbeJob, SESSION_SWEEP_JOB, SessionSweepJob, maintenance_scheduler};
pub use scheduler::{Scheduler, SchedulerHandle};
pub use types::{JobError, JobHandler, JobReport, JobSpec, JobStats, RunOutcome, SchedulerError};
