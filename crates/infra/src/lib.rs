//! Infrastructure layer: storage adapters, directory tracking, maintenance jobs.

pub mod credentials;
pub mod directory;
pub mod jobs;
pub mod session_store;


pub use credentials::InMemoryCredentialStore;
pub use directory::{DirectoryHealthPolicy, DirectoryMode, DirectoryMonitor, InMemoryDirectory, ProbeRecord};
pub use jobs::{
    DirectoryProbeJob, JobError, JobHandler, JobReport, JobSpec, JobStats, RunOutcome, Scheduler,
    SchedulerError, SchedulerHandle, SessionSweepJob, maintenance_scheduler,
};
pub use session_store::{InMemorySessionStore, PostgresSessionStore};
