//! Interval scheduler with per-job isolation.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use keyward_core::Clock;

use super::types::{JobHandler, JobSpec, JobStats, RunOutcome, SchedulerError};

struct ScheduledJob {
    spec: JobSpec,
    handler: Arc<dyn JobHandler>,
    running: AtomicBool,
    stats: Mutex<JobStats>,
}

impl ScheduledJob {
    fn stats(&self) -> std::sync::MutexGuard<'_, JobStats> {
        self.stats.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Clears the running flag when a run ends, however it ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Aborts the handler task if the run itself is cancelled.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

struct Registry {
    name: String,
    jobs: BTreeMap<String, Arc<ScheduledJob>>,
    clock: Arc<dyn Clock>,
}

impl Registry {
    async fn run_now(&self, job: &str) -> Result<RunOutcome, SchedulerError> {
        let entry = self
            .jobs
            .get(job)
            .ok_or_else(|| SchedulerError::UnknownJob(job.to_string()))?;
        Ok(run_job(&self.name, entry, self.clock.as_ref()).await)
    }

    fn stats(&self) -> Vec<JobStats> {
        self.jobs.values().map(|j| j.stats().clone()).collect()
    }
}

async fn run_job(scheduler: &str, job: &ScheduledJob, clock: &dyn Clock) -> RunOutcome {
    let name = job.spec.name.as_str();

    if job
        .running
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        job.stats().skipped += 1;
        debug!(scheduler = %scheduler, job = %name, "previous run still in progress, tick skipped");
        return RunOutcome::Skipped;
    }
    let _running = RunningGuard(&job.running);

    {
        let mut stats = job.stats();
        stats.runs += 1;
        stats.running = true;
        stats.last_run_at = Some(clock.now());
    }

    let handler = Arc::clone(&job.handler);
    let mut task = tokio::spawn(async move { handler.run().await });
    let _abort = AbortOnDrop(task.abort_handle());

    let joined = match job.spec.timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut task).await {
            Ok(joined) => Some(joined),
            Err(_) => None,
        },
        None => Some((&mut task).await),
    };

    let outcome = match joined {
        None => {
            task.abort();
            warn!(scheduler = %scheduler, job = %name, "job run timed out");
            RunOutcome::TimedOut
        }
        Some(Ok(Ok(report))) => {
            debug!(scheduler = %scheduler, job = %name, affected = report.affected, summary = %report.summary, "job run completed");
            RunOutcome::Completed(report)
        }
        Some(Ok(Err(e))) => {
            warn!(scheduler = %scheduler, job = %name, error = %e, "job run failed");
            RunOutcome::Failed(e.to_string())
        }
        Some(Err(join_err)) if join_err.is_panic() => {
            error!(scheduler = %scheduler, job = %name, "job run panicked");
            RunOutcome::Failed("job panicked".to_string())
        }
        Some(Err(join_err)) => RunOutcome::Failed(format!("job task cancelled: {join_err}")),
    };

    let mut stats = job.stats();
    stats.running = false;
    match &outcome {
        RunOutcome::Completed(_) => {
            stats.succeeded += 1;
            stats.last_success_at = Some(clock.now());
            stats.last_error = None;
        }
        RunOutcome::Failed(e) => {
            stats.failed += 1;
            stats.last_error = Some(e.clone());
        }
        RunOutcome::TimedOut => {
            stats.timed_out += 1;
            stats.last_error = Some("timed out".to_string());
        }
        RunOutcome::Skipped => {}
    }

    outcome
}

/// Job registry with an explicit start/stop lifecycle.
///
/// Nothing runs until [`Scheduler::start`]; before that, [`Scheduler::run_now`]
/// executes a job inline, which is how tests drive jobs deterministically.
pub struct Scheduler {
    registry: Registry,
}

impl core::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Scheduler")
            .field("name", &self.registry.name)
            .field("jobs", &self.registry.jobs.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Scheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            registry: Registry {
                name: "maintenance".to_string(),
                jobs: BTreeMap::new(),
                clock,
            },
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.registry.name = name.into();
        self
    }

    pub fn register(&mut self, spec: JobSpec, handler: Arc<dyn JobHandler>) -> Result<(), SchedulerError> {
        if spec.interval.is_zero() {
            return Err(SchedulerError::ZeroInterval(spec.name));
        }
        if self.registry.jobs.contains_key(&spec.name) {
            return Err(SchedulerError::DuplicateJob(spec.name));
        }

        let stats = JobStats {
            name: spec.name.clone(),
            ..JobStats::default()
        };
        self.registry.jobs.insert(
            spec.name.clone(),
            Arc::new(ScheduledJob {
                spec,
                handler,
                running: AtomicBool::new(false),
                stats: Mutex::new(stats),
            }),
        );
        Ok(())
    }

    pub fn job_names(&self) -> Vec<&str> {
        self.registry.jobs.keys().map(String::as_str).collect()
    }

    pub async fn run_now(&self, job: &str) -> Result<RunOutcome, SchedulerError> {
        self.registry.run_now(job).await
    }

    pub fn stats(&self) -> Vec<JobStats> {
        self.registry.stats()
    }

    /// Spawn one ticker task per job. Must be called inside a tokio runtime.
    pub fn start(self) -> SchedulerHandle {
        let registry = Arc::new(self.registry);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let tickers = registry
            .jobs
            .values()
            .map(|job| tokio::spawn(ticker(Arc::clone(&registry), Arc::clone(job), shutdown_rx.clone())))
            .collect();

        info!(scheduler = %registry.name, jobs = registry.jobs.len(), "scheduler started");

        SchedulerHandle {
            registry,
            shutdown: shutdown_tx,
            tickers,
        }
    }
}

async fn ticker(registry: Arc<Registry>, job: Arc<ScheduledJob>, mut shutdown: watch::Receiver<bool>) {
    let period = job.spec.interval;
    let first = if job.spec.run_on_start {
        Instant::now()
    } else {
        Instant::now() + period
    };
    let mut interval = tokio::time::interval_at(first, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // Runs are spawned so a slow run cannot delay the tick that detects it.
    let mut runs: JoinSet<()> = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = interval.tick() => {
                let registry = Arc::clone(&registry);
                let job = Arc::clone(&job);
                runs.spawn(async move {
                    run_job(&registry.name, &job, registry.clock.as_ref()).await;
                });
            }
            Some(_) = runs.join_next(), if !runs.is_empty() => {}
        }
    }

    runs.abort_all();
    while runs.join_next().await.is_some() {}
    debug!(scheduler = %registry.name, job = %job.spec.name, "ticker stopped");
}

/// A started scheduler.
#[derive(Debug)]
pub struct SchedulerHandle {
    registry: Arc<Registry>,
    shutdown: watch::Sender<bool>,
    tickers: Vec<JoinHandle<()>>,
}

impl core::fmt::Debug for Registry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Registry").field("name", &self.name).finish_non_exhaustive()
    }
}

impl SchedulerHandle {
    /// Run a job inline, subject to the same no-overlap rule as ticks.
    pub async fn run_now(&self, job: &str) -> Result<RunOutcome, SchedulerError> {
        self.registry.run_now(job).await
    }

    pub fn stats(&self) -> Vec<JobStats> {
        self.registry.stats()
    }

    pub fn job_stats(&self, job: &str) -> Option<JobStats> {
        self.registry.jobs.get(job).map(|j| j.stats().clone())
    }

    /// Stop all tickers and abort in-flight runs.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for ticker in self.tickers {
            if let Err(e) = ticker.await {
                warn!(scheduler = %self.registry.name, error = %e, "ticker ended abnormally");
            }
        }
        info!(scheduler = %self.registry.name, "scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU64;
    use std::time::Duration;

    use async_trait::async_trait;
    use keyward_core::ManualClock;

    use super::*;
    use crate::jobs::types::{JobError, JobReport};

    #[derive(Default)]
    struct Counting {
        calls: AtomicU64,
    }

    #[async_trait]
    impl JobHandler for Counting {
        async fn run(&self) -> Result<JobReport, JobError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(JobReport::new(n, "counted"))
        }
    }

    struct Sleepy(Duration);

    #[async_trait]
    impl JobHandler for Sleepy {
        async fn run(&self) -> Result<JobReport, JobError> {
            tokio::time::sleep(self.0).await;
            Ok(JobReport::default())
        }
    }

    struct Failing;

    #[async_trait]
    impl JobHandler for Failing {
        async fn run(&self) -> Result<JobReport, JobError> {
            Err(JobError::failed("store unreachable"))
        }
    }

    struct Panicking;

    #[async_trait]
    impl JobHandler for Panicking {
        async fn run(&self) -> Result<JobReport, JobError> {
            panic!("boom")
        }
    }

    fn scheduler() -> Scheduler {
        Scheduler::new(Arc::new(ManualClock::starting_now()))
    }

    #[test]
    fn registration_is_validated() {
        let mut s = scheduler();
        let handler: Arc<dyn JobHandler> = Arc::new(Counting::default());

        s.register(JobSpec::new("a", Duration::from_secs(1)), handler.clone()).unwrap();
        assert_eq!(
            s.register(JobSpec::new("a", Duration::from_secs(1)), handler.clone()),
            Err(SchedulerError::DuplicateJob("a".to_string()))
        );
        assert_eq!(
            s.register(JobSpec::new("b", Duration::ZERO), handler),
            Err(SchedulerError::ZeroInterval("b".to_string()))
        );
        assert_eq!(s.job_names(), vec!["a"]);
    }

    #[tokio::test]
    async fn run_now_executes_inline_and_records_stats() {
        let mut s = scheduler();
        s.register(JobSpec::new("count", Duration::from_secs(60)), Arc::new(Counting::default()))
            .unwrap();

        assert_eq!(s.run_now("count").await.unwrap(), RunOutcome::Completed(JobReport::new(1, "counted")));
        assert_eq!(s.run_now("count").await.unwrap(), RunOutcome::Completed(JobReport::new(2, "counted")));
        assert_eq!(s.run_now("nope").await, Err(SchedulerError::UnknownJob("nope".to_string())));

        let stats = &s.stats()[0];
        assert_eq!((stats.runs, stats.succeeded, stats.failed), (2, 2, 0));
        assert!(stats.last_success_at.is_some());
        assert!(!stats.running);
    }

    #[tokio::test]
    async fn failures_and_panics_are_contained() {
        let mut s = scheduler();
        s.register(JobSpec::new("fail", Duration::from_secs(60)), Arc::new(Failing)).unwrap();
        s.register(JobSpec::new("panic", Duration::from_secs(60)), Arc::new(Panicking)).unwrap();

        assert_eq!(s.run_now("fail").await.unwrap(), RunOutcome::Failed("store unreachable".to_string()));
        assert_eq!(s.run_now("panic").await.unwrap(), RunOutcome::Failed("job panicked".to_string()));
        // The flag is released after a panic.
        assert_eq!(s.run_now("panic").await.unwrap(), RunOutcome::Failed("job panicked".to_string()));

        let stats = s.stats();
        let fail = stats.iter().find(|j| j.name == "fail").unwrap();
        assert_eq!(fail.last_error.as_deref(), Some("store unreachable"));
        let panic = stats.iter().find(|j| j.name == "panic").unwrap();
        assert_eq!(panic.failed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn per_run_timeout() {
        let mut s = scheduler();
        s.register(
            JobSpec::new("slow", Duration::from_secs(60)).with_timeout(Duration::from_secs(1)),
            Arc::new(Sleepy(Duration::from_secs(30))),
        )
        .unwrap();

        assert_eq!(s.run_now("slow").await.unwrap(), RunOutcome::TimedOut);
        assert_eq!(s.stats()[0].timed_out, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_ticks_are_skipped() {
        let mut s = scheduler();
        s.register(
            JobSpec::new("slow", Duration::from_secs(1)).run_on_start(),
            Arc::new(Sleepy(Duration::from_millis(3_500))),
        )
        .unwrap();
        let handle = s.start();

        // Runs start at t=0 and t=4; ticks at 1, 2, 3 find the first run busy.
        tokio::time::sleep(Duration::from_millis(4_500)).await;
        let stats = handle.job_stats("slow").unwrap();
        assert_eq!(stats.runs, 2);
        assert_eq!(stats.skipped, 3);
        assert_eq!(stats.succeeded, 1);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn slow_job_does_not_hold_back_others() {
        let mut s = scheduler();
        let fast = Arc::new(Counting::default());
        s.register(
            JobSpec::new("stuck", Duration::from_secs(1)).run_on_start(),
            Arc::new(Sleepy(Duration::from_secs(3600))),
        )
        .unwrap();
        s.register(JobSpec::new("fast", Duration::from_secs(1)), fast.clone()).unwrap();
        let handle = s.start();

        tokio::time::sleep(Duration::from_millis(5_500)).await;
        assert_eq!(fast.calls.load(Ordering::SeqCst), 5);
        assert_eq!(handle.job_stats("stuck").unwrap().runs, 1);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_aborts_in_flight_runs() {
        let mut s = scheduler();
        s.register(
            JobSpec::new("stuck", Duration::from_secs(1)).run_on_start(),
            Arc::new(Sleepy(Duration::from_secs(3600))),
        )
        .unwrap();
        let handle = s.start();
        tokio::time::sleep(Duration::from_millis(100)).await;

        tokio::time::timeout(Duration::from_secs(1), handle.shutdown())
            .await
            .expect("shutdown must not wait for the stuck run");
    }
}
