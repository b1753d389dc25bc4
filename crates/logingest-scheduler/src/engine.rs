use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::{
    clock::{Clock, SystemClock},
    cron::CronSchedule,
    error::{Result, SchedulerError},
    types::{JobConfig, JobRunStats, JobStatus, SchedulerSettings, SchedulerStatus},
};

type JobFuture = BoxFuture<'static, anyhow::Result<()>>;
type JobFn = Arc<dyn Fn() -> JobFuture + Send + Sync>;

struct JobEntry {
    cron: CronSchedule,
    config: JobConfig,
    run: JobFn,
    stats: JobRunStats,
    /// Dispatched executions not yet finished (running or waiting for a slot).
    active: usize,
    /// Registration this entry's `run` belongs to; fires carry it to detect replacement.
    generation: u64,
}

impl JobEntry {
    fn grace(&self, settings: &SchedulerSettings) -> Duration {
        self.config.misfire_grace.unwrap_or(settings.misfire_grace)
    }

    fn status(&self, id: &str) -> JobStatus {
        JobStatus {
            id: id.to_string(),
            name: self.config.name.clone().unwrap_or_else(|| id.to_string()),
            schedule: self.cron.expression().to_string(),
            enabled: self.config.enabled,
            last_run: self.stats.last_run,
            next_run: self.stats.next_run,
            run_count: self.stats.run_count,
            error_count: self.stats.error_count,
            missed_count: self.stats.missed_count,
            active_instances: self.active,
            last_error: self.stats.last_error.clone(),
        }
    }
}

/// In-memory job registry; `order` keeps registration order.
#[derive(Default)]
struct JobTable {
    order: Vec<String>,
    entries: HashMap<String, JobEntry>,
    registrations: u64,
}

struct Shared {
    settings: SchedulerSettings,
    clock: Arc<dyn Clock>,
    jobs: Mutex<JobTable>,
    slots: Arc<Semaphore>,
    tracker: TaskTracker,
}

struct RunState {
    cancel: CancellationToken,
    driver: JoinHandle<()>,
}

/// Cron-driven job engine with a global concurrency ceiling.
///
/// A single loop evaluates triggers once per tick; each due fire is spawned
/// as its own task that waits for one of `max_parallel_jobs` slots. Overdue
/// fires of the same job coalesce into one execution as long as the latest
/// of them is within the misfire grace window.
pub struct Scheduler {
    shared: Arc<Shared>,
    state: Mutex<Option<RunState>>,
}

impl Scheduler {
    pub fn new(settings: SchedulerSettings) -> Self {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    /// Build an engine reading time from `clock` instead of the system clock.
    pub fn with_clock(settings: SchedulerSettings, clock: Arc<dyn Clock>) -> Self {
        let slots = Arc::new(Semaphore::new(settings.max_parallel_jobs.max(1)));
        Self {
            shared: Arc::new(Shared {
                settings,
                clock,
                jobs: Mutex::new(JobTable::default()),
                slots,
                tracker: TaskTracker::new(),
            }),
            state: Mutex::new(None),
        }
    }

    /// Register `job` under `id`, or atomically replace the schedule of an
    /// existing job with that id (its statistics are kept). Fires of the
    /// replaced registration still waiting for a slot are dropped.
    pub fn add_job<F, Fut>(
        &self,
        id: &str,
        job: F,
        cron_expression: &str,
        config: JobConfig,
    ) -> Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let cron = CronSchedule::parse(cron_expression).inspect_err(|e| {
            error!(job_id = %id, error = %e, "failed to add job");
        })?;
        let now = self.shared.clock.now();
        let Some(next) = cron.next_after(now, self.shared.settings.timezone) else {
            let e = SchedulerError::invalid(cron_expression, "expression never fires");
            error!(job_id = %id, error = %e, "failed to add job");
            return Err(e);
        };
        let next_run = config.enabled.then_some(next);
        let run: JobFn = Arc::new(move || job().boxed());

        let mut table = self.shared.lock_jobs();
        table.registrations += 1;
        let generation = table.registrations;
        match table.entries.get_mut(id) {
            Some(existing) => {
                existing.cron = cron;
                existing.config = config;
                existing.run = run;
                existing.generation = generation;
                existing.stats.next_run = next_run;
                info!(job_id = %id, schedule = %existing.cron, next_run = ?next_run, "job schedule replaced");
            }
            None => {
                info!(job_id = %id, schedule = %cron, next_run = ?next_run, "job scheduled");
                table.order.push(id.to_string());
                table.entries.insert(
                    id.to_string(),
                    JobEntry {
                        cron,
                        config,
                        run,
                        stats: JobRunStats {
                            next_run,
                            ..JobRunStats::default()
                        },
                        active: 0,
                        generation,
                    },
                );
            }
        }
        Ok(())
    }

    /// Unregister a job. Executions already dispatched still finish.
    pub fn remove_job(&self, id: &str) -> Result<()> {
        let mut table = self.shared.lock_jobs();
        if table.entries.remove(id).is_none() {
            return Err(SchedulerError::JobNotFound { id: id.to_string() });
        }
        table.order.retain(|j| j != id);
        info!(job_id = %id, "job removed");
        Ok(())
    }

    /// Start evaluating triggers. Calling this while running is a no-op.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<()> {
        let mut state = self.lock_state();
        if state.is_some() {
            warn!("scheduler is already running");
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SchedulerError::EngineStart(e.to_string()))?;

        {
            let table = self.shared.lock_jobs();
            info!(
                timezone = %self.shared.settings.timezone,
                max_parallel_jobs = self.shared.settings.max_parallel_jobs,
                jobs = table.order.len(),
                "starting scheduler"
            );
            for id in &table.order {
                if let Some(job) = table.entries.get(id) {
                    info!(job_id = %id, schedule = %job.cron, next_run = ?job.stats.next_run, "scheduled job");
                }
            }
        }

        let cancel = CancellationToken::new();
        let driver = runtime.spawn(Arc::clone(&self.shared).drive(cancel.clone()));
        *state = Some(RunState { cancel, driver });
        info!("scheduler started");
        Ok(())
    }

    /// Stop scheduling new fires. Fires still waiting for a slot are
    /// cancelled. With `wait`, returns only after every running execution
    /// has completed; otherwise running executions finish in the background.
    ///
    /// Jobs and their statistics survive; `start()` resumes firing.
    pub async fn shutdown(&self, wait: bool) {
        let run = self.lock_state().take();
        let Some(run) = run else {
            warn!("scheduler is not running");
            return;
        };

        info!(wait, "shutting down scheduler");
        run.cancel.cancel();
        if let Err(e) = run.driver.await {
            error!(error = %e, "scheduler loop ended abnormally");
        }

        if wait {
            self.shared.tracker.close();
            self.shared.tracker.wait().await;
            self.shared.tracker.reopen();
        }
        info!("scheduler shut down");
    }

    pub fn is_running(&self) -> bool {
        self.lock_state().is_some()
    }

    pub fn get_job_status(&self, id: &str) -> Option<JobStatus> {
        let table = self.shared.lock_jobs();
        table.entries.get(id).map(|job| job.status(id))
    }

    /// Status of every job in registration order.
    pub fn get_all_jobs_status(&self) -> Vec<JobStatus> {
        let table = self.shared.lock_jobs();
        table
            .order
            .iter()
            .filter_map(|id| table.entries.get(id).map(|job| job.status(id)))
            .collect()
    }

    pub fn status(&self) -> SchedulerStatus {
        let jobs = self.get_all_jobs_status();
        SchedulerStatus {
            is_running: self.is_running(),
            total_jobs: jobs.len(),
            jobs,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, Option<RunState>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Shared {
    fn lock_jobs(&self) -> MutexGuard<'_, JobTable> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Trigger loop. Ticks until `cancel` fires.
    async fn drive(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.settings.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => self.tick(&cancel),
            }
        }
        debug!("scheduler loop stopped");
    }

    /// Dispatch every job whose next fire time has arrived.
    fn tick(self: &Arc<Self>, cancel: &CancellationToken) {
        let now = self.clock.now();
        let tz = self.settings.timezone;
        let mut table = self.lock_jobs();
        let JobTable { order, entries, .. } = &mut *table;

        for id in order.iter() {
            let Some(job) = entries.get_mut(id) else {
                continue;
            };
            let Some(due) = job.stats.next_run.filter(|due| *due <= now) else {
                continue;
            };

            // Coalesce: find the latest fire time inside the grace window and
            // advance next_run past `now`. Fires before the window are dropped.
            // Grace periods too large for chrono arithmetic are unbounded.
            let grace = job.grace(&self.settings);
            let grace_span = TimeDelta::from_std(grace).ok();
            let horizon = grace_span
                .and_then(|g| now.checked_sub_signed(g))
                .unwrap_or(DateTime::<Utc>::MIN_UTC);
            let mut latest = (due >= horizon).then_some(due);
            let mut cursor = if due >= horizon {
                due
            } else {
                horizon
                    .checked_sub_signed(TimeDelta::nanoseconds(1))
                    .unwrap_or(horizon)
            };
            let next = loop {
                match job.cron.next_after(cursor, tz) {
                    Some(fire) if fire <= now => {
                        latest = Some(fire);
                        cursor = fire;
                    }
                    other => break other,
                }
            };
            job.stats.next_run = next;

            let Some(fire) = latest else {
                job.stats.missed_count += 1;
                warn!(
                    job_id = %id,
                    scheduled_for = %due,
                    grace_secs = grace.as_secs(),
                    "fire missed by more than the grace period; skipping"
                );
                continue;
            };

            if job.active >= job.config.max_instances {
                job.stats.missed_count += 1;
                warn!(
                    job_id = %id,
                    max_instances = job.config.max_instances,
                    "maximum running instances reached; fire skipped"
                );
                continue;
            }

            job.active += 1;
            let budget = match grace_span.and_then(|g| fire.checked_add_signed(g)) {
                Some(deadline) => (deadline - now).to_std().unwrap_or(Duration::ZERO),
                None => Duration::MAX,
            };
            debug!(job_id = %id, scheduled_for = %fire, "dispatching job");
            self.tracker.spawn(Arc::clone(self).dispatch(
                id.clone(),
                job.generation,
                Arc::clone(&job.run),
                fire,
                budget,
                cancel.clone(),
            ));
        }
    }

    /// Wait for a global slot (at most `budget`), run the job and record the outcome.
    async fn dispatch(
        self: Arc<Self>,
        id: String,
        generation: u64,
        run: JobFn,
        fire: DateTime<Utc>,
        budget: Duration,
        cancel: CancellationToken,
    ) {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(job_id = %id, "scheduler stopped before a slot freed; fire cancelled");
                self.abandon(&id, false);
                return;
            }
            acquired = tokio::time::timeout(budget, Arc::clone(&self.slots).acquire_owned()) => {
                match acquired {
                    Ok(Ok(permit)) => permit,
                    Ok(Err(_)) => {
                        self.abandon(&id, false);
                        return;
                    }
                    Err(_) => {
                        warn!(job_id = %id, scheduled_for = %fire, "no free slot within the grace period; fire dropped");
                        self.abandon(&id, true);
                        return;
                    }
                }
            }
        };

        let replaced = self
            .lock_jobs()
            .entries
            .get(&id)
            .is_some_and(|job| job.generation != generation);
        if replaced {
            debug!(job_id = %id, scheduled_for = %fire, "job replaced while waiting for a slot; fire dropped");
            drop(permit);
            self.abandon(&id, false);
            return;
        }

        let started = self.clock.now();
        self.with_job(&id, |job| job.stats.last_run = Some(started));
        info!(job_id = %id, scheduled_for = %fire, "running job");

        let timer = tokio::time::Instant::now();
        let outcome = AssertUnwindSafe(async { run().await }).catch_unwind().await;
        drop(permit);

        let result = match outcome {
            Ok(result) => result,
            Err(panic) => Err(anyhow::anyhow!("job panicked: {}", panic_message(panic.as_ref()))),
        };
        let elapsed_ms = timer.elapsed().as_millis() as u64;

        match &result {
            Ok(()) => info!(job_id = %id, elapsed_ms, "job completed"),
            Err(e) => error!(job_id = %id, elapsed_ms, error = %format!("{e:#}"), "job failed"),
        }

        self.with_job(&id, |job| {
            job.active = job.active.saturating_sub(1);
            job.stats.run_count += 1;
            if let Err(e) = &result {
                job.stats.error_count += 1;
                job.stats.last_error = Some(format!("{e:#}"));
            }
        });
    }

    /// Release a dispatched fire that never ran.
    fn abandon(&self, id: &str, missed: bool) {
        self.with_job(id, |job| {
            job.active = job.active.saturating_sub(1);
            if missed {
                job.stats.missed_count += 1;
            }
        });
    }

    /// Apply `f` to a job if it is still registered.
    fn with_job(&self, id: &str, f: impl FnOnce(&mut JobEntry)) {
        if let Some(job) = self.lock_jobs().entries.get_mut(id) {
            f(job);
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
