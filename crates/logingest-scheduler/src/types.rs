use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use logingest_core::config::SchedulerConfig;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};

/// Engine-wide settings.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Timezone cron expressions are evaluated in.
    pub timezone: Tz,
    /// Size of the global execution semaphore.
    pub max_parallel_jobs: usize,
    /// Default lateness at which a fire may still run.
    pub misfire_grace: Duration,
    /// Polling cadence of the trigger loop.
    pub tick: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            timezone: Tz::UTC,
            max_parallel_jobs: logingest_core::config::DEFAULT_MAX_PARALLEL_JOBS,
            misfire_grace: Duration::from_secs(logingest_core::config::DEFAULT_MISFIRE_GRACE_SECS),
            tick: Duration::from_secs(1),
        }
    }
}

impl SchedulerSettings {
    pub fn from_config(config: &SchedulerConfig) -> Result<Self> {
        let timezone: Tz = config
            .timezone
            .parse()
            .map_err(|_| SchedulerError::InvalidTimezone(config.timezone.clone()))?;
        Ok(Self {
            timezone,
            max_parallel_jobs: config.max_parallel_jobs.max(1),
            misfire_grace: Duration::from_secs(config.misfire_grace_secs),
            ..Self::default()
        })
    }
}

/// Per-job options supplied at registration.
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Display name; defaults to the job id.
    pub name: Option<String>,
    /// Disabled jobs are registered but never fire.
    pub enabled: bool,
    /// Concurrent executions allowed for this job. Fires beyond the cap are skipped.
    pub max_instances: usize,
    /// Overrides the engine-wide misfire grace period.
    pub misfire_grace: Option<Duration>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            name: None,
            enabled: true,
            max_instances: 1,
            misfire_grace: None,
        }
    }
}

/// Run statistics owned by a job and updated only by the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobRunStats {
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub run_count: u64,
    pub error_count: u64,
    /// Fires that never executed: outside the grace window, no free slot in
    /// time, or the job was already at its instance cap.
    pub missed_count: u64,
    /// Rendered error chain of the most recent failure.
    pub last_error: Option<String>,
}

/// Point-in-time view of one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub id: String,
    pub name: String,
    pub schedule: String,
    pub enabled: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub run_count: u64,
    pub error_count: u64,
    pub missed_count: u64,
    /// Executions running or waiting for a slot.
    pub active_instances: usize,
    pub last_error: Option<String>,
}

/// Derived snapshot of the whole engine; computed on demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub is_running: bool,
    pub total_jobs: usize,
    /// Ordered by registration.
    pub jobs: Vec<JobStatus>,
}
