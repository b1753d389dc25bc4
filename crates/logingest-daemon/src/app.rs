use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use logingest_core::LogingestConfig;
use logingest_scheduler::SchedulerSettings;
use logingest_service::{SchedulerService, ServiceStatus};
use logingest_sources::ConnectorRegistry;
use logingest_store::LogStore;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, warn};

/// How often the run loop checks the shutdown flag.
const SHUTDOWN_POLL: Duration = Duration::from_secs(1);

/// The assembled process: store, connectors and the scheduler service.
pub struct App {
    config: LogingestConfig,
    store: Arc<LogStore>,
    service: SchedulerService,
}

impl App {
    /// Open the store, ensure its schema and register every source.
    pub fn initialize(config: LogingestConfig) -> anyhow::Result<Self> {
        if config.database.has_network_settings() {
            warn!(
                host = config.database.host.as_deref().unwrap_or(""),
                "network database settings are ignored; using the embedded store"
            );
        }
        let path = config.database.store_path();
        ensure_parent_dir(&path)
            .with_context(|| format!("creating directory for {}", path.display()))?;
        let store = LogStore::open(&path)
            .with_context(|| format!("opening log store at {}", path.display()))?;
        Self::with_store(config, store)
    }

    fn with_store(config: LogingestConfig, store: LogStore) -> anyhow::Result<Self> {
        store.ensure_schema()?;
        let store = Arc::new(store);

        let settings = SchedulerSettings::from_config(&config.scheduler)?;
        let mut service =
            SchedulerService::new(settings, ConnectorRegistry::with_builtins(), store.clone());
        service.initialize_services(&config.sources);

        Ok(Self {
            config,
            store,
            service,
        })
    }

    /// Validate every source against an in-memory store and render the
    /// resulting job table. Fails if any enabled, scheduled source could not
    /// be registered. Sources sharing a name count once.
    pub fn check(config: LogingestConfig) -> anyhow::Result<String> {
        let expected = config
            .sources
            .iter()
            .filter(|s| s.enabled && s.schedule.as_deref().is_some_and(|c| !c.trim().is_empty()))
            .map(|s| s.name.as_str())
            .collect::<HashSet<_>>()
            .len();
        let app = Self::with_store(config, LogStore::open_in_memory()?)?;
        let table = render_jobs(&app.service.get_status());
        let registered = app.service.get_status().total_services;
        app.store.close();

        if registered < expected {
            anyhow::bail!(
                "{} of {expected} scheduled source(s) failed validation\n{table}",
                expected - registered
            );
        }
        Ok(table)
    }

    /// Run until the shutdown flag is set, then stop the scheduler (waiting
    /// for running jobs) and close the store.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        self.service.start()?;
        info!(
            services = self.service.get_status().total_services,
            "logingest running"
        );

        let status_every = Duration::from_secs(self.config.scheduler.status_interval_secs);
        let mut last_status = Instant::now();
        let mut poll = tokio::time::interval(SHUTDOWN_POLL);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            poll.tick().await;
            if *shutdown.borrow() {
                break;
            }
            if !status_every.is_zero() && last_status.elapsed() >= status_every {
                log_status(&self.service.get_status());
                last_status = Instant::now();
            }
        }

        info!("shutdown requested");
        self.service.shutdown(true).await;
        log_status(&self.service.get_status());
        self.store.close();
        info!("logingest stopped");
        Ok(())
    }
}

fn log_status(status: &ServiceStatus) {
    match serde_json::to_string(status) {
        Ok(json) => info!(status = %json, "scheduler status"),
        Err(e) => warn!(error = %e, "failed to serialize scheduler status"),
    }
}

fn render_jobs(status: &ServiceStatus) -> String {
    let mut out = format!("{:<24} {:<16} {}\n", "SOURCE", "SCHEDULE", "NEXT RUN");
    for job in &status.jobs {
        let next = job
            .next_run
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(out, "{:<24} {:<16} {}", job.id, job.schedule, next);
    }
    out
}

fn ensure_parent_dir(path: &std::path::Path) -> std::io::Result<()> {
    match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => std::fs::create_dir_all(parent),
        None => Ok(()),
    }
}
