use std::sync::Arc;
use std::time::Duration;

use logingest_core::SourceConfig;
use logingest_scheduler::{JobConfig, JobStatus, Scheduler, SchedulerSettings};
use logingest_sources::{ConnectorRegistry, SourceConnector};
use logingest_store::LogSink;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::{Result, ServiceError};

/// Snapshot returned by [`SchedulerService::get_status`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub running: bool,
    pub total_services: usize,
    pub jobs: Vec<JobStatus>,
}

struct Service {
    name: String,
    connector: Arc<dyn SourceConnector>,
}

/// Binds configured sources to scheduled ingestion jobs.
///
/// Each enabled source gets one connector and one job whose execution is
/// fetch, transform, then a single batch insert into the shared sink.
pub struct SchedulerService {
    scheduler: Scheduler,
    registry: ConnectorRegistry,
    sink: Arc<dyn LogSink>,
    services: Vec<Service>,
}

impl SchedulerService {
    pub fn new(settings: SchedulerSettings, registry: ConnectorRegistry, sink: Arc<dyn LogSink>) -> Self {
        Self::with_scheduler(Scheduler::new(settings), registry, sink)
    }

    pub fn with_scheduler(
        scheduler: Scheduler,
        registry: ConnectorRegistry,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            scheduler,
            registry,
            sink,
            services: Vec::new(),
        }
    }

    /// Register a job for every usable source. Failures are logged per
    /// source and never prevent the remaining sources from registering.
    /// Returns the number of services registered by this call.
    pub fn initialize_services(&mut self, sources: &[SourceConfig]) -> usize {
        let mut registered = 0;
        for source in sources {
            if !source.enabled {
                info!(source = %source.name, "source disabled; skipping");
                continue;
            }
            let Some(schedule) = source.schedule.as_deref().filter(|s| !s.trim().is_empty())
            else {
                warn!(source = %source.name, "source has no schedule; skipping");
                continue;
            };
            match self.register(source, schedule) {
                Ok(()) => registered += 1,
                Err(e) => {
                    error!(source = %source.name, error = %e, "failed to initialize service")
                }
            }
        }
        info!(registered, total = self.services.len(), "services initialized");
        registered
    }

    fn register(&mut self, source: &SourceConfig, schedule: &str) -> Result<()> {
        let connector = self
            .registry
            .create(source)
            .map_err(|e| ServiceError::from_build(&source.name, e))?;

        let job_config = JobConfig {
            name: None,
            enabled: true,
            max_instances: source.max_instances.unwrap_or(1),
            misfire_grace: source.misfire_grace_secs.map(Duration::from_secs),
        };

        let job_connector = Arc::clone(&connector);
        let sink = Arc::clone(&self.sink);
        self.scheduler.add_job(
            &source.name,
            move || {
                let connector = Arc::clone(&job_connector);
                let sink = Arc::clone(&sink);
                async move {
                    ingest(connector.as_ref(), sink.as_ref())
                        .await
                        .map(|_| ())
                        .map_err(|e| {
                            anyhow::Error::new(e).context(format!("source {}", connector.name()))
                        })
                }
            },
            schedule,
            job_config,
        )?;

        let service = Service {
            name: source.name.clone(),
            connector,
        };
        match self.services.iter_mut().find(|s| s.name == source.name) {
            Some(existing) => {
                warn!(source = %source.name, "duplicate source name; replacing earlier definition");
                *existing = service;
            }
            None => self.services.push(service),
        }
        info!(source = %source.name, schedule, "service registered");
        Ok(())
    }

    /// Run one ingestion for `name` immediately, outside the schedule.
    /// Returns the number of stored entries.
    pub async fn execute_service(&self, name: &str) -> Result<usize> {
        let service = self
            .services
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| ServiceError::NotFound(name.to_string()))?;
        ingest(service.connector.as_ref(), self.sink.as_ref())
            .await
            .inspect_err(|e| error!(source = %name, error = %e, "service execution failed"))
    }

    /// Start the scheduler. With no services registered this only warns.
    pub fn start(&self) -> Result<()> {
        if self.services.is_empty() {
            warn!("no services registered; scheduler not started");
            return Ok(());
        }
        self.scheduler.start()?;
        Ok(())
    }

    pub async fn shutdown(&self, wait: bool) {
        self.scheduler.shutdown(wait).await;
    }

    pub fn get_status(&self) -> ServiceStatus {
        ServiceStatus {
            running: self.scheduler.is_running(),
            total_services: self.services.len(),
            jobs: self.scheduler.get_all_jobs_status(),
        }
    }

    pub fn service_names(&self) -> impl Iterator<Item = &str> {
        self.services.iter().map(|s| s.name.as_str())
    }
}

/// Fetch, transform and persist one batch for `connector`.
async fn ingest(connector: &dyn SourceConnector, sink: &dyn LogSink) -> Result<usize> {
    let name = connector.name();

    let items = connector.fetch().await?;
    if items.is_empty() {
        info!(source = %name, "no data fetched");
        return Ok(0);
    }
    let fetched = items.len();

    let entries = connector.transform(items);
    if entries.is_empty() {
        info!(source = %name, fetched, "nothing to store after transform");
        return Ok(0);
    }

    let stored = sink.insert_batch(entries).await?;
    info!(source = %name, fetched, stored, "log entries stored");
    Ok(stored)
}
