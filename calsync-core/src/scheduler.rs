//! Recurring job scheduler.
//!
//! A heartbeat calls [`Scheduler::tick`], which dispatches every due, enabled
//! job that is not already running. Each dispatch is its own task; a global
//! semaphore bounds how many handlers execute at once. A job id enters the
//! running set at dispatch, before it waits for a permit, so overlapping ticks
//! cannot dispatch it twice.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Semaphore, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::error::{CalSyncError, CalSyncResult};
use crate::job::cadence::{next_aligned_run, retry_after_failure};
use crate::job::{Job, JobKind, JobSpec, JobStore};

/// Runs the jobs of one kind.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, payload: &serde_json::Value) -> CalSyncResult<()>;
}

/// Job kind to handler mapping, fixed before the scheduler starts.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<JobKind, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, kind: JobKind, handler: Arc<dyn JobHandler>) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    pub fn get(&self, kind: JobKind) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn contains(&self, kind: JobKind) -> bool {
        self.handlers.contains_key(&kind)
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
    pub max_concurrent_jobs: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            tick_interval: Duration::from_secs(15),
            max_concurrent_jobs: 2,
        }
    }
}

struct Inner {
    store: Arc<JobStore>,
    registry: HandlerRegistry,
    running: Mutex<HashSet<String>>,
    permits: Arc<Semaphore>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
}

/// The only writer of the job store. Cloning shares the same scheduler.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(
        store: Arc<JobStore>,
        registry: HandlerRegistry,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1)));
        Scheduler {
            inner: Arc::new(Inner {
                store,
                registry,
                running: Mutex::new(HashSet::new()),
                permits,
                clock,
                config,
            }),
        }
    }

    /// Realign jobs left stale by downtime. Call once before starting.
    pub fn init(&self) -> usize {
        let realigned = self.inner.store.realign_stale(self.inner.clock.now());
        if realigned > 0 {
            info!(realigned, "Realigned jobs missed during downtime");
        }
        realigned
    }

    /// Create or update a job. The kind must have a registered handler and
    /// the payload must be one that handler accepts.
    pub fn upsert(&self, spec: JobSpec) -> CalSyncResult<Job> {
        if spec.id.trim().is_empty() {
            return Err(CalSyncError::Validation("Job id must not be empty".into()));
        }
        if spec.interval_min == Some(0) {
            return Err(CalSyncError::Validation(format!(
                "Job '{}' needs an interval of at least one minute",
                spec.id
            )));
        }

        let kind: JobKind = spec.kind.parse()?;
        if !self.inner.registry.contains(kind) {
            return Err(CalSyncError::UnknownJobType(spec.kind));
        }
        kind.validate_payload(&spec.payload)?;

        let job = self.inner.store.upsert(spec, kind, self.inner.clock.now());
        debug!(job = %job.id, next_run_at = job.next_run_at, "Upserted job");
        Ok(job)
    }

    pub fn remove(&self, id: &str) -> CalSyncResult<Job> {
        self.inner
            .store
            .remove(id)
            .ok_or_else(|| CalSyncError::JobNotFound(id.to_string()))
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> CalSyncResult<Job> {
        self.inner
            .store
            .set_enabled(id, enabled, self.inner.clock.now())
            .ok_or_else(|| CalSyncError::JobNotFound(id.to_string()))
    }

    /// Make a job due on the next tick.
    pub fn run_now(&self, id: &str) -> CalSyncResult<Job> {
        self.inner
            .store
            .set_next_run(id, self.inner.clock.now())
            .ok_or_else(|| CalSyncError::JobNotFound(id.to_string()))
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        self.inner.store.get(id)
    }

    pub fn list(&self) -> Vec<Job> {
        self.inner.store.list()
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.inner.running.lock().contains(id)
    }

    pub fn running_count(&self) -> usize {
        self.inner.running.lock().len()
    }

    /// Dispatch every due job that is not already running, oldest due first.
    pub fn tick(&self) -> Vec<JoinHandle<()>> {
        let now = self.inner.clock.now();
        let mut dispatched = Vec::new();

        for job in self.inner.store.list() {
            if !job.is_due(now) {
                continue;
            }
            if !self.inner.running.lock().insert(job.id.clone()) {
                continue;
            }

            debug!(job = %job.id, "Dispatching");
            dispatched.push(tokio::spawn(self.clone().run_one(job)));
        }

        dispatched
    }

    async fn run_one(self, job: Job) {
        let permit = match self.inner.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                error!(job = %job.id, "Job slot unavailable: {}", e);
                self.inner.running.lock().remove(&job.id);
                return;
            }
        };

        info!(job = %job.id, kind = %job.kind, "Job started");
        let result = match self.inner.registry.get(job.kind) {
            Some(handler) => {
                let payload = job.payload.clone();
                // A panicking handler is reported as a failure.
                tokio::spawn(async move { handler.run(&payload).await })
                    .await
                    .unwrap_or_else(|e| Err(CalSyncError::Handler(format!("Handler panicked: {}", e))))
            }
            None => Err(CalSyncError::UnknownJobType(job.kind.to_string())),
        };
        drop(permit);

        let now = self.inner.clock.now();
        let interval_min = self
            .inner
            .store
            .get(&job.id)
            .map_or(job.interval_min, |current| current.interval_min);

        match result {
            Ok(()) => {
                let next = next_aligned_run(interval_min, now);
                self.inner.store.set_next_run(&job.id, next);
                info!(job = %job.id, next_run_at = next, "Job finished");
            }
            Err(e) => {
                let next = retry_after_failure(interval_min, now);
                self.inner.store.set_next_run(&job.id, next);
                warn!(job = %job.id, next_run_at = next, "Job failed: {}", e);
            }
        }

        self.inner.running.lock().remove(&job.id);
    }

    /// Start the heartbeat. The first tick fires immediately.
    pub fn start(&self) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let scheduler = self.clone();
        let period = self.inner.config.tick_interval;

        let task = tokio::spawn(async move {
            let mut heartbeat = tokio::time::interval(period);
            heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = heartbeat.tick() => {
                        scheduler.tick();
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
        });

        info!(tick = ?period, "Scheduler started");
        SchedulerHandle {
            shutdown: Some(shutdown_tx),
            task,
            scheduler: self.clone(),
        }
    }
}

/// Controls a running heartbeat.
pub struct SchedulerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
    scheduler: Scheduler,
}

impl SchedulerHandle {
    /// Stop dispatching and persist the store. Jobs already running are not
    /// interrupted.
    pub async fn stop(mut self) -> CalSyncResult<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            error!("Scheduler heartbeat ended abnormally: {}", e);
        }

        let still_running = self.scheduler.running_count();
        if still_running > 0 {
            warn!(still_running, "Stopping with jobs in flight");
        }

        self.scheduler.inner.store.flush().await?;
        info!("Scheduler stopped");
        Ok(())
    }
}
