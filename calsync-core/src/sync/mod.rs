//! One orchestration run: reconcile a batch of source events into a remote
//! calendar through a small worker pool.
//!
//! The batch is prefetched once, then split into per-UID queues that workers
//! drain in parallel. Writes from all workers share one [`Throttle`] and are
//! retried under the write [`RetryPolicy`]; failures are counted per event
//! and never abort the rest of the batch.

pub mod handler;

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::{CalSyncError, CalSyncResult};
use crate::event::Event;
use crate::reconcile::{Decision, EventReconciler};
use crate::remote::RemoteCalendar;
use crate::retry::RetryPolicy;
use crate::source::ExportLocation;
use crate::throttle::Throttle;

pub use handler::IcsSyncJob;

/// Upper bound on parallel writers per run.
pub const MAX_CONCURRENCY: usize = 5;

/// Default spacing between remote writes.
pub const DEFAULT_THROTTLE_GAP: Duration = Duration::from_millis(1000);

/// Tuning for a sync run.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Worker count, clamped to `1..=MAX_CONCURRENCY`.
    pub concurrency: usize,
    pub throttle_gap: Duration,
    pub write_retry: RetryPolicy,
    pub read_retry: RetryPolicy,
    /// Compute and count decisions without writing.
    pub dry_run: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        SyncOptions {
            concurrency: 1,
            throttle_gap: DEFAULT_THROTTLE_GAP,
            write_retry: RetryPolicy::writes(),
            read_retry: RetryPolicy::reads(),
            dry_run: false,
        }
    }
}

impl SyncOptions {
    pub fn workers(&self) -> usize {
        self.concurrency.clamp(1, MAX_CONCURRENCY)
    }
}

/// Tally of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl SyncReport {
    pub fn merge(&mut self, other: SyncReport) {
        self.created += other.created;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.errors += other.errors;
    }

    pub fn total(&self) -> usize {
        self.created + self.updated + self.skipped + self.errors
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} created, {} updated, {} skipped, {} errors",
            self.created, self.updated, self.skipped, self.errors
        )
    }
}

/// Payload of an ICS sync job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPayload {
    /// Schedule page or ICS export URL.
    pub source_url: String,
    /// Target calendar name. Defaults to the export's first resource id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calendar: Option<String>,
    #[serde(default = "default_make_public")]
    pub make_public: bool,
}

fn default_make_public() -> bool {
    true
}

impl SyncPayload {
    pub fn new(source_url: impl Into<String>) -> Self {
        SyncPayload {
            source_url: source_url.into(),
            calendar: None,
            make_public: default_make_public(),
        }
    }

    /// Decode and validate a job payload.
    pub fn from_value(value: &serde_json::Value) -> CalSyncResult<Self> {
        let payload: SyncPayload = serde_json::from_value(value.clone())
            .map_err(|e| CalSyncError::Validation(format!("Invalid sync payload: {}", e)))?;
        ExportLocation::resolve(&payload.source_url)?;
        Ok(payload)
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

enum Outcome {
    Created,
    Updated,
    Skipped,
}

/// State shared by the workers of one run.
struct Run {
    remote: Arc<dyn RemoteCalendar>,
    reconciler: EventReconciler,
    throttle: Throttle,
    write_retry: RetryPolicy,
    dry_run: bool,
    queue: Mutex<VecDeque<Vec<Event>>>,
}

/// Applies reconciliation decisions for batches of source events.
pub struct SyncOrchestrator {
    remote: Arc<dyn RemoteCalendar>,
    options: SyncOptions,
}

impl SyncOrchestrator {
    pub fn new(remote: Arc<dyn RemoteCalendar>, options: SyncOptions) -> Self {
        SyncOrchestrator { remote, options }
    }

    /// Reconcile `events` into `calendar_id`.
    ///
    /// Returns an error only when the run cannot start (the prefetch read
    /// failed); per-event failures are counted in the report.
    pub async fn sync_events(
        &self,
        calendar_id: &str,
        mut events: Vec<Event>,
    ) -> CalSyncResult<SyncReport> {
        let mut report = SyncReport::default();

        events.retain(|event| {
            if event.uid.is_some() {
                return true;
            }
            error!(summary = %event.summary, "Rejecting event without UID");
            report.errors += 1;
            false
        });
        events.sort_by_key(|e| e.start.to_utc());

        let reconciler = EventReconciler::prefetch(
            self.remote.clone(),
            calendar_id,
            &events,
            self.options.read_retry.clone(),
        )
        .await?;

        let run = Arc::new(Run {
            remote: self.remote.clone(),
            reconciler,
            throttle: Throttle::new(self.options.throttle_gap),
            write_retry: self.options.write_retry.clone(),
            dry_run: self.options.dry_run,
            queue: Mutex::new(group_by_uid(events)),
        });

        let mut workers = JoinSet::new();
        for _ in 0..self.options.workers() {
            workers.spawn(drain(run.clone()));
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(partial) => report.merge(partial),
                Err(e) => {
                    return Err(CalSyncError::Handler(format!("Sync worker failed: {}", e)));
                }
            }
        }

        Ok(report)
    }
}

/// Split events into per-UID queues, keeping first-appearance order both
/// across and within groups.
fn group_by_uid(events: Vec<Event>) -> VecDeque<Vec<Event>> {
    let mut order: Vec<Vec<Event>> = Vec::new();
    let mut slots: HashMap<String, usize> = HashMap::new();

    for event in events {
        let uid = event.uid.clone().unwrap_or_default();
        match slots.get(&uid) {
            Some(&slot) => order[slot].push(event),
            None => {
                slots.insert(uid, order.len());
                order.push(vec![event]);
            }
        }
    }

    order.into()
}

async fn drain(run: Arc<Run>) -> SyncReport {
    let mut report = SyncReport::default();

    loop {
        let next = run.queue.lock().pop_front();
        let Some(group) = next else {
            break;
        };

        for event in group {
            match apply(&run, &event).await {
                Ok(Outcome::Created) => report.created += 1,
                Ok(Outcome::Updated) => report.updated += 1,
                Ok(Outcome::Skipped) => report.skipped += 1,
                Err(e) => {
                    error!(event = %event.label(), "Failed to sync event: {}", e);
                    report.errors += 1;
                }
            }
        }
    }

    report
}

async fn apply(run: &Run, event: &Event) -> CalSyncResult<Outcome> {
    let calendar_id = run.reconciler.calendar_id();

    match run.reconciler.resolve(event).await? {
        Decision::Skip { .. } => {
            debug!(event = %event.label(), "Unchanged");
            Ok(Outcome::Skipped)
        }
        Decision::Create => {
            if run.dry_run {
                info!(event = %event.label(), "Would create");
                return Ok(Outcome::Created);
            }

            run.throttle.acquire().await;
            let created = run
                .write_retry
                .run("create", || run.remote.create_event(calendar_id, event))
                .await?;
            info!(event = %event.label(), "Created");
            run.reconciler.record(keep_uid(created, event), None);
            Ok(Outcome::Created)
        }
        Decision::Update { existing } => {
            let Some(event_id) = existing.id.as_deref() else {
                return Err(CalSyncError::Validation(format!(
                    "Remote copy of '{}' has no id",
                    event.label()
                )));
            };
            if run.dry_run {
                info!(event = %event.label(), "Would update");
                return Ok(Outcome::Updated);
            }

            run.throttle.acquire().await;
            let updated = run
                .write_retry
                .run("update", || run.remote.update_event(calendar_id, event_id, event))
                .await?;
            info!(event = %event.label(), "Updated");
            run.reconciler.record(keep_uid(updated, event), Some(&existing));
            Ok(Outcome::Updated)
        }
    }
}

/// Stores that echo writes without the UID still need to be indexed by it.
fn keep_uid(mut written: Event, source: &Event) -> Event {
    if written.uid.is_none() {
        warn!(event = %source.label(), "Store did not echo the UID");
        written.uid = source.uid.clone();
    }
    written
}
