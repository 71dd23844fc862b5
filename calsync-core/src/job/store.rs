//! Durable job storage with debounced, atomic persistence.
//!
//! The whole job map lives in memory and is written as one JSON document
//! (`{"schedules": {<id>: Job}}`). Mutations only mark the store dirty; a
//! single deferred flush collapses every mutation made within the debounce
//! window into one write. Writes go to `<file>.tmp` first and are renamed over
//! the real file, so a crash mid-write leaves the previous state intact.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::error::{CalSyncError, CalSyncResult};
use crate::job::cadence::{STALE_AFTER_SECS, next_aligned_run};
use crate::job::{DEFAULT_INTERVAL_MIN, Job, JobKind, JobMap, JobSpec};

/// Default window within which mutations collapse into one write.
pub const DEFAULT_SAVE_DEBOUNCE: Duration = Duration::from_millis(200);

#[derive(Default, Serialize, Deserialize)]
struct StateFile {
    #[serde(default)]
    schedules: JobMap,
}

pub struct JobStore {
    path: PathBuf,
    debounce: Duration,
    jobs: Mutex<JobMap>,
    flush_pending: AtomicBool,
    /// Serializes writers so a slow write never lands after a newer one.
    write_lock: tokio::sync::Mutex<()>,
    writes: AtomicU64,
}

impl JobStore {
    /// Open the store at `path`, loading any existing state.
    pub fn open(path: impl Into<PathBuf>, debounce: Duration) -> CalSyncResult<Arc<Self>> {
        let path = path.into();
        let jobs = Self::load(&path)?;

        Ok(Arc::new(JobStore {
            path,
            debounce,
            jobs: Mutex::new(jobs),
            flush_pending: AtomicBool::new(false),
            write_lock: tokio::sync::Mutex::new(()),
            writes: AtomicU64::new(0),
        }))
    }

    /// Read the state file. A missing file is an empty store.
    pub fn load(path: &Path) -> CalSyncResult<JobMap> {
        if !path.exists() {
            return Ok(JobMap::new());
        }

        let content = std::fs::read_to_string(path)?;
        let state: StateFile = serde_json::from_str(&content).map_err(|e| {
            CalSyncError::Serialization(format!("Failed to parse {}: {}", path.display(), e))
        })?;

        Ok(state.schedules)
    }

    /// Write `jobs` to `path` via a temp file and an atomic rename.
    pub async fn save(path: &Path, jobs: &JobMap) -> CalSyncResult<()> {
        let body = serde_json::to_string_pretty(&StateFile {
            schedules: jobs.clone(),
        })?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = temp_path(path);
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, path).await?;

        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        self.jobs.lock().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.jobs.lock().contains_key(id)
    }

    /// Snapshot of all jobs, ordered by ascending `next_run_at`, then id.
    pub fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.lock().values().cloned().collect();
        sort_for_listing(&mut jobs);
        jobs
    }

    /// Insert or merge a job. An existing `next_run_at` survives unless the
    /// spec supplies one; new jobs start at the next cadence boundary.
    pub(crate) fn upsert(self: &Arc<Self>, spec: JobSpec, kind: JobKind, now: i64) -> Job {
        let interval_min = spec.interval_min.unwrap_or(DEFAULT_INTERVAL_MIN);

        let job = {
            let mut jobs = self.jobs.lock();
            let next_run_at = spec
                .next_run_at
                .or_else(|| jobs.get(&spec.id).map(|prev| prev.next_run_at))
                .unwrap_or_else(|| next_aligned_run(interval_min, now));

            let job = Job {
                id: spec.id.clone(),
                kind,
                payload: spec.payload,
                interval_min,
                enabled: spec.enabled.unwrap_or(true),
                next_run_at,
            };
            jobs.insert(spec.id, job.clone());
            job
        };

        self.mark_dirty();
        job
    }

    pub(crate) fn remove(self: &Arc<Self>, id: &str) -> Option<Job> {
        let removed = self.jobs.lock().remove(id);
        if removed.is_some() {
            self.mark_dirty();
        }
        removed
    }

    /// Toggle a job. Re-enabling an overdue job realigns it to the next
    /// boundary instead of firing a backlog run.
    pub(crate) fn set_enabled(self: &Arc<Self>, id: &str, enabled: bool, now: i64) -> Option<Job> {
        let job = {
            let mut jobs = self.jobs.lock();
            let job = jobs.get_mut(id)?;
            job.enabled = enabled;
            if enabled && job.next_run_at < now {
                job.next_run_at = next_aligned_run(job.interval_min, now);
            }
            job.clone()
        };

        self.mark_dirty();
        Some(job)
    }

    pub(crate) fn set_next_run(self: &Arc<Self>, id: &str, at: i64) -> Option<Job> {
        let job = {
            let mut jobs = self.jobs.lock();
            let job = jobs.get_mut(id)?;
            job.next_run_at = at;
            job.clone()
        };

        self.mark_dirty();
        Some(job)
    }

    /// Move never-scheduled or long-stale jobs onto the next boundary so a
    /// restart after downtime does not fire every job at once.
    pub(crate) fn realign_stale(self: &Arc<Self>, now: i64) -> usize {
        let realigned = {
            let mut jobs = self.jobs.lock();
            let mut count = 0;
            for job in jobs.values_mut() {
                if job.next_run_at == 0 || job.next_run_at < now - STALE_AFTER_SECS {
                    job.next_run_at = next_aligned_run(job.interval_min, now);
                    count += 1;
                }
            }
            count
        };

        if realigned > 0 {
            debug!(realigned, "Realigned stale jobs");
        }
        self.mark_dirty();
        realigned
    }

    /// Request a deferred write. Calls made while a write is already pending
    /// are absorbed by it.
    pub(crate) fn mark_dirty(self: &Arc<Self>) {
        if self.flush_pending.swap(true, Ordering::AcqRel) {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime available; job store changes stay unsaved until flush");
            self.flush_pending.store(false, Ordering::Release);
            return;
        };

        let store = Arc::clone(self);
        runtime.spawn(async move {
            tokio::time::sleep(store.debounce).await;
            store.flush_pending.store(false, Ordering::Release);
            if let Err(e) = store.flush().await {
                error!(path = %store.path.display(), "Failed to save job store: {}", e);
            }
        });
    }

    /// Write the current state immediately.
    pub async fn flush(&self) -> CalSyncResult<()> {
        let _guard = self.write_lock.lock().await;
        let snapshot = self.jobs.lock().clone();
        Self::save(&self.path, &snapshot).await?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Number of completed writes since the store was opened.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

pub fn sort_for_listing(jobs: &mut [Job]) {
    jobs.sort_by(|a, b| {
        a.next_run_at
            .cmp(&b.next_run_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}
