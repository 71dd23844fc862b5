use std::sync::Arc;

use anyhow::{Context, Result};
use calsync_core::clock::SystemClock;
use calsync_core::source::HttpExport;
use calsync_core::{HandlerRegistry, IcsSyncJob, JobKind, JobStore, Scheduler};
use tracing::{info, warn};

use crate::config::AppConfig;

pub async fn run(config: &AppConfig) -> Result<()> {
    let state_path = config.state_path();
    let store = JobStore::open(&state_path, config.save_debounce())
        .with_context(|| format!("Failed to open job store at {}", state_path.display()))?;

    let sync_job = IcsSyncJob::new(
        Arc::new(HttpExport::new()),
        super::remote(config),
        config.sync.to_options(),
    );
    let registry = HandlerRegistry::new().register(JobKind::IcsSync, Arc::new(sync_job));
    let scheduler = Scheduler::new(
        store,
        registry,
        Arc::new(SystemClock),
        config.scheduler_config(),
    );

    scheduler.init();

    for seed in &config.jobs {
        match scheduler.upsert(seed.to_spec()) {
            Ok(job) => info!(job = %job.id, next_run_at = job.next_run_at, "Loaded job from config"),
            Err(e) => warn!(job = %seed.id, "Skipping configured job: {}", e),
        }
    }

    info!(
        jobs = scheduler.list().len(),
        state = %state_path.display(),
        provider = %config.provider,
        "Serving"
    );

    let handle = scheduler.start();
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    info!("Shutting down");
    handle.stop().await?;

    Ok(())
}
