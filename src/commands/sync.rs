use std::sync::Arc;

use anyhow::Result;
use calsync_core::source::HttpExport;
use calsync_core::{IcsSyncJob, SyncPayload};
use owo_colors::OwoColorize;

use crate::config::AppConfig;

pub async fn run(
    config: &AppConfig,
    source_url: String,
    calendar: Option<String>,
    dry_run: bool,
    json: bool,
) -> Result<()> {
    let mut payload = SyncPayload::new(source_url);
    payload.calendar = calendar;

    let mut options = config.sync.to_options();
    options.dry_run |= dry_run;
    let dry_run = options.dry_run;

    let job = IcsSyncJob::new(Arc::new(HttpExport::new()), super::remote(config), options);
    let report = job.run_payload(&payload).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let prefix = if dry_run { "Dry run: would sync" } else { "Synced" };
    let line = format!("{} {}", prefix, report);
    if report.errors > 0 {
        println!("{}", line.yellow());
    } else {
        println!("{}", line.green());
    }

    Ok(())
}
