use std::time::Duration;

use anyhow::{Context, Result};
use calsync_core::Job;
use calsync_core::job::store::{JobStore, sort_for_listing};
use chrono::{DateTime, Local, Utc};
use owo_colors::OwoColorize;

use crate::config::AppConfig;

/// Print the persisted jobs. Reads the state file directly and never writes
/// it, so it is safe to run next to a serving daemon.
pub fn run(config: &AppConfig) -> Result<()> {
    let path = config.state_path();
    let mut jobs: Vec<Job> = JobStore::load(&path)
        .with_context(|| format!("Failed to read job store at {}", path.display()))?
        .into_values()
        .collect();

    if jobs.is_empty() {
        println!("No jobs in {}", path.display());
        return Ok(());
    }

    sort_for_listing(&mut jobs);
    let now = Utc::now().timestamp();
    for job in &jobs {
        println!("{}", render(job, now));
    }

    Ok(())
}

fn render(job: &Job, now: i64) -> String {
    let state = if job.enabled {
        "enabled".green().to_string()
    } else {
        "disabled".dimmed().to_string()
    };
    let source = job
        .payload
        .get("sourceUrl")
        .and_then(|v| v.as_str())
        .unwrap_or("-");

    format!(
        "{}  {}  every {}m  {}  {}\n   {}",
        job.id.bold(),
        job.kind,
        job.interval_min,
        state,
        describe_next_run(job.next_run_at, now),
        source.dimmed()
    )
}

fn describe_next_run(at: i64, now: i64) -> String {
    if at == 0 {
        return "never scheduled".to_string();
    }

    let when = DateTime::<Utc>::from_timestamp(at, 0)
        .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| at.to_string());
    let distance = humantime::format_duration(Duration::from_secs(at.abs_diff(now)));

    if at >= now {
        format!("next {} (in {})", when, distance)
    } else {
        format!("next {} (overdue by {})", when, distance)
    }
}
