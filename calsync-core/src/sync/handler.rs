//! The `kronox-sync` job kind: fetch a schedule export and reconcile it into
//! a calendar named after the schedule.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::{CalSyncError, CalSyncResult};
use crate::remote::{CalendarSpec, RemoteCalendar};
use crate::scheduler::JobHandler;
use crate::source::{ExportLocation, SourceExport, parse_export};
use crate::sync::{SyncOptions, SyncOrchestrator, SyncPayload, SyncReport};

pub struct IcsSyncJob {
    source: Arc<dyn SourceExport>,
    remote: Arc<dyn RemoteCalendar>,
    options: SyncOptions,
}

impl IcsSyncJob {
    pub fn new(
        source: Arc<dyn SourceExport>,
        remote: Arc<dyn RemoteCalendar>,
        options: SyncOptions,
    ) -> Self {
        IcsSyncJob {
            source,
            remote,
            options,
        }
    }

    /// Run one sync for `payload` and return its tally.
    pub async fn run_payload(&self, payload: &SyncPayload) -> CalSyncResult<SyncReport> {
        let location = ExportLocation::resolve(&payload.source_url)?;
        let calendar_name = payload
            .calendar
            .clone()
            .or_else(|| location.resource_id().map(String::from))
            .ok_or_else(|| {
                CalSyncError::Validation(format!(
                    "Cannot name a calendar for {}: set `calendar` or use a URL with a resurser parameter",
                    payload.source_url
                ))
            })?;

        let content = self.source.fetch(&location.ics_url).await?;
        let events = parse_export(&content)?;
        info!(calendar = %calendar_name, events = events.len(), "Fetched source export");

        let spec = CalendarSpec {
            summary: calendar_name.clone(),
            description: format!("Auto-sync for {}", calendar_name),
            make_public: payload.make_public,
        };
        let calendar_id = self
            .options
            .read_retry
            .run("ensure calendar", || self.remote.ensure_calendar(&spec))
            .await?;

        let report = SyncOrchestrator::new(self.remote.clone(), self.options.clone())
            .sync_events(&calendar_id, events)
            .await?;

        if report.errors > 0 {
            warn!(calendar = %calendar_name, "Sync finished with errors: {}", report);
        } else {
            info!(calendar = %calendar_name, "Sync finished: {}", report);
        }

        Ok(report)
    }
}

#[async_trait]
impl JobHandler for IcsSyncJob {
    async fn run(&self, payload: &serde_json::Value) -> CalSyncResult<()> {
        let payload = SyncPayload::from_value(payload)?;
        self.run_payload(&payload).await.map(|_| ())
    }
}
