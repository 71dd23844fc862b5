//! The remote calendar store.
//!
//! Sync code talks to the store only through [`RemoteCalendar`]. The shipped
//! implementation is [`provider::Provider`], which forwards each call to an
//! external `calsync-provider-<name>` binary.

pub mod protocol;
pub mod provider;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CalSyncResult;
use crate::event::Event;

pub use provider::Provider;

/// How a target calendar is looked up, and created when missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarSpec {
    /// Calendar name; matched case-insensitively after trimming.
    pub summary: String,
    pub description: String,
    /// Grant public read access when the calendar is created.
    pub make_public: bool,
}

/// Which remote events to list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventQuery {
    /// All events carrying this external UID.
    Uid(String),
    /// All events starting inside the window.
    Window(TimeWindow),
}

/// Half-open time range `[from, to)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeWindow {
    /// The window covering every event start, padded on both sides.
    pub fn covering<'a>(events: impl IntoIterator<Item = &'a Event>, pad: Duration) -> Option<Self> {
        let mut starts = events.into_iter().map(|e| e.start.to_utc());
        let first = starts.next()?;
        let (min, max) = starts.fold((first, first), |(lo, hi), s| (lo.min(s), hi.max(s)));

        Some(TimeWindow {
            from: min - pad,
            to: max + pad,
        })
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.from && at < self.to
    }
}

/// Operations the sync engine needs from a calendar store.
///
/// Failures are expected to surface as [`crate::error::CalSyncError::Remote`]
/// carrying a status code so the retry layer can classify them.
#[async_trait]
pub trait RemoteCalendar: Send + Sync {
    /// Find the calendar matching `spec.summary`, creating it if needed.
    /// Returns the calendar id.
    async fn ensure_calendar(&self, spec: &CalendarSpec) -> CalSyncResult<String>;

    async fn list_events(&self, calendar_id: &str, query: &EventQuery) -> CalSyncResult<Vec<Event>>;

    /// Create an event. The store must keep `event.uid` so later runs find it.
    async fn create_event(&self, calendar_id: &str, event: &Event) -> CalSyncResult<Event>;

    /// Replace the content of the event with the given store id.
    async fn update_event(
        &self,
        calendar_id: &str,
        event_id: &str,
        event: &Event,
    ) -> CalSyncResult<Event>;
}
