//! In-memory collaborators for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use parking_lot::Mutex;

use crate::clock::Clock;
use crate::error::{CalSyncResult, RemoteError};
use crate::event::{Event, EventStatus, EventTime, Transparency};
use crate::remote::{CalendarSpec, EventQuery, RemoteCalendar};

/// A one-hour timed event starting at the given UTC hour.
pub fn event_at(uid: &str, year: i32, month: u32, day: u32, hour: u32) -> Event {
    let start = Utc.with_ymd_and_hms(year, month, day, hour, 0, 0).unwrap();
    Event {
        id: None,
        uid: Some(uid.to_string()),
        summary: "Lecture".into(),
        description: None,
        location: Some("NI:A0418".into()),
        start: EventTime::DateTime(start),
        end: EventTime::DateTime(start + Duration::hours(1)),
        status: EventStatus::Confirmed,
        transparency: Transparency::Opaque,
        raw_marker: Some("Lecture".into()),
    }
}

#[derive(Default)]
struct Calls {
    list: AtomicUsize,
    create: AtomicUsize,
    update: AtomicUsize,
}

/// A remote calendar store held in memory.
///
/// Failures can be scripted per call kind (`fail_next_*`, consumed in order)
/// or permanently per UID (`fail_uid`).
#[derive(Default)]
pub struct MemoryCalendar {
    calendars: Mutex<Vec<(String, CalendarSpec)>>,
    events: Mutex<Vec<(String, Event)>>,
    next_id: AtomicUsize,
    calls: Calls,
    list_failures: Mutex<VecDeque<RemoteError>>,
    write_failures: Mutex<VecDeque<RemoteError>>,
    failing_uids: Mutex<HashMap<String, RemoteError>>,
}

impl MemoryCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an event directly, bypassing call accounting.
    pub fn insert(&self, calendar_id: &str, mut event: Event) -> Event {
        event.id = Some(self.assign_id());
        self.events
            .lock()
            .push((calendar_id.to_string(), event.clone()));
        event
    }

    pub fn events(&self, calendar_id: &str) -> Vec<Event> {
        self.events
            .lock()
            .iter()
            .filter(|(cal, _)| cal == calendar_id)
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub fn calendars(&self) -> Vec<CalendarSpec> {
        self.calendars.lock().iter().map(|(_, s)| s.clone()).collect()
    }

    pub fn fail_next_list(&self, error: RemoteError) {
        self.list_failures.lock().push_back(error);
    }

    pub fn fail_next_write(&self, error: RemoteError) {
        self.write_failures.lock().push_back(error);
    }

    pub fn fail_uid(&self, uid: &str, error: RemoteError) {
        self.failing_uids.lock().insert(uid.to_string(), error);
    }

    pub fn list_calls(&self) -> usize {
        self.calls.list.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.calls.create.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> usize {
        self.calls.update.load(Ordering::SeqCst)
    }

    fn assign_id(&self) -> String {
        format!("evt-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn check_write(&self, event: &Event) -> CalSyncResult<()> {
        if let Some(err) = self.write_failures.lock().pop_front() {
            return Err(err.into());
        }
        let failing = event
            .uid
            .as_deref()
            .and_then(|uid| self.failing_uids.lock().get(uid).cloned());
        match failing {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteCalendar for MemoryCalendar {
    async fn ensure_calendar(&self, spec: &CalendarSpec) -> CalSyncResult<String> {
        let mut calendars = self.calendars.lock();
        let wanted = spec.summary.trim().to_lowercase();
        if let Some((id, _)) = calendars
            .iter()
            .find(|(_, s)| s.summary.trim().to_lowercase() == wanted)
        {
            return Ok(id.clone());
        }

        let id = format!("cal-{}", calendars.len() + 1);
        calendars.push((id.clone(), spec.clone()));
        Ok(id)
    }

    async fn list_events(&self, calendar_id: &str, query: &EventQuery) -> CalSyncResult<Vec<Event>> {
        self.calls.list.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.list_failures.lock().pop_front() {
            return Err(err.into());
        }

        let events = self.events(calendar_id);
        Ok(match query {
            EventQuery::Uid(uid) => events
                .into_iter()
                .filter(|e| e.uid.as_deref() == Some(uid.as_str()))
                .collect(),
            EventQuery::Window(window) => events
                .into_iter()
                .filter(|e| window.contains(e.start.to_utc()))
                .collect(),
        })
    }

    async fn create_event(&self, calendar_id: &str, event: &Event) -> CalSyncResult<Event> {
        self.calls.create.fetch_add(1, Ordering::SeqCst);
        self.check_write(event)?;
        Ok(self.insert(calendar_id, event.clone()))
    }

    async fn update_event(
        &self,
        calendar_id: &str,
        event_id: &str,
        event: &Event,
    ) -> CalSyncResult<Event> {
        self.calls.update.fetch_add(1, Ordering::SeqCst);
        self.check_write(event)?;

        let mut events = self.events.lock();
        let slot = events
            .iter_mut()
            .find(|(cal, e)| cal == calendar_id && e.id.as_deref() == Some(event_id))
            .ok_or_else(|| RemoteError::new(404, format!("No event {}", event_id)))?;

        let mut updated = event.clone();
        updated.id = Some(event_id.to_string());
        slot.1 = updated.clone();
        Ok(updated)
    }
}

/// A clock moved by hand.
#[derive(Debug, Default)]
pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn new(now: i64) -> Self {
        ManualClock(AtomicI64::new(now))
    }

    pub fn set(&self, now: i64) {
        self.0.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.0.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}
