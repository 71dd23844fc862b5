//! Create/update/skip decisions for source events against a remote calendar.
//!
//! One bulk read over the source batch's time window builds a
//! [`PrefetchIndex`] keyed by `(uid, normalized start)`. Events that miss the
//! index (typically because their start moved) fall back to a direct lookup
//! by UID. Among several remote events sharing a UID, the one starting at the
//! same time wins; otherwise the first one returned is used.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{CalSyncError, CalSyncResult};
use crate::event::Event;
use crate::remote::{EventQuery, RemoteCalendar, TimeWindow};
use crate::retry::RetryPolicy;

/// Padding applied on both sides of the source batch's start range.
pub const PREFETCH_PAD_HOURS: i64 = 24;

type EventKey = (String, String);

/// What to do with one source event.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// No remote counterpart exists.
    Create,
    /// The remote counterpart differs; overwrite it.
    Update { existing: Event },
    /// The remote counterpart already matches.
    Skip { existing: Event },
}

/// Remote events indexed by `(uid, normalized start)`.
#[derive(Debug, Default)]
pub struct PrefetchIndex {
    by_key: HashMap<EventKey, Event>,
}

impl PrefetchIndex {
    /// Build an index from remote events. Events without a UID cannot be
    /// matched and are left out; the first event per key wins.
    pub fn build(events: impl IntoIterator<Item = Event>) -> Self {
        let mut by_key = HashMap::new();
        for event in events {
            if let Some(key) = event.key() {
                by_key.entry(key).or_insert(event);
            }
        }
        PrefetchIndex { by_key }
    }

    pub fn get(&self, incoming: &Event) -> Option<&Event> {
        incoming.key().and_then(|key| self.by_key.get(&key))
    }

    /// Record the outcome of a write. `replaced` is the remote event the
    /// write overwrote, whose old key is dropped if the start moved.
    pub fn record(&mut self, written: Event, replaced: Option<&Event>) {
        if let Some(old_key) = replaced.and_then(Event::key) {
            self.by_key.remove(&old_key);
        }
        if let Some(key) = written.key() {
            self.by_key.insert(key, written);
        }
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

/// Pick the remote event an incoming event should be reconciled against.
pub fn choose_candidate<'a>(candidates: &'a [Event], incoming: &Event) -> Option<&'a Event> {
    let wanted = incoming.start.key();
    candidates
        .iter()
        .find(|c| c.start.key() == wanted)
        .or_else(|| candidates.first())
}

/// Decide against an already chosen remote counterpart.
pub fn decide(existing: Option<&Event>, incoming: &Event) -> Decision {
    match existing {
        None => Decision::Create,
        Some(existing) if existing.same_content(incoming) => Decision::Skip {
            existing: existing.clone(),
        },
        Some(existing) => Decision::Update {
            existing: existing.clone(),
        },
    }
}

/// Reconciles source events against one remote calendar.
///
/// Shared by all workers of a sync run; the index is behind a mutex so
/// writes by one worker are visible to the others.
pub struct EventReconciler {
    remote: Arc<dyn RemoteCalendar>,
    calendar_id: String,
    index: Mutex<PrefetchIndex>,
    lookups: RetryPolicy,
}

impl EventReconciler {
    /// Build the prefetch index with one windowed read covering `events`.
    pub async fn prefetch(
        remote: Arc<dyn RemoteCalendar>,
        calendar_id: &str,
        events: &[Event],
        lookups: RetryPolicy,
    ) -> CalSyncResult<Self> {
        let index = match TimeWindow::covering(events, Duration::hours(PREFETCH_PAD_HOURS)) {
            Some(window) => {
                let query = EventQuery::Window(window);
                let existing = lookups
                    .run("prefetch", || remote.list_events(calendar_id, &query))
                    .await?;
                PrefetchIndex::build(existing)
            }
            None => PrefetchIndex::default(),
        };

        debug!(calendar_id, indexed = index.len(), "Prefetched remote events");

        Ok(EventReconciler {
            remote,
            calendar_id: calendar_id.to_string(),
            index: Mutex::new(index),
            lookups,
        })
    }

    pub fn calendar_id(&self) -> &str {
        &self.calendar_id
    }

    /// Decide what to do with `incoming`.
    pub async fn resolve(&self, incoming: &Event) -> CalSyncResult<Decision> {
        let Some(uid) = incoming.uid.as_deref() else {
            return Err(CalSyncError::Validation(format!(
                "Event '{}' has no UID",
                incoming.summary
            )));
        };

        let indexed = self.index.lock().get(incoming).cloned();
        if let Some(existing) = indexed {
            return Ok(decide(Some(&existing), incoming));
        }

        let query = EventQuery::Uid(uid.to_string());
        let candidates = self
            .lookups
            .run("lookup", || self.remote.list_events(&self.calendar_id, &query))
            .await?;

        Ok(decide(choose_candidate(&candidates, incoming), incoming))
    }

    /// Make a completed write visible to later decisions in this run.
    pub fn record(&self, written: Event, replaced: Option<&Event>) {
        self.index.lock().record(written, replaced);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventStatus, EventTime, Transparency};
    use crate::testing::{MemoryCalendar, event_at};
    use chrono::{NaiveDate, TimeZone, Utc};

    #[test]
    fn test_choose_prefers_exact_start_match() {
        let incoming = event_at("uid-1", 2025, 9, 3, 10);
        let mut other = event_at("uid-1", 2025, 9, 1, 8);
        other.id = Some("r-other".into());
        let mut exact = event_at("uid-1", 2025, 9, 3, 10);
        exact.id = Some("r-exact".into());
        exact.summary = "Old title".into();

        let candidates = vec![other, exact];
        let chosen = choose_candidate(&candidates, &incoming).unwrap();
        assert_eq!(chosen.id.as_deref(), Some("r-exact"));
    }

    #[test]
    fn test_choose_falls_back_to_first_candidate() {
        let incoming = event_at("uid-1", 2025, 9, 3, 10);
        let mut first = event_at("uid-1", 2025, 9, 1, 8);
        first.id = Some("r-first".into());
        let mut second = event_at("uid-1", 2025, 9, 2, 8);
        second.id = Some("r-second".into());

        let candidates = vec![first, second];
        let chosen = choose_candidate(&candidates, &incoming).unwrap();
        assert_eq!(chosen.id.as_deref(), Some("r-first"));
        assert!(choose_candidate(&[], &incoming).is_none());
    }

    #[test]
    fn test_choose_matches_all_day_by_date() {
        let day = |d| EventTime::Date(NaiveDate::from_ymd_opt(2025, 9, d).unwrap());
        let mut incoming = event_at("uid-1", 2025, 9, 5, 0);
        incoming.start = day(5);

        let mut wrong = incoming.clone();
        wrong.start = day(4);
        wrong.id = Some("r-4".into());
        let mut right = incoming.clone();
        right.id = Some("r-5".into());

        let candidates = vec![wrong, right];
        assert_eq!(
            choose_candidate(&candidates, &incoming).unwrap().id.as_deref(),
            Some("r-5")
        );
    }

    #[test]
    fn test_decide() {
        let incoming = event_at("uid-1", 2025, 9, 3, 10);
        assert_eq!(decide(None, &incoming), Decision::Create);

        let mut same = incoming.clone();
        same.id = Some("r1".into());
        assert!(matches!(decide(Some(&same), &incoming), Decision::Skip { .. }));

        let mut changed = same.clone();
        changed.location = Some("Room 2".into());
        match decide(Some(&changed), &incoming) {
            Decision::Update { existing } => assert_eq!(existing.id.as_deref(), Some("r1")),
            other => panic!("expected update, got {:?}", other),
        }
    }

    #[test]
    fn test_index_record_drops_moved_key() {
        let mut old = event_at("uid-1", 2025, 9, 3, 10);
        old.id = Some("r1".into());
        let mut index = PrefetchIndex::build(vec![old.clone()]);

        let mut moved = event_at("uid-1", 2025, 9, 3, 12);
        moved.id = Some("r1".into());
        index.record(moved.clone(), Some(&old));

        assert!(index.get(&event_at("uid-1", 2025, 9, 3, 10)).is_none());
        assert_eq!(index.get(&moved).and_then(|e| e.id.clone()).as_deref(), Some("r1"));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_index_skips_remote_events_without_uid() {
        let mut orphan = event_at("x", 2025, 9, 3, 10);
        orphan.uid = None;
        assert!(PrefetchIndex::build(vec![orphan]).is_empty());
    }

    #[tokio::test]
    async fn test_resolve_uses_index_then_falls_back_to_uid_lookup() {
        let remote = Arc::new(MemoryCalendar::new());
        let stored = remote.insert("cal", event_at("uid-1", 2025, 9, 3, 10));
        // Same UID, but the source moved the start by two hours.
        let moved = event_at("uid-1", 2025, 9, 3, 12);
        let unchanged = event_at("uid-1", 2025, 9, 3, 10);

        let reconciler = EventReconciler::prefetch(
            remote.clone(),
            "cal",
            &[unchanged.clone()],
            RetryPolicy::reads(),
        )
        .await
        .unwrap();
        assert_eq!(remote.list_calls(), 1);

        assert!(matches!(
            reconciler.resolve(&unchanged).await.unwrap(),
            Decision::Skip { .. }
        ));
        assert_eq!(remote.list_calls(), 1);

        match reconciler.resolve(&moved).await.unwrap() {
            Decision::Update { existing } => assert_eq!(existing.id, stored.id),
            other => panic!("expected update, got {:?}", other),
        }
        assert_eq!(remote.list_calls(), 2);
    }

    #[tokio::test]
    async fn test_resolve_rejects_missing_uid() {
        let remote = Arc::new(MemoryCalendar::new());
        let reconciler =
            EventReconciler::prefetch(remote.clone(), "cal", &[], RetryPolicy::reads())
                .await
                .unwrap();
        assert_eq!(remote.list_calls(), 0);

        let mut incoming = event_at("x", 2025, 9, 3, 10);
        incoming.uid = None;
        assert!(matches!(
            reconciler.resolve(&incoming).await,
            Err(CalSyncError::Validation(_))
        ));
    }

    #[test]
    fn test_event_fixture_is_timed() {
        let e = event_at("uid-1", 2025, 9, 3, 10);
        assert_eq!(
            e.start,
            EventTime::DateTime(Utc.with_ymd_and_hms(2025, 9, 3, 10, 0, 0).unwrap())
        );
        assert_eq!(e.status, EventStatus::Confirmed);
        assert_eq!(e.transparency, Transparency::Opaque);
    }
}
