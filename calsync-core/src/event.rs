//! Provider-neutral event types.
//!
//! Source events (parsed from an ICS export) and remote events (returned by the
//! calendar store) share this representation. Reconciliation never compares
//! whole events: it compares their [`CanonicalEvent`] projection, which ignores
//! storage metadata such as the remote-assigned id.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A calendar event (provider-neutral)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Identity assigned by the remote store. `None` for source events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Stable identifier shared by a source event and its remote copy.
    pub uid: Option<String>,
    pub summary: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: EventTime,
    pub end: EventTime,
    pub status: EventStatus,
    /// Whether event blocks time (OPAQUE) or is free (TRANSPARENT)
    pub transparency: Transparency,
    /// Unprocessed SUMMARY line from the export, kept so a change in the raw
    /// text is detected even when the derived title is unchanged.
    pub raw_marker: Option<String>,
}

/// Event transparency (busy/free status)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transparency {
    /// Event blocks time on calendar (default)
    #[default]
    Opaque,
    /// Event does not block time (shows as free)
    Transparent,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventTime {
    /// An absolute instant.
    DateTime(DateTime<Utc>),
    /// An all-day calendar date.
    Date(NaiveDate),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    #[default]
    Confirmed,
    Tentative,
    Cancelled,
}

impl EventTime {
    /// The instant this time refers to; all-day dates map to midnight UTC.
    pub fn to_utc(&self) -> DateTime<Utc> {
        match self {
            EventTime::DateTime(dt) => *dt,
            EventTime::Date(d) => d.and_time(chrono::NaiveTime::MIN).and_utc(),
        }
    }

    /// Normalized string form used as part of the reconciliation key.
    ///
    /// Timed events compare by millisecond timestamp, all-day events by date,
    /// so `2025-03-20T10:00:00+01:00` and `2025-03-20T09:00:00Z` share a key.
    pub fn key(&self) -> String {
        match self {
            EventTime::DateTime(dt) => format!("t:{}", dt.timestamp_millis()),
            EventTime::Date(d) => format!("d:{}", d.format("%Y-%m-%d")),
        }
    }
}

/// The fields of an event that participate in equality checks.
///
/// Absent optional text is treated the same as empty text, so a store that
/// drops empty descriptions does not trigger endless updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalEvent {
    pub summary: String,
    pub description: String,
    pub location: String,
    pub start: EventTime,
    pub end: EventTime,
    pub status: EventStatus,
    pub transparency: Transparency,
    pub raw_marker: String,
}

impl Event {
    pub fn canonical(&self) -> CanonicalEvent {
        CanonicalEvent {
            summary: self.summary.clone(),
            description: self.description.clone().unwrap_or_default(),
            location: self.location.clone().unwrap_or_default(),
            start: self.start.clone(),
            end: self.end.clone(),
            status: self.status,
            transparency: self.transparency,
            raw_marker: self.raw_marker.clone().unwrap_or_default(),
        }
    }

    /// Whether two events are equal for reconciliation purposes.
    pub fn same_content(&self, other: &Event) -> bool {
        self.canonical() == other.canonical()
    }

    /// Reconciliation key: `(uid, normalized start)`.
    pub fn key(&self) -> Option<(String, String)> {
        self.uid.as_ref().map(|uid| (uid.clone(), self.start.key()))
    }

    /// Short human-readable label for log lines.
    pub fn label(&self) -> String {
        format!(
            "{} {}",
            self.uid.as_deref().unwrap_or("(no uid)"),
            self.summary
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};

    fn event() -> Event {
        Event {
            id: Some("remote-1".into()),
            uid: Some("uid-1".into()),
            summary: "Lecture".into(),
            description: None,
            location: Some("NI:A0418".into()),
            start: EventTime::DateTime(Utc.with_ymd_and_hms(2025, 3, 20, 9, 0, 0).unwrap()),
            end: EventTime::DateTime(Utc.with_ymd_and_hms(2025, 3, 20, 11, 0, 0).unwrap()),
            status: EventStatus::Confirmed,
            transparency: Transparency::Opaque,
            raw_marker: Some("Kurs.grp: X Moment: Lecture".into()),
        }
    }

    #[test]
    fn test_canonical_ignores_remote_id() {
        let a = event();
        let mut b = event();
        b.id = None;
        assert!(a.same_content(&b));
    }

    #[test]
    fn test_canonical_treats_missing_text_as_empty() {
        let a = event();
        let mut b = event();
        b.description = Some(String::new());
        assert!(a.same_content(&b));

        b.description = Some("changed".into());
        assert!(!a.same_content(&b));
    }

    #[test]
    fn test_raw_marker_participates_in_equality() {
        let a = event();
        let mut b = event();
        b.raw_marker = Some("Kurs.grp: Y Moment: Lecture".into());
        assert!(!a.same_content(&b));
    }

    #[test]
    fn test_time_key_is_instant_based() {
        let offset = FixedOffset::east_opt(3600).unwrap();
        let local = offset.with_ymd_and_hms(2025, 3, 20, 10, 0, 0).unwrap();
        let a = EventTime::DateTime(local.with_timezone(&Utc));
        let b = EventTime::DateTime(Utc.with_ymd_and_hms(2025, 3, 20, 9, 0, 0).unwrap());
        assert_eq!(a.key(), b.key());

        let day = EventTime::Date(NaiveDate::from_ymd_opt(2025, 3, 20).unwrap());
        assert_eq!(day.key(), "d:2025-03-20");
        assert_ne!(day.key(), b.key());
    }
}
