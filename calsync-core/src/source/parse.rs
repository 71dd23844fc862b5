//! ICS export parsing using the icalendar crate's parser.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use icalendar::parser::{Component, read_calendar, unfold};
use icalendar::{CalendarDateTime, DatePerhapsTime};
use tracing::warn;

use crate::error::{CalSyncError, CalSyncResult};
use crate::event::{Event, EventStatus, EventTime, Transparency};

/// Parse every VEVENT of an export into canonical events.
///
/// Events without a UID are kept (with `uid: None`) so the sync run can count
/// them as errors instead of dropping them silently. VEVENTs without a usable
/// DTSTART are skipped with a warning.
pub fn parse_export(content: &str) -> CalSyncResult<Vec<Event>> {
    let unfolded = unfold(content);
    let calendar = read_calendar(&unfolded)
        .map_err(|e| CalSyncError::Source(format!("Invalid ICS export: {}", e)))?;

    let events = calendar
        .components
        .iter()
        .filter(|c| c.name == "VEVENT")
        .filter_map(|vevent| {
            let event = parse_vevent(vevent);
            if event.is_none() {
                let uid = vevent.find_prop("UID").map(|p| p.val.to_string());
                warn!(uid = ?uid, "Skipping VEVENT without a usable DTSTART");
            }
            event
        })
        .collect();

    Ok(events)
}

fn parse_vevent(vevent: &Component) -> Option<Event> {
    let uid = vevent
        .find_prop("UID")
        .map(|p| p.val.to_string())
        .filter(|uid| !uid.trim().is_empty());

    let raw_summary = vevent
        .find_prop("SUMMARY")
        .map(|p| collapse_whitespace(p.val.as_ref()))
        .unwrap_or_default();
    let summary = if raw_summary.is_empty() {
        "Untitled".to_string()
    } else {
        raw_summary.clone()
    };

    let start = to_event_time(DatePerhapsTime::try_from(vevent.find_prop("DTSTART")?).ok()?);
    let end = vevent
        .find_prop("DTEND")
        .and_then(|p| DatePerhapsTime::try_from(p).ok())
        .map(to_event_time)
        .unwrap_or_else(|| start.clone());

    let description = vevent
        .find_prop("DESCRIPTION")
        .map(|p| p.val.to_string())
        .filter(|d| !d.is_empty());
    let location = vevent
        .find_prop("LOCATION")
        .map(|p| collapse_whitespace(p.val.as_ref()))
        .filter(|l| !l.is_empty());

    let status = vevent
        .find_prop("STATUS")
        .map(|p| match p.val.as_ref().to_ascii_uppercase().as_str() {
            "CANCELLED" => EventStatus::Cancelled,
            _ => EventStatus::Confirmed,
        })
        .unwrap_or_default();

    let transparency = vevent
        .find_prop("TRANSP")
        .map(|p| {
            if p.val.as_ref().eq_ignore_ascii_case("TRANSPARENT") {
                Transparency::Transparent
            } else {
                Transparency::Opaque
            }
        })
        .unwrap_or_default();

    Some(Event {
        id: None,
        uid,
        summary,
        description,
        location,
        start,
        end,
        status,
        transparency,
        raw_marker: Some(raw_summary).filter(|s| !s.is_empty()),
    })
}

/// Convert icalendar's DatePerhapsTime to an all-day date or a UTC instant.
fn to_event_time(dpt: DatePerhapsTime) -> EventTime {
    match dpt {
        DatePerhapsTime::Date(d) => EventTime::Date(d),
        DatePerhapsTime::DateTime(cal_dt) => EventTime::DateTime(match cal_dt {
            CalendarDateTime::Utc(dt) => dt,
            // Floating times have no zone; UTC is the only stable reading.
            CalendarDateTime::Floating(naive) => naive.and_utc(),
            CalendarDateTime::WithTimezone { date_time, tzid } => zoned_to_utc(date_time, &tzid),
        }),
    }
}

fn zoned_to_utc(naive: NaiveDateTime, tzid: &str) -> DateTime<Utc> {
    match tzid.parse::<Tz>() {
        Ok(tz) => tz
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| naive.and_utc()),
        Err(_) => {
            warn!(tzid, "Unknown TZID, reading time as UTC");
            naive.and_utc()
        }
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const EXPORT: &str = "BEGIN:VCALENDAR\r
VERSION:2.0\r
PRODID:-//Schedule export//SV\r
BEGIN:VEVENT\r
UID:BokningsId_20250901_000000123\r
DTSTART:20250903T080000Z\r
DTEND:20250903T100000Z\r
SUMMARY:Program: TGIAR25h Kurs.grp: DA336A   Moment: Lecture\r
LOCATION:NI:A0418   NI:B0308\r
DESCRIPTION:\r
END:VEVENT\r
BEGIN:VEVENT\r
UID:BokningsId_20250901_000000124\r
DTSTART;TZID=Europe/Stockholm:20250904T100000\r
DTEND;TZID=Europe/Stockholm:20250904T120000\r
SUMMARY:Seminar\r
STATUS:CANCELLED\r
TRANSP:TRANSPARENT\r
END:VEVENT\r
BEGIN:VEVENT\r
UID:holiday-1\r
DTSTART;VALUE=DATE:20250905\r
SUMMARY:Holiday\r
END:VEVENT\r
BEGIN:VEVENT\r
DTSTART:20250906T080000Z\r
DTEND:20250906T090000Z\r
SUMMARY:No uid here\r
END:VEVENT\r
END:VCALENDAR\r
";

    #[test]
    fn test_parses_timed_event() {
        let events = parse_export(EXPORT).unwrap();
        assert_eq!(events.len(), 4);

        let lecture = &events[0];
        assert_eq!(lecture.uid.as_deref(), Some("BokningsId_20250901_000000123"));
        assert_eq!(lecture.summary, "Program: TGIAR25h Kurs.grp: DA336A Moment: Lecture");
        assert_eq!(lecture.raw_marker.as_deref(), Some(lecture.summary.as_str()));
        assert_eq!(lecture.location.as_deref(), Some("NI:A0418 NI:B0308"));
        assert_eq!(lecture.description, None);
        assert_eq!(
            lecture.start,
            EventTime::DateTime(Utc.with_ymd_and_hms(2025, 9, 3, 8, 0, 0).unwrap())
        );
        assert_eq!(lecture.status, EventStatus::Confirmed);
        assert_eq!(lecture.transparency, Transparency::Opaque);
    }

    #[test]
    fn test_zoned_times_convert_to_utc() {
        let events = parse_export(EXPORT).unwrap();
        let seminar = &events[1];

        // Stockholm is UTC+2 in September.
        assert_eq!(
            seminar.start,
            EventTime::DateTime(Utc.with_ymd_and_hms(2025, 9, 4, 8, 0, 0).unwrap())
        );
        assert_eq!(seminar.status, EventStatus::Cancelled);
        assert_eq!(seminar.transparency, Transparency::Transparent);
    }

    #[test]
    fn test_all_day_without_end_uses_start() {
        let events = parse_export(EXPORT).unwrap();
        let holiday = &events[2];
        let day = EventTime::Date(NaiveDate::from_ymd_opt(2025, 9, 5).unwrap());
        assert_eq!(holiday.start, day);
        assert_eq!(holiday.end, day);
    }

    #[test]
    fn test_missing_uid_is_kept_for_error_accounting() {
        let events = parse_export(EXPORT).unwrap();
        assert_eq!(events[3].uid, None);
    }
}
