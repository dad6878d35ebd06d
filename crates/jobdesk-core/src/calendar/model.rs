//! Calendar event shapes shared by the service seam and the reconciler.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Days, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::CalendarError;

/// Private extended property holding the owning job id.
pub const JOB_ID_PROPERTY: &str = "jobdeskJobId";
/// Private extended property holding the shift id, for shift events.
pub const SHIFT_ID_PROPERTY: &str = "jobdeskShiftId";
/// Private extended property naming the unit kind (`job` or `shift`).
pub const UNIT_PROPERTY: &str = "jobdeskUnit";

/// Start or end of an event: an all-day date or a zoned instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTime", into = "RawTime")]
pub enum EventTime {
    Date(NaiveDate),
    DateTime {
        at: DateTime<FixedOffset>,
        time_zone: Option<String>,
    },
}

/// Wire form: exactly one of `date` / `dateTime` is set, the other is sent
/// as null so a patch can switch between all-day and timed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTime {
    #[serde(default)]
    date: Option<NaiveDate>,
    #[serde(default)]
    date_time: Option<DateTime<FixedOffset>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    time_zone: Option<String>,
}

impl TryFrom<RawTime> for EventTime {
    type Error = String;

    fn try_from(raw: RawTime) -> Result<Self, Self::Error> {
        match (raw.date, raw.date_time) {
            (_, Some(at)) => Ok(EventTime::DateTime {
                at,
                time_zone: raw.time_zone,
            }),
            (Some(date), None) => Ok(EventTime::Date(date)),
            (None, None) => Err("event time has neither date nor dateTime".into()),
        }
    }
}

impl From<EventTime> for RawTime {
    fn from(time: EventTime) -> Self {
        match time {
            EventTime::Date(date) => RawTime {
                date: Some(date),
                ..Default::default()
            },
            EventTime::DateTime { at, time_zone } => RawTime {
                date: None,
                date_time: Some(at),
                time_zone,
            },
        }
    }
}

impl EventTime {
    /// Same moment: equal dates, or equal instants regardless of offset.
    pub fn same_as(&self, other: &EventTime) -> bool {
        match (self, other) {
            (EventTime::Date(a), EventTime::Date(b)) => a == b,
            (EventTime::DateTime { at: a, .. }, EventTime::DateTime { at: b, .. }) => a == b,
            _ => false,
        }
    }

    /// UTC sort key; all-day dates sort at midnight UTC.
    pub fn sort_key(&self) -> NaiveDateTime {
        match self {
            EventTime::Date(date) => date.and_time(chrono::NaiveTime::MIN),
            EventTime::DateTime { at, .. } => at.naive_utc(),
        }
    }

    pub fn date(&self) -> NaiveDate {
        match self {
            EventTime::Date(date) => *date,
            EventTime::DateTime { at, .. } => at.date_naive(),
        }
    }
}

/// All-day span over `first..=last`, written with an exclusive end.
pub fn all_day_span(first: NaiveDate, last: NaiveDate) -> (EventTime, EventTime) {
    let last = last.max(first);
    let end = last.checked_add_days(Days::new(1)).unwrap_or(last);
    (EventTime::Date(first), EventTime::Date(end))
}

/// Timed span in `tz`. An end at or before the start rolls to the next day.
pub fn timed_span(
    start: NaiveDateTime,
    end: NaiveDateTime,
    tz: Tz,
) -> Option<(EventTime, EventTime)> {
    let end = if end <= start {
        end.checked_add_days(Days::new(1))?
    } else {
        end
    };
    let zoned = |naive: NaiveDateTime| -> Option<EventTime> {
        Some(EventTime::DateTime {
            at: localize(tz, naive)?,
            time_zone: Some(tz.name().to_string()),
        })
    };
    Some((zoned(start)?, zoned(end)?))
}

/// Resolve a wall-clock time in `tz`: the earlier reading when ambiguous,
/// one hour later when it falls into a gap.
fn localize(tz: Tz, naive: NaiveDateTime) -> Option<DateTime<FixedOffset>> {
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| {
            tz.from_local_datetime(&(naive + chrono::Duration::hours(1)))
                .earliest()
        })
        .map(|dt| dt.fixed_offset())
}

/// Zone for timed events: configured name, else `TZ`, else UTC.
pub fn resolve_time_zone(configured: &str) -> Result<Tz, CalendarError> {
    let configured = configured.trim();
    if !configured.is_empty() {
        return configured
            .parse::<Tz>()
            .map_err(|_| CalendarError::UnknownTimeZone(configured.to_string()));
    }
    match std::env::var("TZ") {
        Ok(name) if !name.trim().is_empty() => {
            let name = name.trim().trim_start_matches(':');
            name.parse::<Tz>().or_else(|_| {
                tracing::warn!(tz = name, "TZ is not a known zone, using UTC");
                Ok(Tz::UTC)
            })
        }
        _ => Ok(Tz::UTC),
    }
}

/// An event as the calendar service reports it.
#[derive(Debug, Clone, PartialEq)]
pub struct CalendarEvent {
    pub id: String,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: EventTime,
    pub end: EventTime,
    pub private: BTreeMap<String, String>,
}

impl CalendarEvent {
    /// Inclusive first and last day as a user would read them.
    pub fn display_span(&self) -> (NaiveDate, NaiveDate) {
        let start = self.start.date();
        let last = match &self.end {
            EventTime::Date(end) => end.pred_opt().unwrap_or(*end),
            EventTime::DateTime { at, .. } => at.date_naive(),
        };
        (start, last.max(start))
    }

    pub fn job_id(&self) -> Option<&str> {
        self.private
            .get(JOB_ID_PROPERTY)
            .map(String::as_str)
            .filter(|id| !id.is_empty())
    }

    pub fn shift_id(&self) -> Option<&str> {
        self.private
            .get(SHIFT_ID_PROPERTY)
            .map(String::as_str)
            .filter(|id| !id.is_empty())
    }

    /// Whether the event carries any jobdesk metadata.
    pub fn is_tagged(&self) -> bool {
        [JOB_ID_PROPERTY, SHIFT_ID_PROPERTY, UNIT_PROPERTY]
            .iter()
            .any(|key| self.private.contains_key(*key))
    }

    /// Legacy marker: a description line reading exactly `Job ID: <id>`.
    pub fn has_legacy_marker(&self, job_id: &str) -> bool {
        let marker = legacy_marker(job_id);
        self.description
            .as_deref()
            .is_some_and(|text| text.lines().any(|line| line.trim() == marker))
    }
}

pub(crate) fn legacy_marker(job_id: &str) -> String {
    format!("Job ID: {job_id}")
}

/// Desired event content.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    pub summary: String,
    pub description: String,
    pub location: Option<String>,
    pub start: EventTime,
    pub end: EventTime,
    pub private: BTreeMap<String, String>,
}

impl EventDraft {
    /// Whether patching `event` with this draft would change anything.
    pub fn differs_from(&self, event: &CalendarEvent) -> bool {
        let location = self.location.as_deref().filter(|s| !s.is_empty());
        let current_location = event.location.as_deref().filter(|s| !s.is_empty());

        event.summary.as_deref() != Some(self.summary.as_str())
            || event.description.as_deref().unwrap_or_default() != self.description
            || current_location != location
            || !self.start.same_as(&event.start)
            || !self.end.same_as(&event.end)
            || self
                .private
                .iter()
                .any(|(key, value)| event.private.get(key) != Some(value))
    }
}

/// Parameters of a `list` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventQuery {
    pub time_min: Option<DateTime<Utc>>,
    pub time_max: Option<DateTime<Utc>>,
    /// `(key, value)` private extended property that must match.
    pub private_property: Option<(String, String)>,
    /// Free-text search.
    pub text: Option<String>,
}

/// One desired event slot: the job itself or one of its shifts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Unit {
    Job,
    Shift(String),
}

impl Unit {
    /// Unit an existing event belongs to, judged by its metadata.
    pub fn of(event: &CalendarEvent) -> Unit {
        match event.shift_id() {
            Some(id) => Unit::Shift(id.to_string()),
            None => Unit::Job,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Unit::Job => "job",
            Unit::Shift(_) => "shift",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unit::Job => f.write_str("job event"),
            Unit::Shift(id) => write!(f, "shift {id}"),
        }
    }
}
