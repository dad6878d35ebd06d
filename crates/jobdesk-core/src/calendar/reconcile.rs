//! Calendar reconciliation.
//!
//! Converges the calendar's events for one job to the job's desired set:
//! one event for a continuous job, one per shift for a shift-based job,
//! none when the job is cancelled or not published. Existing events are
//! found by their private `jobdeskJobId` tag, plus a text search within a
//! padded window around the job's dates that adopts untagged legacy events
//! carrying a `Job ID: <id>` description line.
//!
//! Matching events are patched in place only when their content drifted,
//! so an unchanged job reconciles with zero calendar writes. Surplus events
//! (duplicates, shifts that no longer exist, the job event after a switch
//! to shifts) are deleted; a failed delete is reported, not raised.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{Days, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use super::model::{
    all_day_span, legacy_marker, resolve_time_zone, timed_span, CalendarEvent, EventDraft,
    EventQuery, EventTime, Unit, JOB_ID_PROPERTY, SHIFT_ID_PROPERTY, UNIT_PROPERTY,
};
use super::CalendarService;
use crate::error::{CalendarError, ReconcileError};
use crate::models::{Job, ScheduleMode, Shift};
use crate::storage::CalendarConfig;

/// Engine settings resolved from [`CalendarConfig`].
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Global publish switch.
    pub enabled: bool,
    pub lookup_padding_days: u32,
    pub time_zone: Tz,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            lookup_padding_days: 31,
            time_zone: Tz::UTC,
        }
    }
}

impl ReconcileOptions {
    pub fn from_config(config: &CalendarConfig) -> Result<Self, CalendarError> {
        Ok(Self {
            enabled: config.enabled,
            lookup_padding_days: config.lookup_padding_days,
            time_zone: resolve_time_zone(&config.time_zone)?,
        })
    }
}

/// A delete that failed during cleanup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedDeletion {
    pub event_id: String,
    pub error: String,
}

/// What one reconciliation pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
    pub failed_deletions: Vec<FailedDeletion>,
}

impl ReconcileReport {
    /// Calendar writes issued, including failed deletes.
    pub fn writes(&self) -> usize {
        self.created + self.updated + self.deleted + self.failed_deletions.len()
    }
}

/// An existing event considered for a job.
#[derive(Debug, Clone)]
struct Candidate {
    event: CalendarEvent,
    unit: Unit,
    legacy: bool,
}

pub struct Reconciler {
    calendar: Arc<dyn CalendarService>,
    options: ReconcileOptions,
}

impl Reconciler {
    pub fn new(calendar: Arc<dyn CalendarService>, options: ReconcileOptions) -> Self {
        Self { calendar, options }
    }

    pub fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    /// Converge the calendar to `job`'s schedule.
    pub async fn reconcile(
        &self,
        job: &Job,
        client_label: &str,
    ) -> Result<ReconcileReport, ReconcileError> {
        let desired = self.desired(job, client_label)?;
        self.converge(job, desired).await
    }

    /// Remove every event belonging to `job` (used after the job is deleted).
    pub async fn remove(&self, job: &Job) -> Result<ReconcileReport, ReconcileError> {
        self.converge(job, Vec::new()).await
    }

    /// Desired events for `job`, in schedule order.
    pub fn desired(
        &self,
        job: &Job,
        client_label: &str,
    ) -> Result<Vec<(Unit, EventDraft)>, ReconcileError> {
        if !self.options.enabled || !job.publish_to_calendar || job.is_cancelled() {
            return Ok(Vec::new());
        }

        match job.schedule_mode {
            ScheduleMode::Continuous => {
                let Some(first) = job.start_date else {
                    return Ok(Vec::new());
                };
                let last = job.last_date().unwrap_or(first);
                let (start, end) = match (job.start_time, job.end_time) {
                    (Some(start_time), Some(end_time)) => self.timed(
                        job,
                        first.and_time(start_time),
                        last.and_time(end_time),
                    )?,
                    _ => all_day_span(first, last),
                };
                Ok(vec![(
                    Unit::Job,
                    draft(job, client_label, None, start, end),
                )])
            }
            ScheduleMode::Shifts => {
                let mut seen = HashSet::new();
                let mut drafts = Vec::with_capacity(job.shifts.len());
                for shift in &job.shifts {
                    if !seen.insert(shift.id.as_str()) {
                        tracing::warn!(job_id = %job.id, shift_id = %shift.id, "duplicate shift id ignored");
                        continue;
                    }
                    let (start, end) = match (shift.start_time, shift.end_time) {
                        (Some(start_time), Some(end_time)) => self.timed(
                            job,
                            shift.date.and_time(start_time),
                            shift.date.and_time(end_time),
                        )?,
                        _ => all_day_span(shift.date, shift.date),
                    };
                    drafts.push((
                        Unit::Shift(shift.id.clone()),
                        draft(job, client_label, Some(shift), start, end),
                    ));
                }
                Ok(drafts)
            }
        }
    }

    fn timed(
        &self,
        job: &Job,
        start: chrono::NaiveDateTime,
        end: chrono::NaiveDateTime,
    ) -> Result<(EventTime, EventTime), ReconcileError> {
        timed_span(start, end, self.options.time_zone).ok_or_else(|| {
            ReconcileError::InvalidSchedule {
                job_id: job.id.clone(),
                message: format!("{start} cannot be placed in {}", self.options.time_zone),
            }
        })
    }

    async fn converge(
        &self,
        job: &Job,
        desired: Vec<(Unit, EventDraft)>,
    ) -> Result<ReconcileReport, ReconcileError> {
        let mut candidates = self.lookup(job).await?;
        candidates.sort_by(|a, b| {
            a.legacy
                .cmp(&b.legacy)
                .then_with(|| a.event.start.sort_key().cmp(&b.event.start.sort_key()))
                .then_with(|| a.event.id.cmp(&b.event.id))
        });

        // First candidate per desired unit is current; everything else goes.
        let mut current: BTreeMap<Unit, CalendarEvent> = BTreeMap::new();
        let mut surplus = Vec::new();
        let wanted: HashSet<&Unit> = desired.iter().map(|(unit, _)| unit).collect();
        for candidate in candidates {
            if wanted.contains(&candidate.unit) && !current.contains_key(&candidate.unit) {
                current.insert(candidate.unit, candidate.event);
            } else {
                surplus.push(candidate.event);
            }
        }

        let mut report = ReconcileReport::default();

        for (unit, draft) in &desired {
            match current.get(unit) {
                Some(event) if draft.differs_from(event) => {
                    self.calendar.patch(&event.id, draft).await.map_err(|source| {
                        ReconcileError::Update {
                            unit: unit.to_string(),
                            event_id: event.id.clone(),
                            source,
                        }
                    })?;
                    report.updated += 1;
                }
                Some(_) => report.unchanged += 1,
                None => {
                    self.calendar
                        .insert(draft)
                        .await
                        .map_err(|source| ReconcileError::Create {
                            unit: unit.to_string(),
                            source,
                        })?;
                    report.created += 1;
                }
            }
        }

        for event in surplus {
            match self.calendar.delete(&event.id).await {
                Ok(()) => report.deleted += 1,
                Err(e) => {
                    tracing::warn!(job_id = %job.id, event_id = %event.id, error = %e, "failed to delete calendar event");
                    report.failed_deletions.push(FailedDeletion {
                        event_id: event.id,
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            job_id = %job.id,
            created = report.created,
            updated = report.updated,
            unchanged = report.unchanged,
            deleted = report.deleted,
            failed = report.failed_deletions.len(),
            "calendar reconciled"
        );
        Ok(report)
    }

    /// Tagged events for the job, then untagged legacy events it owns.
    async fn lookup(&self, job: &Job) -> Result<Vec<Candidate>, ReconcileError> {
        let lookup_failed = |source: CalendarError| ReconcileError::Lookup {
            job_id: job.id.clone(),
            source,
        };
        // The tag is an exact match, so the tagged query is unbounded and
        // still finds events left on dates the job has moved away from.
        let tagged_query = EventQuery {
            time_min: None,
            time_max: None,
            private_property: Some((JOB_ID_PROPERTY.to_string(), job.id.clone())),
            text: None,
        };
        let tagged = self.calendar.list(&tagged_query).await.map_err(lookup_failed)?;

        let mut seen: HashSet<String> = HashSet::new();
        let mut candidates: Vec<Candidate> = tagged
            .into_iter()
            .filter(|event| event.job_id() == Some(job.id.as_str()))
            .filter(|event| seen.insert(event.id.clone()))
            .map(|event| Candidate {
                unit: Unit::of(&event),
                event,
                legacy: false,
            })
            .collect();

        // Text search needs a bounded window.
        if let Some((min, max)) = self.window(job) {
            let legacy_query = EventQuery {
                time_min: Some(min),
                time_max: Some(max),
                private_property: None,
                text: Some(job.id.clone()),
            };
            let found = self.calendar.list(&legacy_query).await.map_err(lookup_failed)?;
            candidates.extend(
                found
                    .into_iter()
                    .filter(|event| !event.is_tagged() && event.has_legacy_marker(&job.id))
                    .filter(|event| seen.insert(event.id.clone()))
                    .map(|event| Candidate {
                        event,
                        unit: Unit::Job,
                        legacy: true,
                    }),
            );
        }

        tracing::debug!(job_id = %job.id, candidates = candidates.len(), "calendar lookup");
        Ok(candidates)
    }

    /// Padded UTC window over every job and shift date; `None` without dates.
    fn window(&self, job: &Job) -> Option<(chrono::DateTime<Utc>, chrono::DateTime<Utc>)> {
        let dates: Vec<NaiveDate> = job
            .start_date
            .into_iter()
            .chain(job.end_date)
            .chain(job.shifts.iter().map(|shift| shift.date))
            .collect();
        let first = *dates.iter().min()?;
        let last = *dates.iter().max()?;

        let padding = Days::new(u64::from(self.options.lookup_padding_days));
        let min = first.checked_sub_days(padding).unwrap_or(first);
        // Exclusive upper bound, so max is always after min.
        let max = last
            .checked_add_days(padding)
            .and_then(|d| d.checked_add_days(Days::new(1)))
            .unwrap_or(last);

        let midnight = |date: NaiveDate| Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN));
        Some((midnight(min), midnight(max)))
    }
}

fn draft(
    job: &Job,
    client_label: &str,
    shift: Option<&Shift>,
    start: EventTime,
    end: EventTime,
) -> EventDraft {
    let title = if job.title.trim().is_empty() {
        "Job"
    } else {
        job.title.trim()
    };
    let summary = match shift.and_then(|s| s.label.as_deref()).filter(|l| !l.trim().is_empty()) {
        Some(label) => format!("{client_label}: {title} ({})", label.trim()),
        None => format!("{client_label}: {title}"),
    };

    let mut lines = Vec::new();
    if let Some(notes) = job.notes.as_deref().filter(|n| !n.trim().is_empty()) {
        lines.push(notes.trim().to_string());
    }
    lines.push(legacy_marker(&job.id));

    let mut private = BTreeMap::new();
    private.insert(JOB_ID_PROPERTY.to_string(), job.id.clone());
    let unit = match shift {
        Some(shift) => {
            private.insert(SHIFT_ID_PROPERTY.to_string(), shift.id.clone());
            Unit::Shift(shift.id.clone())
        }
        None => Unit::Job,
    };
    private.insert(UNIT_PROPERTY.to_string(), unit.tag().to_string());

    EventDraft {
        summary,
        description: lines.join("\n"),
        location: job.location.clone().filter(|l| !l.trim().is_empty()),
        start,
        end,
        private,
    }
}
