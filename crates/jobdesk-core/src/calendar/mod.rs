//! One-way projection of job schedules onto an external calendar.
//!
//! [`CalendarService`] is the seam to the calendar provider;
//! [`reconcile::Reconciler`] converges a job's events through it.

pub mod google;
mod model;
pub mod reconcile;


use async_trait::async_trait;

use crate::error::CalendarError;

pub use google::GoogleCalendar;
pub use model::{
    all_day_span, resolve_time_zone, timed_span, CalendarEvent, EventDraft, EventQuery, EventTime,
    Unit, JOB_ID_PROPERTY, SHIFT_ID_PROPERTY, UNIT_PROPERTY,
};
pub use reconcile::{FailedDeletion, ReconcileOptions, ReconcileReport, Reconciler};

#[async_trait]
pub trait CalendarService: Send + Sync {
    /// Every event matching `query`, across all result pages.
    async fn list(&self, query: &EventQuery) -> Result<Vec<CalendarEvent>, CalendarError>;

    async fn insert(&self, draft: &EventDraft) -> Result<CalendarEvent, CalendarError>;

    /// Overwrite the fields carried by `draft` on an existing event.
    async fn patch(&self, event_id: &str, draft: &EventDraft)
        -> Result<CalendarEvent, CalendarError>;

    /// Remove an event. An event that is already gone counts as removed.
    async fn delete(&self, event_id: &str) -> Result<(), CalendarError>;
}
