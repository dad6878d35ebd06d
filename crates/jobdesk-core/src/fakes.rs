//! In-memory stand-ins for the remote store and the calendar service.
//!
//! Both record every call so tests can assert on traffic, and both can be
//! told to fail specific operations.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::calendar::{CalendarEvent, CalendarService, EventDraft, EventQuery};
use crate::error::{CalendarError, RemoteError};
use crate::remote::{Conditions, RemoteStore};
use crate::schema::{value_as_key, Record};

pub use crate::tenant::StaticSession;

fn unavailable() -> RemoteError {
    RemoteError::Http {
        status: 503,
        message: "remote unavailable".into(),
    }
}

fn matches(row: &Record, conditions: &Conditions) -> bool {
    conditions
        .iter()
        .all(|(column, value)| row.get(column) == Some(value))
}

/// Remote store backed by a map of tables.
#[derive(Default)]
pub struct FakeRemote {
    tables: Mutex<HashMap<String, Vec<Record>>>,
    offline: AtomicBool,
    fail_writes: AtomicBool,
    fail_deletes: AtomicBool,
    pub selects: AtomicUsize,
    pub upserts: AtomicUsize,
    pub deletes: AtomicUsize,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call fails as if the network were down.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Place a row directly, bypassing translation and counters.
    pub fn seed(&self, table: &str, row: Record) {
        if let Ok(mut tables) = self.tables.lock() {
            tables.entry(table.to_string()).or_default().push(row);
        }
    }

    /// Current rows of `table`.
    pub fn rows(&self, table: &str) -> Vec<Record> {
        self.tables
            .lock()
            .ok()
            .and_then(|tables| tables.get(table).cloned())
            .unwrap_or_default()
    }

    fn guard(&self) -> Result<(), RemoteError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(unavailable())
        } else {
            Ok(())
        }
    }

    fn tables(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<Record>>>, RemoteError> {
        self.tables
            .lock()
            .map_err(|_| RemoteError::Malformed("fake remote lock poisoned".into()))
    }
}

#[async_trait]
impl RemoteStore for FakeRemote {
    async fn select(&self, table: &str, filters: &Conditions) -> Result<Vec<Record>, RemoteError> {
        self.selects.fetch_add(1, Ordering::SeqCst);
        self.guard()?;
        let tables = self.tables()?;
        Ok(tables
            .get(table)
            .map(|rows| rows.iter().filter(|row| matches(row, filters)).cloned().collect())
            .unwrap_or_default())
    }

    async fn upsert(
        &self,
        table: &str,
        rows: &[Record],
        conflict_column: &str,
    ) -> Result<(), RemoteError> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.guard()?;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RemoteError::Http {
                status: 400,
                message: "write rejected".into(),
            });
        }
        let mut tables = self.tables()?;
        let stored = tables.entry(table.to_string()).or_default();
        for row in rows {
            let key = row.get(conflict_column).and_then(value_as_key);
            let position = key.as_ref().and_then(|key| {
                stored
                    .iter()
                    .position(|r| r.get(conflict_column).and_then(value_as_key).as_ref() == Some(key))
            });
            match position {
                Some(index) => {
                    for (column, value) in row {
                        stored[index].insert(column.clone(), value.clone());
                    }
                }
                None => stored.push(row.clone()),
            }
        }
        Ok(())
    }

    async fn delete(
        &self,
        table: &str,
        key_column: &str,
        ids: &[String],
        scope: &Conditions,
    ) -> Result<(), RemoteError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.guard()?;
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        let ids: BTreeSet<&str> = ids.iter().map(String::as_str).collect();
        let mut tables = self.tables()?;
        if let Some(rows) = tables.get_mut(table) {
            rows.retain(|row| {
                let doomed = row
                    .get(key_column)
                    .and_then(value_as_key)
                    .is_some_and(|key| ids.contains(key.as_str()));
                !(doomed && matches(row, scope))
            });
        }
        Ok(())
    }
}

/// Calendar backed by a map of events, honouring the query filters the
/// real service supports.
#[derive(Default)]
pub struct FakeCalendar {
    events: Mutex<BTreeMap<String, CalendarEvent>>,
    next_id: AtomicUsize,
    fail_lookups: AtomicBool,
    failing_deletes: Mutex<BTreeSet<String>>,
    pub lists: AtomicUsize,
    pub inserts: AtomicUsize,
    pub patches: AtomicUsize,
    pub deletes: AtomicUsize,
}

impl FakeCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an event as if someone else had created it.
    pub fn seed(&self, event: CalendarEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.insert(event.id.clone(), event);
        }
    }

    pub fn events(&self) -> Vec<CalendarEvent> {
        self.events
            .lock()
            .map(|events| events.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn set_fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }

    /// Make deleting `event_id` fail.
    pub fn fail_delete_of(&self, event_id: &str) {
        if let Ok(mut failing) = self.failing_deletes.lock() {
            failing.insert(event_id.to_string());
        }
    }

    /// Total write calls (insert, patch, delete).
    pub fn writes(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
            + self.patches.load(Ordering::SeqCst)
            + self.deletes.load(Ordering::SeqCst)
    }

    pub fn reset_counters(&self) {
        for counter in [&self.lists, &self.inserts, &self.patches, &self.deletes] {
            counter.store(0, Ordering::SeqCst);
        }
    }

    fn store(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, CalendarEvent>>, CalendarError> {
        self.events
            .lock()
            .map_err(|_| CalendarError::Malformed("fake calendar lock poisoned".into()))
    }
}

fn materialize(id: String, draft: &EventDraft) -> CalendarEvent {
    CalendarEvent {
        id,
        summary: Some(draft.summary.clone()),
        description: Some(draft.description.clone()),
        location: draft.location.clone(),
        start: draft.start.clone(),
        end: draft.end.clone(),
        private: draft.private.clone(),
    }
}

fn in_query(event: &CalendarEvent, query: &EventQuery) -> bool {
    if let Some(min) = query.time_min {
        if event.end.sort_key() <= min.naive_utc() {
            return false;
        }
    }
    if let Some(max) = query.time_max {
        if event.start.sort_key() >= max.naive_utc() {
            return false;
        }
    }
    if let Some((key, value)) = &query.private_property {
        if event.private.get(key) != Some(value) {
            return false;
        }
    }
    if let Some(text) = &query.text {
        let haystack = [event.summary.as_deref(), event.description.as_deref()];
        if !haystack.iter().flatten().any(|field| field.contains(text.as_str())) {
            return false;
        }
    }
    true
}

#[async_trait]
impl CalendarService for FakeCalendar {
    async fn list(&self, query: &EventQuery) -> Result<Vec<CalendarEvent>, CalendarError> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(CalendarError::Api {
                status: 500,
                message: "lookup failed".into(),
            });
        }
        Ok(self
            .store()?
            .values()
            .filter(|event| in_query(event, query))
            .cloned()
            .collect())
    }

    async fn insert(&self, draft: &EventDraft) -> Result<CalendarEvent, CalendarError> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        let id = format!("evt-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let event = materialize(id, draft);
        self.store()?.insert(event.id.clone(), event.clone());
        Ok(event)
    }

    async fn patch(
        &self,
        event_id: &str,
        draft: &EventDraft,
    ) -> Result<CalendarEvent, CalendarError> {
        self.patches.fetch_add(1, Ordering::SeqCst);
        let mut events = self.store()?;
        let Some(existing) = events.get_mut(event_id) else {
            return Err(CalendarError::Api {
                status: 404,
                message: format!("no event {event_id}"),
            });
        };
        let mut private = existing.private.clone();
        private.extend(draft.private.clone());
        *existing = CalendarEvent {
            private,
            ..materialize(event_id.to_string(), draft)
        };
        Ok(existing.clone())
    }

    async fn delete(&self, event_id: &str) -> Result<(), CalendarError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_deletes
            .lock()
            .map(|set| set.contains(event_id))
            .unwrap_or(false);
        if failing {
            return Err(CalendarError::Api {
                status: 500,
                message: "delete failed".into(),
            });
        }
        self.store()?.remove(event_id);
        Ok(())
    }
}

/// Convenience for building a seeded record from JSON.
pub fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        _ => Record::new(),
    }
}
