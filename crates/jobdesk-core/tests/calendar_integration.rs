//! Integration tests for job saves projecting onto the calendar.
//!
//! Runs the full save workflow: record store, then reconciliation against
//! the in-memory calendar.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::NaiveDate;
use jobdesk_core::calendar::{CalendarService, EventTime, JOB_ID_PROPERTY, SHIFT_ID_PROPERTY};
use jobdesk_core::fakes::{FakeCalendar, FakeRemote};
use jobdesk_core::{
    Client, Database, Job, JobStatus, ReconcileOptions, Reconciler, RecordStore, RemoteStore,
    ScheduleMode, SessionProvider, Shift, StaticSession, TenantResolver, Workspace,
};

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn workspace(remote: &Arc<FakeRemote>, calendar: &Arc<FakeCalendar>) -> Workspace {
    let db = Database::open_memory().unwrap().shared();
    let session: Arc<dyn SessionProvider> = Arc::new(StaticSession::signed_in("tenant-1"));
    let resolver = TenantResolver::open(db.clone(), Some(session)).unwrap();
    let remote: Arc<dyn RemoteStore> = remote.clone();
    let store = RecordStore::open(db, resolver, Some(remote)).unwrap();
    let service: Arc<dyn CalendarService> = calendar.clone();
    Workspace::new(store, Some(Reconciler::new(service, ReconcileOptions::default())))
}

fn j1() -> Job {
    let mut job = Job::new("J1", "Wedding");
    job.client_id = Some("C1".into());
    job.status = JobStatus::Confirmed;
    job.start_date = Some(d(2025, 6, 1));
    job.end_date = Some(d(2025, 6, 3));
    job
}

fn three_shifts(mut job: Job) -> Job {
    job.schedule_mode = ScheduleMode::Shifts;
    job.shifts = (1..=3)
        .map(|n| Shift {
            id: format!("S{n}"),
            date: d(2025, 6, n),
            start_time: None,
            end_time: None,
            label: None,
        })
        .collect();
    job
}

async fn seed_client(ws: &Workspace) {
    let client = Client {
        id: "C1".into(),
        name: "Acme".into(),
        ..Client::default()
    };
    ws.store().upsert_as(&[client]).await.unwrap();
}

/// Test: a confirmed continuous job becomes one all-day event, and saving
/// it again issues no calendar writes.
#[tokio::test]
async fn test_continuous_job_round_trip() {
    let remote = Arc::new(FakeRemote::new());
    let calendar = Arc::new(FakeCalendar::new());
    let ws = workspace(&remote, &calendar);
    seed_client(&ws).await;

    let first = ws.save_job(&j1()).await.unwrap();
    assert_eq!(first.calendar.unwrap().created, 1);

    let events = calendar.events();
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.start, EventTime::Date(d(2025, 6, 1)));
    assert_eq!(event.end, EventTime::Date(d(2025, 6, 4)));
    assert_eq!(event.summary.as_deref(), Some("Acme: Wedding"));
    assert_eq!(event.private.get(JOB_ID_PROPERTY).map(String::as_str), Some("J1"));

    calendar.reset_counters();
    let second = ws.save_job(&j1()).await.unwrap();
    let report = second.calendar.unwrap();
    assert_eq!(report.unchanged, 1);
    assert_eq!(report.writes(), 0);
    assert_eq!(calendar.writes(), 0);
}

/// Test: shifts project one tagged event each, and switching back to a
/// continuous schedule deletes all of them.
#[tokio::test]
async fn test_shift_schedule_switches() {
    let remote = Arc::new(FakeRemote::new());
    let calendar = Arc::new(FakeCalendar::new());
    let ws = workspace(&remote, &calendar);
    seed_client(&ws).await;

    ws.save_job(&j1()).await.unwrap();
    let report = ws.save_job(&three_shifts(j1())).await.unwrap().calendar.unwrap();
    assert_eq!(report.created, 3);
    assert_eq!(report.deleted, 1);

    let events = calendar.events();
    assert_eq!(events.len(), 3);
    let mut shift_ids: Vec<_> = events
        .iter()
        .filter_map(|event| event.private.get(SHIFT_ID_PROPERTY).cloned())
        .collect();
    shift_ids.sort();
    assert_eq!(shift_ids, ["S1", "S2", "S3"]);

    let report = ws.save_job(&j1()).await.unwrap().calendar.unwrap();
    assert_eq!(report.created, 1);
    assert_eq!(report.deleted, 3);
    let events = calendar.events();
    assert_eq!(events.len(), 1);
    assert!(events[0].private.get(SHIFT_ID_PROPERTY).is_none());

    // The stored job lost its shifts too, so re-projecting it is a no-op.
    let stored: Job = ws.store().get("J1").await.unwrap().unwrap();
    assert!(stored.shifts.is_empty());
    assert_eq!(stored.schedule_mode, ScheduleMode::Continuous);
    calendar.reset_counters();
    let report = ws.reconcile_job("J1").await.unwrap().unwrap();
    assert_eq!(report.writes(), 0);
    assert_eq!(calendar.events().len(), 1);
}

/// Test: moving a job months away patches its event instead of leaving
/// the old one behind.
#[tokio::test]
async fn test_rescheduled_job_keeps_one_event() {
    let remote = Arc::new(FakeRemote::new());
    let calendar = Arc::new(FakeCalendar::new());
    let ws = workspace(&remote, &calendar);
    seed_client(&ws).await;
    ws.save_job(&j1()).await.unwrap();

    let mut moved = j1();
    moved.start_date = Some(d(2025, 10, 1));
    moved.end_date = Some(d(2025, 10, 3));
    let report = ws.save_job(&moved).await.unwrap().calendar.unwrap();

    assert_eq!(report.created, 0);
    assert_eq!(report.updated, 1);
    let events = calendar.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].end, EventTime::Date(d(2025, 10, 4)));
}

/// Test: cancelling a saved job clears its events; deleting it later finds
/// nothing left to remove.
#[tokio::test]
async fn test_cancel_then_delete() {
    let remote = Arc::new(FakeRemote::new());
    let calendar = Arc::new(FakeCalendar::new());
    let ws = workspace(&remote, &calendar);
    ws.save_job(&three_shifts(j1())).await.unwrap();

    let mut cancelled = three_shifts(j1());
    cancelled.status = JobStatus::Cancelled;
    let report = ws.save_job(&cancelled).await.unwrap().calendar.unwrap();
    assert_eq!(report.deleted, 3);
    assert!(calendar.events().is_empty());

    let deleted = ws.delete_job("J1").await.unwrap();
    assert_eq!(deleted.calendar.unwrap().writes(), 0);
    assert!(ws.store().get::<Job>("J1").await.unwrap().is_none());
}

/// Test: a remote write failure keeps the calendar untouched.
#[tokio::test]
async fn test_remote_failure_blocks_projection() {
    let remote = Arc::new(FakeRemote::new());
    let calendar = Arc::new(FakeCalendar::new());
    let ws = workspace(&remote, &calendar);

    remote.set_fail_writes(true);
    assert!(ws.save_job(&j1()).await.is_err());
    assert_eq!(calendar.lists.load(Ordering::SeqCst), 0);
    assert!(calendar.events().is_empty());

    remote.set_fail_writes(false);
    ws.save_job(&j1()).await.unwrap();
    assert_eq!(calendar.events().len(), 1);
}
