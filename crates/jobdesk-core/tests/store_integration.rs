//! Integration tests for the dual-write record store.
//!
//! Drives the store through its public API against the in-memory remote,
//! including durable storage on disk and outages mid-session.

use std::sync::Arc;

use chrono::NaiveDate;
use jobdesk_core::fakes::{record, FakeRemote};
use jobdesk_core::{
    Client, Database, EntityKind, Filter, Job, JobStatus, MileageRecord, RecordStore,
    RefreshOutcome, RemoteStatus, SessionProvider, StaticSession, TenantResolver,
};
use serde_json::json;

fn open_store(db: jobdesk_core::storage::SharedDb, remote: &Arc<FakeRemote>) -> RecordStore {
    let session: Arc<dyn SessionProvider> = Arc::new(StaticSession::signed_in("tenant-1"));
    let resolver = TenantResolver::open(db.clone(), Some(session)).unwrap();
    RecordStore::open(db, resolver, Some(remote.clone())).unwrap()
}

fn memory_store(remote: &Arc<FakeRemote>) -> RecordStore {
    open_store(Database::open_memory().unwrap().shared(), remote)
}

fn j1() -> Job {
    let mut job = Job::new("J1", "Wedding");
    job.status = JobStatus::Confirmed;
    job.start_date = NaiveDate::from_ymd_opt(2025, 6, 1);
    job.end_date = NaiveDate::from_ymd_opt(2025, 6, 3);
    job
}

/// Test: the latest local write wins while the remote is unreachable.
#[tokio::test]
async fn test_latest_write_visible_offline() {
    let remote = Arc::new(FakeRemote::new());
    let store = memory_store(&remote);

    store.upsert_as(&[j1()]).await.unwrap();
    remote.set_offline(true);
    let mut renamed = j1();
    renamed.title = "Wedding (reshoot)".into();
    // The remote write fails but the local copy stays.
    assert!(store.upsert_as(&[renamed]).await.is_err());

    let fetched = store.select_as::<Job>(&Filter::new()).await.unwrap();
    assert!(matches!(fetched.status, RemoteStatus::Degraded { .. }));
    assert_eq!(fetched.records.len(), 1);
    assert_eq!(fetched.records[0].title, "Wedding (reshoot)");
}

/// Test: a deleted job never comes back from a stale remote row.
#[tokio::test]
async fn test_deleted_job_stays_deleted_with_stale_remote() {
    let remote = Arc::new(FakeRemote::new());
    let store = memory_store(&remote);
    store.upsert_as(&[j1()]).await.unwrap();

    remote.set_fail_deletes(true);
    let deleted = store.delete_by_id::<Job>("J1").await.unwrap();
    assert!(deleted.ids.contains("J1"));
    assert!(matches!(deleted.status, RemoteStatus::Degraded { .. }));
    assert_eq!(remote.rows("jobs").len(), 1);

    assert!(store.get::<Job>("J1").await.unwrap().is_none());
    let outcome = store.refresh_all().await.unwrap();
    assert!(matches!(outcome, RefreshOutcome::Completed { .. }));
    assert!(store.select_as::<Job>(&Filter::new()).await.unwrap().records.is_empty());
}

/// Test: cache and tombstones survive reopening the database file.
#[tokio::test]
async fn test_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("jobdesk.db");
    let remote = Arc::new(FakeRemote::new());

    {
        let store = open_store(Database::open(&path).unwrap().shared(), &remote);
        let client = Client {
            id: "C1".into(),
            name: "Acme".into(),
            ..Client::default()
        };
        store.upsert_as(&[client]).await.unwrap();
        store.upsert_as(&[j1()]).await.unwrap();
        remote.set_fail_deletes(true);
        store.delete_by_id::<Job>("J1").await.unwrap();
    }

    remote.set_offline(true);
    let store = open_store(Database::open(&path).unwrap().shared(), &remote);
    assert_eq!(store.tenant().cached().as_deref(), Some("tenant-1"));
    let clients = store.select_as::<Client>(&Filter::new()).await.unwrap();
    assert_eq!(clients.records.len(), 1);

    remote.set_offline(false);
    assert!(store.get::<Job>("J1").await.unwrap().is_none());
}

/// Test: refresh pulls remote rows so later offline reads see them.
#[tokio::test]
async fn test_refresh_then_offline_read() {
    let remote = Arc::new(FakeRemote::new());
    remote.seed(
        "mileage",
        record(json!({
            "id": "M1",
            "user_id": "tenant-1",
            "trip_date": "2025-06-02",
            "miles": 12.5,
            "rate_per_mile": 0.7,
        })),
    );
    remote.seed(
        "mileage",
        record(json!({
            "id": "M2",
            "user_id": "someone-else",
            "trip_date": "2025-06-02",
            "miles": 3,
            "rate_per_mile": 0.7,
        })),
    );
    let store = memory_store(&remote);

    match store.refresh_all().await.unwrap() {
        RefreshOutcome::Completed { pulled, status } => {
            assert!(status.is_synced());
            assert_eq!(pulled[&EntityKind::MileageRecord], 1);
        }
        RefreshOutcome::AlreadyRunning => panic!("nothing else was refreshing"),
    }

    remote.set_offline(true);
    let trips = store.select_as::<MileageRecord>(&Filter::new()).await.unwrap();
    assert_eq!(trips.records.len(), 1);
    let trip = &trips.records[0];
    assert_eq!(trip.date, NaiveDate::from_ymd_opt(2025, 6, 2).unwrap());
    assert_eq!(trip.deduction, Some(8.75));
}

/// Test: filters use semantic names end to end.
#[tokio::test]
async fn test_filter_by_semantic_field() {
    let remote = Arc::new(FakeRemote::new());
    let store = memory_store(&remote);
    let mut other = j1();
    other.id = "J2".into();
    other.client_id = Some("C2".into());
    let mut mine = j1();
    mine.client_id = Some("C1".into());
    store.upsert_as(&[mine, other]).await.unwrap();

    let filter = Filter::new().eq("clientId", "C1");
    let jobs = store.select_as::<Job>(&filter).await.unwrap();
    assert_eq!(jobs.records.len(), 1);
    assert_eq!(jobs.records[0].id, "J1");
    assert!(remote.rows("jobs").iter().all(|row| row.contains_key("client_id")));
}
