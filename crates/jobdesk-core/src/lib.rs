//! # Jobdesk Core Library
//!
//! Persistence and synchronization core for the jobdesk freelance business
//! app. The CLI in `jobdesk-cli` is a thin layer over this crate.
//!
//! ## Architecture
//!
//! - **Schema**: validated two-way mapping between entity field names and
//!   remote column names, with tenant injection and derived-field stripping
//! - **Storage**: SQLite-backed local cache and per-kind tombstone set, plus
//!   TOML configuration
//! - **Record store**: dual-write CRUD over the local cache and the hosted
//!   relational store, degrading to local-only reads when offline
//! - **Calendar**: one-way reconciliation of job schedules onto an external
//!   calendar (Google Calendar v3)
//!
//! ## Key Components
//!
//! - [`RecordStore`]: merged reads, local-then-remote writes, tombstoned deletes
//! - [`TenantResolver`]: current tenant identity with an offline fallback
//! - [`Reconciler`]: converges a job's calendar events
//! - [`Workspace`]: the job save/delete workflow tying both together
//! - [`Config`]: application configuration management

pub mod calendar;
pub mod credentials;
pub mod error;
pub mod fakes;
pub mod models;
pub mod remote;
pub mod retry;
pub mod schema;
pub mod storage;
pub mod store;
pub mod tenant;
pub mod workspace;


pub use calendar::{CalendarService, GoogleCalendar, ReconcileOptions, ReconcileReport, Reconciler};
pub use error::{
    CalendarError, ConfigError, CoreError, ReconcileError, RemoteError, SchemaError, StorageError,
    StoreError, WorkspaceError,
};
pub use models::{
    Client, Entity, Invoice, Job, JobItem, JobStatus, MileageRecord, Quote, ScheduleMode, Shift,
    Tenant,
};
pub use remote::{RemoteCredentials, RemoteStore, RestRemote};
pub use retry::RetryPolicy;
pub use schema::{EntityKind, Filter, Record, Schema};
pub use storage::{Config, Database};
pub use store::{Deleted, Fetched, RecordStore, RefreshOutcome, RemoteStatus, Written};
pub use tenant::{SessionProvider, StaticSession, TenantResolver};
pub use workspace::{JobDeleted, JobSaved, Workspace};
