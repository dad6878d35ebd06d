//! Core error types for jobdesk-core.
//!
//! One `thiserror` enum per concern, aggregated by [`CoreError`] for callers
//! that do not care which layer failed.

use std::path::PathBuf;
use thiserror::Error;

use crate::schema::EntityKind;

/// Core error type for jobdesk-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Local storage errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Schema mapping errors
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Record store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Remote store client errors
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Calendar client errors
    #[error("Calendar error: {0}")]
    Calendar(#[from] CalendarError),

    /// Calendar reconciliation errors
    #[error("Calendar error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// Job workflow errors
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    /// Credential store errors
    #[error("Credential error: {0}")]
    Credentials(#[from] keyring::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors with context
    #[error("{0}")]
    Custom(String),
}

/// Local durable storage errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Database is locked
    #[error("Database is locked")]
    Locked,

    /// A stored snapshot could not be decoded
    #[error("Corrupt snapshot under key '{key}': {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Snapshot could not be encoded
    #[error("Failed to encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),

    /// The in-process lock guarding the connection was poisoned
    #[error("Storage lock poisoned")]
    Poisoned,
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown dot-path key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Could not determine the data directory
    #[error("Could not determine data directory")]
    NoDataDir,
}

/// Field mapping validation errors, raised when the static schema drifts.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SchemaError {
    #[error("{kind}: field '{field}' is mapped more than once")]
    DuplicateField { kind: EntityKind, field: String },

    #[error("{kind}: column '{column}' is the target of more than one field")]
    DuplicateColumn { kind: EntityKind, column: String },

    #[error("{kind}: tenant column '{column}' is claimed by field '{field}'")]
    TenantColumnClaimed {
        kind: EntityKind,
        column: String,
        field: String,
    },

    #[error("{kind}: primary key '{field}' has no column mapping")]
    MissingPrimaryKey { kind: EntityKind, field: String },

    #[error("{kind}: derived field '{field}' is also mapped to a column")]
    DerivedFieldMapped { kind: EntityKind, field: String },
}

/// Remote relational store errors.
#[derive(Error, Debug)]
pub enum RemoteError {
    /// HTTP transport failure
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Non-success status from the store
    #[error("Remote store returned {status}: {message}")]
    Http { status: u16, message: String },

    /// Response body was not the expected shape
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// No session or credentials available for the call
    #[error("Authentication required")]
    AuthenticationRequired,

    /// Bad base URL in configuration
    #[error("Invalid remote URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl RemoteError {
    /// Whether a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::Network(_) => true,
            RemoteError::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// External calendar service errors.
#[derive(Error, Debug)]
pub enum CalendarError {
    #[error("Calendar API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Malformed calendar response: {0}")]
    Malformed(String),

    #[error("Unknown time zone: {0}")]
    UnknownTimeZone(String),

    #[error("Invalid calendar URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl CalendarError {
    /// Whether a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            CalendarError::Network(_) => true,
            CalendarError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// The server answered and refused the request without applying it.
    /// A lost response or a gateway timeout does not count.
    pub fn is_refusal(&self) -> bool {
        matches!(self, CalendarError::Api { status: 429 | 503, .. })
    }
}

/// Record store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Local cache write or read failed
    #[error(transparent)]
    Local(#[from] StorageError),

    /// The remote upsert was rejected after the local write took effect
    #[error("Remote write to '{table}' failed (local copy kept): {source}")]
    RemoteWrite {
        table: &'static str,
        #[source]
        source: RemoteError,
    },

    /// A record could not be (de)serialized to its entity type
    #[error("{kind}: record encoding failed: {source}")]
    Encoding {
        kind: EntityKind,
        #[source]
        source: serde_json::Error,
    },

    /// Record has no primary key value
    #[error("{kind}: record has no '{field}' value")]
    MissingKey { kind: EntityKind, field: &'static str },
}

/// Calendar reconciliation errors. Only authoritative failures land here;
/// cleanup failures are reported in the reconcile report instead.
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Failed to look up events for job {job_id}: {source}")]
    Lookup {
        job_id: String,
        #[source]
        source: CalendarError,
    },

    #[error("Failed to create event for {unit}: {source}")]
    Create {
        unit: String,
        #[source]
        source: CalendarError,
    },

    #[error("Failed to update event {event_id} for {unit}: {source}")]
    Update {
        unit: String,
        event_id: String,
        #[source]
        source: CalendarError,
    },

    #[error("Job {job_id} has an invalid schedule: {message}")]
    InvalidSchedule { job_id: String, message: String },

    #[error(transparent)]
    TimeZone(#[from] CalendarError),
}

/// Job save/delete workflow errors.
#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Job saved but calendar could not be updated: {0}")]
    Calendar(#[from] ReconcileError),

    #[error("Job not found: {0}")]
    UnknownJob(String),
}

// Helper implementations for converting from other error types

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(err, _msg) => {
                if err.code == rusqlite::ErrorCode::DatabaseLocked {
                    StorageError::Locked
                } else {
                    StorageError::QueryFailed(err.to_string())
                }
            }
            _ => StorageError::QueryFailed(err.to_string()),
        }
    }
}

impl From<Box<dyn std::error::Error + Send + Sync>> for CoreError {
    fn from(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        CoreError::Custom(err.to_string())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
