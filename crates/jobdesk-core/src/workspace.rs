//! Job save and delete workflows.
//!
//! A [`Workspace`] owns the record store and, when a calendar is connected,
//! the reconciler. Saving a job writes it locally, then remotely, then
//! projects it onto the calendar, in that order. A remote write failure stops
//! the workflow before the calendar is touched.

use std::sync::Arc;

use serde::Serialize;

use crate::calendar::{GoogleCalendar, ReconcileOptions, ReconcileReport, Reconciler};
use crate::credentials;
use crate::error::{CoreError, StoreError, WorkspaceError};
use crate::models::{Client, Job};
use crate::remote::{RemoteStore, RestRemote};
use crate::retry::RetryPolicy;
use crate::storage::{Config, Database};
use crate::store::{RecordStore, RemoteStatus};
use crate::tenant::{SessionProvider, StaticSession, TenantResolver};

/// Label used on events when the job's client is unknown.
pub const DEFAULT_CLIENT_LABEL: &str = "Client";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSaved {
    pub status: RemoteStatus,
    /// `None` when no calendar is connected.
    pub calendar: Option<ReconcileReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobDeleted {
    pub status: RemoteStatus,
    pub calendar: Option<ReconcileReport>,
}

pub struct Workspace {
    store: RecordStore,
    reconciler: Option<Reconciler>,
}

impl Workspace {
    pub fn new(store: RecordStore, reconciler: Option<Reconciler>) -> Self {
        Self { store, reconciler }
    }

    /// Wire a workspace from configuration and the keyring.
    ///
    /// An empty remote URL gives a local-only store. The calendar is
    /// connected only when enabled and a calendar token is stored.
    /// `tenant` pins the identity instead of asking the remote session.
    pub fn open(config: &Config, tenant: Option<String>) -> Result<Self, CoreError> {
        config.validate()?;
        let db = Database::open(&config.database_path()?)?.shared();
        let retry = RetryPolicy::from(&config.retry);

        let rest = if config.remote.url.trim().is_empty() {
            None
        } else {
            let credentials = credentials::remote_credentials()?;
            Some(Arc::new(RestRemote::new(
                &config.remote,
                credentials,
                retry.clone(),
            )?))
        };

        let session: Option<Arc<dyn SessionProvider>> = match (tenant, &rest) {
            (Some(identity), _) => Some(Arc::new(StaticSession::signed_in(identity))),
            (None, Some(rest)) => Some(rest.clone()),
            (None, None) => None,
        };
        let remote = rest.map(|rest| rest as Arc<dyn RemoteStore>);

        let resolver = TenantResolver::open(db.clone(), session)?;
        let store = RecordStore::open(db, resolver, remote)?;

        let reconciler = if config.calendar.enabled {
            let token = credentials::get(credentials::CALENDAR_ACCESS_TOKEN).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "keyring unavailable, calendar projection off");
                None
            });
            match token {
                Some(token) => {
                    let calendar = GoogleCalendar::new(&config.calendar, token, retry)?;
                    let options = ReconcileOptions::from_config(&config.calendar)?;
                    Some(Reconciler::new(Arc::new(calendar), options))
                }
                None => {
                    tracing::info!("no calendar token stored, calendar projection off");
                    None
                }
            }
        } else {
            None
        };

        Ok(Self::new(store, reconciler))
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn reconciler(&self) -> Option<&Reconciler> {
        self.reconciler.as_ref()
    }

    /// Persist `job` locally and remotely, then converge its calendar events.
    pub async fn save_job(&self, job: &Job) -> Result<JobSaved, WorkspaceError> {
        let written = self.store.upsert_as(std::slice::from_ref(job)).await?;

        let calendar = match &self.reconciler {
            Some(reconciler) => {
                let label = self.client_label(job).await?;
                Some(reconciler.reconcile(job, &label).await?)
            }
            None => None,
        };

        Ok(JobSaved {
            status: written.status,
            calendar,
        })
    }

    /// Delete the job, then remove its calendar events based on the last
    /// known state of the job.
    pub async fn delete_job(&self, id: &str) -> Result<JobDeleted, WorkspaceError> {
        let last_known = self.store.get::<Job>(id).await?;
        let deleted = self.store.delete_by_id::<Job>(id).await?;

        let calendar = match &self.reconciler {
            Some(reconciler) => {
                let job = last_known.unwrap_or_else(|| Job::new(id, ""));
                Some(reconciler.remove(&job).await?)
            }
            None => None,
        };

        Ok(JobDeleted {
            status: deleted.status,
            calendar,
        })
    }

    /// Re-project a stored job without writing it.
    pub async fn reconcile_job(&self, id: &str) -> Result<Option<ReconcileReport>, WorkspaceError> {
        let job = self
            .store
            .get::<Job>(id)
            .await?
            .ok_or_else(|| WorkspaceError::UnknownJob(id.to_string()))?;
        let Some(reconciler) = &self.reconciler else {
            return Ok(None);
        };
        let label = self.client_label(&job).await?;
        Ok(Some(reconciler.reconcile(&job, &label).await?))
    }

    async fn client_label(&self, job: &Job) -> Result<String, StoreError> {
        let Some(client_id) = job.client_id.as_deref() else {
            return Ok(DEFAULT_CLIENT_LABEL.to_string());
        };
        Ok(self
            .store
            .get::<Client>(client_id)
            .await?
            .map(|client| client.label().to_string())
            .unwrap_or_else(|| DEFAULT_CLIENT_LABEL.to_string()))
    }
}
