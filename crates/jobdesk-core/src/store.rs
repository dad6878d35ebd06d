//! Dual-write record store.
//!
//! Every entity goes through here. Writes land in the local cache first and
//! are then pushed to the remote store; reads merge both sides by primary
//! key with the remote copy winning. Deleted ids are tombstoned so a stale
//! remote row can never resurface. The local cache is the offline system
//! of record: losing the network degrades reads to local-only and leaves
//! writes queued in the cache until the next successful upsert or refresh.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::error::{CoreError, StoreError};
use crate::models::{from_record, to_record, Entity};
use crate::remote::RemoteStore;
use crate::schema::{EntityKind, Filter, Record, Schema, TENANT_COLUMN};
use crate::storage::{LocalCache, SharedDb, TombstoneSet};
use crate::tenant::TenantResolver;

/// How the remote side took part in an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RemoteStatus {
    /// The remote store answered.
    Synced,
    /// No remote store configured or no tenant resolved; local only.
    Offline,
    /// The remote store was tried and failed; the result is local only.
    Degraded { reason: String },
}

impl RemoteStatus {
    pub fn is_synced(&self) -> bool {
        matches!(self, RemoteStatus::Synced)
    }

    /// Keep the least healthy of two statuses.
    fn worst(self, other: RemoteStatus) -> RemoteStatus {
        match (self, other) {
            (RemoteStatus::Degraded { reason }, _) | (_, RemoteStatus::Degraded { reason }) => {
                RemoteStatus::Degraded { reason }
            }
            (RemoteStatus::Offline, _) | (_, RemoteStatus::Offline) => RemoteStatus::Offline,
            _ => RemoteStatus::Synced,
        }
    }
}

impl fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteStatus::Synced => f.write_str("synced"),
            RemoteStatus::Offline => f.write_str("offline"),
            RemoteStatus::Degraded { reason } => write!(f, "degraded ({reason})"),
        }
    }
}

/// Records returned by a read.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<T> {
    pub records: Vec<T>,
    pub status: RemoteStatus,
}

/// Result of an upsert that reached the local cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Written {
    pub count: usize,
    pub status: RemoteStatus,
}

/// Ids tombstoned by a delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deleted {
    pub ids: BTreeSet<String>,
    pub status: RemoteStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Completed {
        /// Rows pulled per entity kind.
        pulled: BTreeMap<EntityKind, usize>,
        status: RemoteStatus,
    },
    /// Another refresh on this store is still running.
    AlreadyRunning,
}

/// Clears the refresh flag when the refresh ends, however it ends.
struct RefreshGuard<'a>(&'a AtomicBool);

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct RecordStore {
    schema: Schema,
    cache: LocalCache,
    tombstones: TombstoneSet,
    tenant: TenantResolver,
    remote: Option<Arc<dyn RemoteStore>>,
    refreshing: AtomicBool,
}

impl RecordStore {
    /// Validate the field mappings and load local state from `db`.
    pub fn open(
        db: SharedDb,
        tenant: TenantResolver,
        remote: Option<Arc<dyn RemoteStore>>,
    ) -> Result<Self, CoreError> {
        let schema = Schema::validated()?;
        Ok(Self {
            schema,
            cache: LocalCache::open(db.clone())?,
            tombstones: TombstoneSet::open(db)?,
            tenant,
            remote,
            refreshing: AtomicBool::new(false),
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn tenant(&self) -> &TenantResolver {
        &self.tenant
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// The remote store, usable only once a tenant scopes the call.
    fn remote_for(&self, tenant: Option<&str>) -> Option<&dyn RemoteStore> {
        tenant?;
        self.remote.as_deref()
    }

    /// Column condition restricting `kind` to `tenant`.
    fn scope(&self, kind: EntityKind, tenant: &str) -> (String, Value) {
        let column = if kind.is_tenant() {
            self.schema.map(kind).key_column()
        } else {
            TENANT_COLUMN
        };
        (column.to_string(), Value::String(tenant.to_string()))
    }

    /// Local rows visible for `conditions`. Rows written before a tenant
    /// was known carry no scope column and stay visible.
    fn local_matches(row: &Record, conditions: &[(String, Value)], scope: Option<&(String, Value)>) -> bool {
        let scoped = scope.map_or(true, |(column, tenant)| {
            row.get(column).map_or(true, |value| value == tenant)
        });
        scoped
            && conditions
                .iter()
                .all(|(column, value)| row.get(column) == Some(value))
    }

    // ========================================================================
    // Record-level operations
    // ========================================================================

    /// Merged view of `kind` matching `filter`, minus tombstoned ids.
    pub async fn select(
        &self,
        kind: EntityKind,
        filter: &Filter,
    ) -> Result<Fetched<Record>, StoreError> {
        let conditions = self.schema.filter_columns(kind, filter);
        let tenant = self.tenant.resolve().await;
        let scope = tenant.as_deref().map(|tenant| self.scope(kind, tenant));

        let (remote_rows, status) = match self.remote_for(tenant.as_deref()) {
            Some(remote) => {
                let mut remote_conditions = conditions.clone();
                remote_conditions.extend(scope.clone());
                match remote.select(kind.table(), &remote_conditions).await {
                    Ok(rows) => (rows, RemoteStatus::Synced),
                    Err(e) => {
                        tracing::warn!(%kind, error = %e, "remote read failed, serving local cache");
                        (Vec::new(), RemoteStatus::Degraded { reason: e.to_string() })
                    }
                }
            }
            None => (Vec::new(), RemoteStatus::Offline),
        };

        let tombstoned = self.tombstones.ids(kind)?;
        let local_rows = self.cache.rows(kind)?;

        let remote_keys: HashSet<String> = remote_rows
            .iter()
            .filter_map(|row| self.schema.row_key(kind, row))
            .collect();

        let local_only = local_rows.into_iter().filter(|row| {
            Self::local_matches(row, &conditions, scope.as_ref())
                && self
                    .schema
                    .row_key(kind, row)
                    .map_or(true, |key| !remote_keys.contains(&key))
        });

        let records: Vec<Record> = remote_rows
            .into_iter()
            .chain(local_only)
            .filter(|row| {
                self.schema
                    .row_key(kind, row)
                    .map_or(true, |key| !tombstoned.contains(&key))
            })
            .map(|row| self.schema.from_remote(kind, &row))
            .collect();

        tracing::debug!(%kind, count = records.len(), %status, "select");
        Ok(Fetched { records, status })
    }

    /// Write `records` locally, then remotely in one batch.
    ///
    /// A remote failure is returned as [`StoreError::RemoteWrite`]; the
    /// local write has already taken effect by then.
    pub async fn upsert(&self, kind: EntityKind, records: &[Record]) -> Result<Written, StoreError> {
        let tenant = self.tenant.resolve().await;
        let key_column = self.schema.map(kind).key_column();

        let mut rows = Vec::with_capacity(records.len());
        let mut keys = Vec::with_capacity(records.len());
        for record in records {
            let row = self.schema.to_remote(kind, record, tenant.as_deref());
            let key = self.schema.row_key(kind, &row).ok_or(StoreError::MissingKey {
                kind,
                field: kind.primary_key(),
            })?;
            keys.push(key);
            rows.push(row);
        }

        self.cache.upsert(kind, key_column, &rows)?;
        for key in &keys {
            if self.tombstones.clear(kind, key)? {
                tracing::debug!(%kind, key = %key, "upsert lifted tombstone");
            }
        }

        let status = match self.remote_for(tenant.as_deref()) {
            Some(remote) => {
                remote
                    .upsert(kind.table(), &rows, key_column)
                    .await
                    .map_err(|source| StoreError::RemoteWrite {
                        table: kind.table(),
                        source,
                    })?;
                RemoteStatus::Synced
            }
            None => RemoteStatus::Offline,
        };

        tracing::debug!(%kind, count = rows.len(), %status, "upsert");
        Ok(Written {
            count: rows.len(),
            status,
        })
    }

    /// Tombstone everything `filter` matches and drop it locally; the
    /// remote delete is best effort.
    pub async fn delete(&self, kind: EntityKind, filter: &Filter) -> Result<Deleted, StoreError> {
        let matched = self.select(kind, filter).await?;
        let mut ids: BTreeSet<String> = matched
            .records
            .iter()
            .filter_map(|record| self.schema.key_of(kind, record))
            .collect();
        ids.extend(filter.pinned_key(kind));

        if ids.is_empty() {
            return Ok(Deleted {
                ids,
                status: matched.status,
            });
        }

        let key_column = self.schema.map(kind).key_column();
        self.tombstones.insert(kind, &ids)?;
        self.cache.remove(kind, key_column, &ids)?;

        let tenant = self.tenant.resolve().await;
        let status = match (self.remote_for(tenant.as_deref()), tenant.as_deref()) {
            (Some(remote), Some(tenant)) => {
                let scope = if kind.is_tenant() {
                    Vec::new()
                } else {
                    vec![self.scope(kind, tenant)]
                };
                let id_list: Vec<String> = ids.iter().cloned().collect();
                match remote.delete(kind.table(), key_column, &id_list, &scope).await {
                    Ok(()) => RemoteStatus::Synced,
                    Err(e) => {
                        tracing::warn!(%kind, ids = ?id_list, error = %e, "remote delete failed, tombstone kept");
                        RemoteStatus::Degraded { reason: e.to_string() }
                    }
                }
            }
            _ => RemoteStatus::Offline,
        };

        tracing::debug!(%kind, count = ids.len(), %status, "delete");
        Ok(Deleted { ids, status })
    }

    /// Pull every kind's tenant rows into the local cache.
    ///
    /// Overlapping calls on the same store coalesce: the second one returns
    /// [`RefreshOutcome::AlreadyRunning`] without touching anything.
    pub async fn refresh_all(&self) -> Result<RefreshOutcome, StoreError> {
        if self
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("refresh already running");
            return Ok(RefreshOutcome::AlreadyRunning);
        }
        let _guard = RefreshGuard(&self.refreshing);

        let mut pulled = BTreeMap::new();
        let tenant = self.tenant.resolve().await;
        let (Some(remote), Some(tenant)) = (self.remote_for(tenant.as_deref()), tenant.as_deref())
        else {
            return Ok(RefreshOutcome::Completed {
                pulled,
                status: RemoteStatus::Offline,
            });
        };

        let mut status = RemoteStatus::Synced;
        for kind in EntityKind::ALL {
            let scope = [self.scope(kind, tenant)];
            let rows = match remote.select(kind.table(), &scope).await {
                Ok(rows) => rows,
                Err(e) => {
                    tracing::warn!(%kind, error = %e, "refresh failed for kind");
                    status = status.worst(RemoteStatus::Degraded {
                        reason: format!("{kind}: {e}"),
                    });
                    continue;
                }
            };

            let tombstoned = self.tombstones.ids(kind)?;
            let fresh: Vec<Record> = rows
                .into_iter()
                .filter(|row| {
                    self.schema
                        .row_key(kind, row)
                        .is_some_and(|key| !tombstoned.contains(&key))
                })
                .collect();
            self.cache
                .upsert(kind, self.schema.map(kind).key_column(), &fresh)?;
            pulled.insert(kind, fresh.len());
        }

        tracing::info!(?pulled, %status, "refresh complete");
        Ok(RefreshOutcome::Completed { pulled, status })
    }

    // ========================================================================
    // Typed front ends
    // ========================================================================

    /// Typed [`select`](Self::select). Records that do not decode are
    /// skipped with a warning.
    pub async fn select_as<E: Entity>(&self, filter: &Filter) -> Result<Fetched<E>, StoreError> {
        let fetched = self.select(E::KIND, filter).await?;
        let records = fetched
            .records
            .into_iter()
            .filter_map(|record| match from_record::<E>(record) {
                Ok(entity) => Some(entity),
                Err(e) => {
                    tracing::warn!(kind = %E::KIND, error = %e, "skipping undecodable record");
                    None
                }
            })
            .collect();
        Ok(Fetched {
            records,
            status: fetched.status,
        })
    }

    /// Single entity by primary key.
    pub async fn get<E: Entity>(&self, id: &str) -> Result<Option<E>, StoreError> {
        let fetched = self.select_as::<E>(&Filter::by_key(E::KIND, id)).await?;
        Ok(fetched.records.into_iter().find(|entity| entity.key() == id))
    }

    pub async fn upsert_as<E: Entity>(&self, entities: &[E]) -> Result<Written, StoreError> {
        let records = entities
            .iter()
            .map(|entity| {
                to_record(entity).map_err(|source| StoreError::Encoding {
                    kind: E::KIND,
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.upsert(E::KIND, &records).await
    }

    pub async fn delete_as<E: Entity>(&self, filter: &Filter) -> Result<Deleted, StoreError> {
        self.delete(E::KIND, filter).await
    }

    pub async fn delete_by_id<E: Entity>(&self, id: &str) -> Result<Deleted, StoreError> {
        self.delete(E::KIND, &Filter::by_key(E::KIND, id)).await
    }
}
