//! Durable on-device snapshot of every entity kind.
//!
//! Rows are kept in remote (translated) form, ordered by first insertion,
//! and written through to the kv table on every mutation. The snapshot is
//! the offline system of record: writes land here before any network call.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use crate::error::StorageError;
use crate::schema::{value_as_key, EntityKind, Record};

use super::{lock, SharedDb};

/// Fixed kv key of the snapshot document.
pub const CACHE_KEY: &str = "jobdesk.cache.v1";

type Snapshot = BTreeMap<String, Vec<Record>>;

/// Per-entity-kind row snapshot.
pub struct LocalCache {
    db: SharedDb,
    snapshot: Mutex<Snapshot>,
}

impl LocalCache {
    /// Load the snapshot from `db`, starting empty when none was saved.
    ///
    /// # Errors
    /// Returns [`StorageError::Corrupt`] when the stored document cannot be
    /// decoded.
    pub fn open(db: SharedDb) -> Result<Self, StorageError> {
        let raw = lock(&db)?.kv_get(CACHE_KEY)?;
        let snapshot = match raw {
            Some(raw) => serde_json::from_str(&raw).map_err(|source| StorageError::Corrupt {
                key: CACHE_KEY.to_string(),
                source,
            })?,
            None => Snapshot::new(),
        };
        Ok(Self {
            db,
            snapshot: Mutex::new(snapshot),
        })
    }

    /// All cached rows of `kind`, in insertion order.
    pub fn rows(&self, kind: EntityKind) -> Result<Vec<Record>, StorageError> {
        let snapshot = lock(&self.snapshot)?;
        Ok(snapshot.get(kind.table()).cloned().unwrap_or_default())
    }

    /// Merge `rows` into the snapshot by `key_column`: existing rows take the
    /// new values field by field, unknown keys are appended.
    pub fn upsert(
        &self,
        kind: EntityKind,
        key_column: &str,
        rows: &[Record],
    ) -> Result<(), StorageError> {
        let mut snapshot = lock(&self.snapshot)?;
        let collection = snapshot.entry(kind.table().to_string()).or_default();

        for row in rows {
            let key = row.get(key_column).and_then(value_as_key);
            let existing = key.as_ref().and_then(|key| {
                collection
                    .iter_mut()
                    .find(|r| r.get(key_column).and_then(value_as_key).as_ref() == Some(key))
            });
            match existing {
                Some(current) => {
                    for (column, value) in row {
                        current.insert(column.clone(), value.clone());
                    }
                }
                None => collection.push(row.clone()),
            }
        }

        self.persist(&snapshot)
    }

    /// Drop rows whose key is in `ids`. Returns how many were removed.
    pub fn remove(
        &self,
        kind: EntityKind,
        key_column: &str,
        ids: &BTreeSet<String>,
    ) -> Result<usize, StorageError> {
        let mut snapshot = lock(&self.snapshot)?;
        let Some(collection) = snapshot.get_mut(kind.table()) else {
            return Ok(0);
        };

        let before = collection.len();
        collection.retain(|row| {
            row.get(key_column)
                .and_then(value_as_key)
                .map_or(true, |key| !ids.contains(&key))
        });
        let removed = before - collection.len();

        if removed > 0 {
            self.persist(&snapshot)?;
        }
        Ok(removed)
    }

    fn persist(&self, snapshot: &Snapshot) -> Result<(), StorageError> {
        let raw = serde_json::to_string(snapshot)?;
        lock(&self.db)?.kv_set(CACHE_KEY, &raw)
    }
}
