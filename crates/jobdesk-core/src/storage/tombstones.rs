//! Ids recorded as deleted, scoped per entity kind.
//!
//! A tombstone overrides whatever either store reports for that id, so a
//! delete that never reached the remote store still hides the row.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use crate::error::StorageError;
use crate::schema::EntityKind;

use super::{lock, SharedDb};

/// Fixed kv key of the tombstone document.
pub const TOMBSTONES_KEY: &str = "jobdesk.tombstones.v1";

type Ids = BTreeMap<String, BTreeSet<String>>;

pub struct TombstoneSet {
    db: SharedDb,
    ids: Mutex<Ids>,
}

impl TombstoneSet {
    pub fn open(db: SharedDb) -> Result<Self, StorageError> {
        let raw = lock(&db)?.kv_get(TOMBSTONES_KEY)?;
        let ids = match raw {
            Some(raw) => serde_json::from_str(&raw).map_err(|source| StorageError::Corrupt {
                key: TOMBSTONES_KEY.to_string(),
                source,
            })?,
            None => Ids::new(),
        };
        Ok(Self {
            db,
            ids: Mutex::new(ids),
        })
    }

    pub fn contains(&self, kind: EntityKind, id: &str) -> Result<bool, StorageError> {
        let ids = lock(&self.ids)?;
        Ok(ids.get(kind.table()).is_some_and(|set| set.contains(id)))
    }

    /// Snapshot of the tombstoned ids for `kind`.
    pub fn ids(&self, kind: EntityKind) -> Result<BTreeSet<String>, StorageError> {
        let ids = lock(&self.ids)?;
        Ok(ids.get(kind.table()).cloned().unwrap_or_default())
    }

    pub fn insert(&self, kind: EntityKind, new_ids: &BTreeSet<String>) -> Result<(), StorageError> {
        if new_ids.is_empty() {
            return Ok(());
        }
        let mut ids = lock(&self.ids)?;
        ids.entry(kind.table().to_string())
            .or_default()
            .extend(new_ids.iter().cloned());
        self.persist(&ids)
    }

    /// Lift the tombstone on `id`. Returns whether one was present.
    pub fn clear(&self, kind: EntityKind, id: &str) -> Result<bool, StorageError> {
        let mut ids = lock(&self.ids)?;
        let removed = ids
            .get_mut(kind.table())
            .is_some_and(|set| set.remove(id));
        if removed {
            self.persist(&ids)?;
        }
        Ok(removed)
    }

    fn persist(&self, ids: &Ids) -> Result<(), StorageError> {
        let raw = serde_json::to_string(ids)?;
        lock(&self.db)?.kv_set(TOMBSTONES_KEY, &raw)
    }
}
