//! Tenant identity resolution.
//!
//! The resolver asks a live [`SessionProvider`] first and falls back to the
//! identity cached from the last successful check, so offline launches keep
//! scoping data to the right tenant. It never invents an identity.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{RemoteError, StorageError};
use crate::storage::{lock, SharedDb};

const TENANT_KEY: &str = "jobdesk.tenant";

/// Source of the signed-in identity.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// `Ok(None)` when nobody is signed in.
    async fn current_identity(&self) -> Result<Option<String>, RemoteError>;
}

/// Fixed identity, used by tests and the CLI's `--tenant` flag.
#[derive(Debug, Clone, Default)]
pub struct StaticSession(pub Option<String>);

impl StaticSession {
    pub fn signed_in(identity: impl Into<String>) -> Self {
        Self(Some(identity.into()))
    }

    pub fn signed_out() -> Self {
        Self(None)
    }
}

#[async_trait]
impl SessionProvider for StaticSession {
    async fn current_identity(&self) -> Result<Option<String>, RemoteError> {
        Ok(self.0.clone())
    }
}

pub struct TenantResolver {
    session: Option<Arc<dyn SessionProvider>>,
    db: SharedDb,
    cached: Mutex<Option<String>>,
}

impl TenantResolver {
    /// Load the cached identity from `db`.
    pub fn open(db: SharedDb, session: Option<Arc<dyn SessionProvider>>) -> Result<Self, StorageError> {
        let cached = lock(&db)?.kv_get(TENANT_KEY)?;
        Ok(Self {
            session,
            db,
            cached: Mutex::new(cached),
        })
    }

    /// Current tenant: live session if it answers, else the cached one.
    pub async fn resolve(&self) -> Option<String> {
        if let Some(session) = &self.session {
            match session.current_identity().await {
                Ok(Some(identity)) => {
                    if self.cached().as_deref() != Some(identity.as_str()) {
                        if let Err(e) = self.cache(&identity) {
                            tracing::warn!(error = %e, "failed to cache tenant identity");
                        }
                    }
                    return Some(identity);
                }
                Ok(None) => tracing::debug!("no live session, using cached tenant"),
                Err(e) => tracing::warn!(error = %e, "session check failed, using cached tenant"),
            }
        }
        self.cached()
    }

    /// Last identity seen, without a session check.
    pub fn cached(&self) -> Option<String> {
        self.cached.lock().ok().and_then(|guard| guard.clone())
    }

    /// Remember `identity` as the last successful resolution.
    pub fn cache(&self, identity: &str) -> Result<(), StorageError> {
        lock(&self.db)?.kv_set(TENANT_KEY, identity)?;
        *lock(&self.cached)? = Some(identity.to_string());
        Ok(())
    }

    /// Forget the cached identity (sign-out).
    pub fn invalidate(&self) -> Result<(), StorageError> {
        lock(&self.db)?.kv_delete(TENANT_KEY)?;
        *lock(&self.cached)? = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;

    struct FailingSession;

    #[async_trait]
    impl SessionProvider for FailingSession {
        async fn current_identity(&self) -> Result<Option<String>, RemoteError> {
            Err(RemoteError::Http {
                status: 503,
                message: "unavailable".into(),
            })
        }
    }

    fn db() -> SharedDb {
        Database::open_memory().unwrap().shared()
    }

    #[tokio::test]
    async fn live_session_wins_and_is_cached() {
        let db = db();
        let resolver =
            TenantResolver::open(db.clone(), Some(Arc::new(StaticSession::signed_in("t1")))).unwrap();
        assert_eq!(resolver.resolve().await.as_deref(), Some("t1"));

        let offline = TenantResolver::open(db, None).unwrap();
        assert_eq!(offline.resolve().await.as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn failed_session_falls_back_to_cache() {
        let db = db();
        let resolver = TenantResolver::open(db, Some(Arc::new(FailingSession))).unwrap();
        assert_eq!(resolver.resolve().await, None);

        resolver.cache("t2").unwrap();
        assert_eq!(resolver.resolve().await.as_deref(), Some("t2"));
    }

    #[tokio::test]
    async fn invalidate_clears_cache() {
        let db = db();
        let resolver = TenantResolver::open(db.clone(), None).unwrap();
        resolver.cache("t3").unwrap();
        resolver.invalidate().unwrap();
        assert_eq!(resolver.resolve().await, None);
        assert_eq!(TenantResolver::open(db, None).unwrap().cached(), None);
    }

    #[tokio::test]
    async fn signed_out_session_uses_cache() {
        let db = db();
        let resolver =
            TenantResolver::open(db, Some(Arc::new(StaticSession::signed_out()))).unwrap();
        resolver.cache("t4").unwrap();
        assert_eq!(resolver.resolve().await.as_deref(), Some("t4"));
    }
}
