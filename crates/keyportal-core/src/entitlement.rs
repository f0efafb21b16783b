//! Entitlement reconciliation.
//!
//! The has-key flag has two copies: the remote record (source of truth, may
//! be unreachable) and the local cache (always reachable). The reconciler
//! reads and writes both and reports a `degraded` flag whenever the remote
//! side could not be used. Remote failures are logged here and never
//! propagated.
//!
//! After a reconciliation that reached the record store, the cache holds the
//! same value as the record. While the store is unreachable the cache is
//! authoritative.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::cache::EntitlementCache;
use crate::principal::Principal;
use crate::records::{RecordPatch, RecordStore};

/// What the caller should render for a principal's entitlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntitlementView {
    /// Whether the account has been issued its API key.
    pub has_issued_key: bool,
    /// Whether the record store was unusable for this result.
    pub degraded: bool,
}

/// Reconciles the has-key flag between the record store and the local cache.
pub struct EntitlementReconciler {
    records: Arc<dyn RecordStore>,
    cache: EntitlementCache,
    views: RwLock<HashMap<String, EntitlementView>>,
    degraded: AtomicBool,
}

impl EntitlementReconciler {
    /// Create a reconciler over a record store and a local cache.
    #[must_use]
    pub fn new(records: Arc<dyn RecordStore>, cache: EntitlementCache) -> Self {
        Self {
            records,
            cache,
            views: RwLock::new(HashMap::new()),
            degraded: AtomicBool::new(false),
        }
    }

    /// Load the entitlement for `principal`.
    ///
    /// - Record found: copy it into the cache, `degraded = false`.
    /// - Record absent: create it, seeded from the cache (or `false`);
    ///   `degraded` is whether that create failed.
    /// - Store failed: use the cache (or `false`), `degraded = true`.
    pub async fn load_entitlement(&self, principal: &Principal) -> EntitlementView {
        let id = principal.id.as_str();
        let cached = self.cache.read(id).await;

        let view = match self.records.get(id).await {
            Ok(Some(record)) => {
                self.write_cache(id, record.has_generated_api_key).await;
                EntitlementView {
                    has_issued_key: record.has_generated_api_key,
                    degraded: false,
                }
            }
            Ok(None) => {
                let seeded = cached.unwrap_or(false);
                let patch = RecordPatch::new_user(principal, seeded, Utc::now());
                let degraded = match self.records.merge(id, patch).await {
                    Ok(()) => {
                        debug!(principal_id = id, "created user record");
                        self.write_cache(id, seeded).await;
                        false
                    }
                    Err(e) => {
                        warn!(principal_id = id, error = %e, "could not create user record");
                        true
                    }
                };
                EntitlementView {
                    has_issued_key: seeded,
                    degraded,
                }
            }
            Err(e) => {
                warn!(
                    principal_id = id,
                    error = %e,
                    cached = ?cached,
                    "record store read failed, using local cache"
                );
                EntitlementView {
                    has_issued_key: cached.unwrap_or(false),
                    degraded: true,
                }
            }
        };

        self.remember(id, view).await;
        view
    }

    /// Set the flag for `principal_id`. The cache is written first; the
    /// record store second. Returns whether the record store write failed.
    /// A failed remote write does not roll back the cache.
    pub async fn set_entitlement(&self, principal_id: &str, has_key: bool) -> bool {
        self.write_cache(principal_id, has_key).await;

        let patch = RecordPatch::entitlement(has_key, Utc::now());
        let degraded = match self.records.merge(principal_id, patch).await {
            Ok(()) => false,
            Err(e) => {
                warn!(principal_id, has_key, error = %e, "record store write failed, kept local value");
                true
            }
        };

        self.remember(
            principal_id,
            EntitlementView {
                has_issued_key: has_key,
                degraded,
            },
        )
        .await;
        degraded
    }

    /// Seed the cache for a freshly created account.
    pub async fn seed_local(&self, principal_id: &str, has_key: bool) {
        self.write_cache(principal_id, has_key).await;
    }

    /// Last loaded or written view for `principal_id`.
    pub async fn current(&self, principal_id: &str) -> Option<EntitlementView> {
        self.views.read().await.get(principal_id).copied()
    }

    /// Drop the in-memory view for `principal_id`. The cache is kept.
    pub async fn forget(&self, principal_id: &str) {
        self.views.write().await.remove(principal_id);
    }

    /// Outcome of the most recent record store operation.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// Clear the degraded flag without touching any store.
    pub fn clear_degraded(&self) {
        self.degraded.store(false, Ordering::SeqCst);
    }

    async fn remember(&self, principal_id: &str, view: EntitlementView) {
        self.degraded.store(view.degraded, Ordering::SeqCst);
        self.views
            .write()
            .await
            .insert(principal_id.to_owned(), view);
    }

    async fn write_cache(&self, principal_id: &str, has_key: bool) {
        if let Err(e) = self.cache.write(principal_id, has_key).await {
            warn!(principal_id, error = %e, "local cache write failed");
        }
    }
}

impl std::fmt::Debug for EntitlementReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntitlementReconciler")
            .field("degraded", &self.is_degraded())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::records::{FailureMode, MemoryRecordStore, UserRecord};
    use keyportal_storage::{MemoryBackend, StorageBackend};

    struct Fixture {
        records: Arc<MemoryRecordStore>,
        backend: MemoryBackend,
        reconciler: EntitlementReconciler,
    }

    fn fixture() -> Fixture {
        let records = Arc::new(MemoryRecordStore::new());
        let backend = MemoryBackend::new();
        let reconciler = EntitlementReconciler::new(
            Arc::clone(&records) as Arc<dyn RecordStore>,
            EntitlementCache::new(Arc::new(backend.clone())),
        );
        Fixture {
            records,
            backend,
            reconciler,
        }
    }

    fn alice() -> Principal {
        Principal::new("u1", Some("Alice".to_owned()), "a@x.com")
    }

    #[tokio::test]
    async fn existing_record_overwrites_cache() {
        let f = fixture();
        f.records
            .merge("u1", RecordPatch::entitlement(true, Utc::now()))
            .await
            .unwrap();
        f.backend.put("apiKey_u1", b"false").await.unwrap();

        let view = f.reconciler.load_entitlement(&alice()).await;
        assert_eq!(
            view,
            EntitlementView {
                has_issued_key: true,
                degraded: false
            }
        );
        assert_eq!(f.backend.get("apiKey_u1").await.unwrap(), Some(b"true".to_vec()));
    }

    #[tokio::test]
    async fn absent_record_is_created_from_cache() {
        let f = fixture();
        f.backend.put("apiKey_u1", b"true").await.unwrap();

        let view = f.reconciler.load_entitlement(&alice()).await;
        assert!(view.has_issued_key);
        assert!(!view.degraded);

        let record: UserRecord = f.records.record("u1").await.unwrap();
        assert!(record.has_generated_api_key);
        assert_eq!(record.email.as_deref(), Some("a@x.com"));
        assert!(record.created_at.is_some());
    }

    #[tokio::test]
    async fn absent_record_and_failed_create_defaults_false() {
        let f = fixture();
        f.records.set_failure_mode(FailureMode::ReadOnly).await;

        let view = f.reconciler.load_entitlement(&alice()).await;
        assert_eq!(
            view,
            EntitlementView {
                has_issued_key: false,
                degraded: true
            }
        );
        assert!(f.reconciler.is_degraded());
    }

    #[tokio::test]
    async fn unreachable_store_falls_back_to_cache() {
        let f = fixture();
        f.backend.put("apiKey_u1", b"true").await.unwrap();
        f.records.set_failure_mode(FailureMode::Offline).await;

        let view = f.reconciler.load_entitlement(&alice()).await;
        assert!(view.has_issued_key);
        assert!(view.degraded);
    }

    #[tokio::test]
    async fn permission_denied_read_is_degraded_not_fatal() {
        let f = fixture();
        f.records
            .set_failure_mode(FailureMode::PermissionDenied)
            .await;
        let view = f.reconciler.load_entitlement(&alice()).await;
        assert!(!view.has_issued_key);
        assert!(view.degraded);
    }

    #[tokio::test]
    async fn failed_write_keeps_local_value() {
        let f = fixture();
        f.records.set_failure_mode(FailureMode::Offline).await;

        assert!(f.reconciler.set_entitlement("u1", true).await);
        assert_eq!(f.backend.get("apiKey_u1").await.unwrap(), Some(b"true".to_vec()));
        assert_eq!(
            f.reconciler.current("u1").await,
            Some(EntitlementView {
                has_issued_key: true,
                degraded: true
            })
        );
    }

    #[tokio::test]
    async fn degraded_flag_clears_on_next_success() {
        let f = fixture();
        f.records.set_failure_mode(FailureMode::Offline).await;
        f.reconciler.set_entitlement("u1", true).await;
        assert!(f.reconciler.is_degraded());

        f.records.set_failure_mode(FailureMode::Healthy).await;
        assert!(!f.reconciler.set_entitlement("u1", true).await);
        assert!(!f.reconciler.is_degraded());
    }

    #[tokio::test]
    async fn forget_drops_view_but_keeps_cache() {
        let f = fixture();
        f.reconciler.set_entitlement("u1", true).await;
        f.reconciler.forget("u1").await;
        assert_eq!(f.reconciler.current("u1").await, None);
        assert!(f.backend.exists("apiKey_u1").await.unwrap());
    }
}
