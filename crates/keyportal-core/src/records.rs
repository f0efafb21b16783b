//! Remote per-user record store.
//!
//! Each principal has one record in the `users` collection, keyed by
//! principal id. The store is the intended source of truth for whether an API
//! key has been issued, but every call may fail; the reconciler never lets
//! those failures reach the user.
//!
//! "No such record" is `Ok(None)` and must never be reported as an error.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::RecordStoreError;
use crate::principal::Principal;

/// The stored user record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub email: Option<String>,
    pub name: Option<String>,
    pub has_generated_api_key: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub api_key_updated_at: Option<DateTime<Utc>>,
}

/// A partial update. `None` fields are left untouched by
/// [`RecordStore::merge`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordPatch {
    pub email: Option<String>,
    pub name: Option<String>,
    pub has_generated_api_key: Option<bool>,
    pub created_at: Option<DateTime<Utc>>,
    pub api_key_updated_at: Option<DateTime<Utc>>,
}

impl RecordPatch {
    /// Patch that flips the has-key flag and refreshes its timestamp.
    #[must_use]
    pub fn entitlement(has_key: bool, now: DateTime<Utc>) -> Self {
        Self {
            has_generated_api_key: Some(has_key),
            api_key_updated_at: Some(now),
            ..Self::default()
        }
    }

    /// Patch that creates a first record for `principal`.
    #[must_use]
    pub fn new_user(principal: &Principal, has_key: bool, now: DateTime<Utc>) -> Self {
        Self {
            email: Some(principal.email.clone()),
            name: principal.display_name.clone(),
            has_generated_api_key: Some(has_key),
            created_at: Some(now),
            api_key_updated_at: None,
        }
    }

    /// Apply this patch on top of `record`.
    pub fn apply(&self, record: &mut UserRecord) {
        if let Some(email) = &self.email {
            record.email = Some(email.clone());
        }
        if let Some(name) = &self.name {
            record.name = Some(name.clone());
        }
        if let Some(has_key) = self.has_generated_api_key {
            record.has_generated_api_key = has_key;
        }
        if let Some(at) = self.created_at {
            record.created_at = Some(at);
        }
        if let Some(at) = self.api_key_updated_at {
            record.api_key_updated_at = Some(at);
        }
    }

    /// Names of the fields this patch sets, in wire spelling.
    #[must_use]
    pub fn field_paths(&self) -> Vec<&'static str> {
        let mut paths = Vec::new();
        if self.email.is_some() {
            paths.push("email");
        }
        if self.name.is_some() {
            paths.push("name");
        }
        if self.has_generated_api_key.is_some() {
            paths.push("hasGeneratedApiKey");
        }
        if self.created_at.is_some() {
            paths.push("createdAt");
        }
        if self.api_key_updated_at.is_some() {
            paths.push("apiKeyUpdatedAt");
        }
        paths
    }
}

/// A remote store of [`UserRecord`]s.
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync + 'static {
    /// Read the record for `principal_id`. `Ok(None)` if it does not exist.
    ///
    /// # Errors
    ///
    /// Any [`RecordStoreError`]; never used to signal absence.
    async fn get(&self, principal_id: &str) -> Result<Option<UserRecord>, RecordStoreError>;

    /// Set-with-merge: create the record if missing, then apply `patch`.
    ///
    /// # Errors
    ///
    /// Any [`RecordStoreError`].
    async fn merge(&self, principal_id: &str, patch: RecordPatch) -> Result<(), RecordStoreError>;

    /// Cheap connectivity check.
    ///
    /// # Errors
    ///
    /// Any [`RecordStoreError`]. `PermissionDenied` still proves the store
    /// answered.
    async fn probe(&self) -> Result<(), RecordStoreError> {
        Ok(())
    }
}

/// How a [`MemoryRecordStore`] should misbehave.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailureMode {
    /// Every call succeeds.
    #[default]
    Healthy,
    /// Every call fails with `NotReachable`.
    Offline,
    /// Every call fails with `PermissionDenied`.
    PermissionDenied,
    /// Reads succeed; writes fail with `PermissionDenied`.
    ReadOnly,
}

/// In-memory record store with failure injection.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: RwLock<HashMap<String, UserRecord>>,
    mode: RwLock<FailureMode>,
    writes: AtomicUsize,
}

impl MemoryRecordStore {
    /// Create an empty, healthy store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Change how the store behaves from now on.
    pub async fn set_failure_mode(&self, mode: FailureMode) {
        *self.mode.write().await = mode;
    }

    /// Read a record directly, bypassing failure injection.
    pub async fn record(&self, principal_id: &str) -> Option<UserRecord> {
        self.records.read().await.get(principal_id).cloned()
    }

    /// Number of records held.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Number of successful merges so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    async fn check(&self, write: bool) -> Result<(), RecordStoreError> {
        match *self.mode.read().await {
            FailureMode::Healthy => Ok(()),
            FailureMode::ReadOnly if !write => Ok(()),
            FailureMode::Offline => Err(RecordStoreError::NotReachable {
                reason: "memory record store is offline".to_owned(),
            }),
            FailureMode::PermissionDenied | FailureMode::ReadOnly => {
                Err(RecordStoreError::PermissionDenied {
                    reason: "memory record store denied access".to_owned(),
                })
            }
        }
    }
}

#[async_trait::async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get(&self, principal_id: &str) -> Result<Option<UserRecord>, RecordStoreError> {
        self.check(false).await?;
        Ok(self.records.read().await.get(principal_id).cloned())
    }

    async fn merge(&self, principal_id: &str, patch: RecordPatch) -> Result<(), RecordStoreError> {
        self.check(true).await?;
        let mut records = self.records.write().await;
        patch.apply(records.entry(principal_id.to_owned()).or_default());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn probe(&self) -> Result<(), RecordStoreError> {
        self.check(false).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn absent_record_is_none_not_error() {
        let store = MemoryRecordStore::new();
        assert_eq!(store.get("u1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn merge_only_touches_patched_fields() {
        let store = MemoryRecordStore::new();
        let principal = Principal::new("u1", Some("Alice".to_owned()), "a@x.com");
        let created = Utc::now();
        store
            .merge("u1", RecordPatch::new_user(&principal, false, created))
            .await
            .unwrap();
        store
            .merge("u1", RecordPatch::entitlement(true, Utc::now()))
            .await
            .unwrap();

        let record = store.get("u1").await.unwrap().unwrap();
        assert!(record.has_generated_api_key);
        assert_eq!(record.email.as_deref(), Some("a@x.com"));
        assert_eq!(record.name.as_deref(), Some("Alice"));
        assert_eq!(record.created_at, Some(created));
        assert!(record.api_key_updated_at.is_some());
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn read_only_mode_allows_reads() {
        let store = MemoryRecordStore::new();
        store.set_failure_mode(FailureMode::ReadOnly).await;
        assert!(store.get("u1").await.is_ok());
        assert!(matches!(
            store.merge("u1", RecordPatch::entitlement(true, Utc::now())).await,
            Err(RecordStoreError::PermissionDenied { .. })
        ));
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn offline_mode_is_not_reachable() {
        let store = MemoryRecordStore::new();
        store.set_failure_mode(FailureMode::Offline).await;
        assert!(matches!(
            store.get("u1").await,
            Err(RecordStoreError::NotReachable { .. })
        ));
        assert!(store.probe().await.is_err());
    }

    #[test]
    fn field_paths_follow_patch_contents() {
        let patch = RecordPatch::entitlement(false, Utc::now());
        assert_eq!(patch.field_paths(), vec!["hasGeneratedApiKey", "apiKeyUpdatedAt"]);
        assert!(RecordPatch::default().field_paths().is_empty());
    }
}
