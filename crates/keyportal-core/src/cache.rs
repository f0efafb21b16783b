//! Local cache copy of the has-key flag.
//!
//! Stored as `apiKey_<principal id>` → `"true"` / `"false"` in any
//! [`StorageBackend`].

use std::sync::Arc;

use keyportal_storage::{StorageBackend, StorageError};
use tracing::warn;

/// Prefix of every entitlement cache key.
pub const CACHE_KEY_PREFIX: &str = "apiKey_";

/// Cache key for a principal.
#[must_use]
pub fn cache_key(principal_id: &str) -> String {
    format!("{CACHE_KEY_PREFIX}{principal_id}")
}

/// Typed view over the local cache.
#[derive(Clone)]
pub struct EntitlementCache {
    backend: Arc<dyn StorageBackend>,
}

impl EntitlementCache {
    /// Wrap a storage backend.
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Cached flag for `principal_id`.
    ///
    /// Unreadable or unrecognised entries are logged and read as absent.
    pub async fn read(&self, principal_id: &str) -> Option<bool> {
        let key = cache_key(principal_id);
        match self.backend.get(&key).await {
            Ok(Some(raw)) => match raw.as_slice() {
                b"true" => Some(true),
                b"false" => Some(false),
                _ => {
                    warn!(principal_id, "ignoring unrecognised cache value");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(principal_id, error = %e, "local cache read failed");
                None
            }
        }
    }

    /// Store the flag for `principal_id`.
    ///
    /// # Errors
    ///
    /// Returns the backend's [`StorageError`].
    pub async fn write(&self, principal_id: &str, has_key: bool) -> Result<(), StorageError> {
        let value: &[u8] = if has_key { b"true" } else { b"false" };
        self.backend.put(&cache_key(principal_id), value).await
    }
}

impl std::fmt::Debug for EntitlementCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntitlementCache").finish_non_exhaustive()
    }
}
