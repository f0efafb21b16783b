//! Runtime configuration for the `keyportal` CLI.
//!
//! Loaded from `KEYPORTAL_*` environment variables with defaults suitable for
//! local development.

use std::path::PathBuf;
use std::time::Duration;

/// Where the local entitlement cache lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBackendType {
    /// In-memory, lost on exit.
    Memory,
    /// redb file on disk.
    Redb { path: PathBuf },
}

/// Which record store holds the user records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordsBackendType {
    /// Cloud Firestore.
    Firestore,
    /// In-memory, lost on exit. Every run starts with no remote record.
    Memory,
}

/// CLI configuration.
#[derive(Debug, Clone)]
pub struct PortalConfig {
    /// Key generation endpoint, called with `GET`.
    pub keygen_url: String,
    /// Firebase web API key.
    pub firebase_api_key: String,
    /// Firebase project id.
    pub firebase_project_id: String,
    /// Identity Toolkit base URL, when not the public endpoint.
    pub identity_url: Option<String>,
    /// Firestore base URL, when not the public endpoint.
    pub firestore_url: Option<String>,
    /// Local cache backend.
    pub cache: CacheBackendType,
    /// Record store backend.
    pub records: RecordsBackendType,
    /// Timeout applied to every HTTP request.
    pub http_timeout: Duration,
    /// Log filter used when `RUST_LOG` is unset.
    pub log_level: String,
}

impl PortalConfig {
    /// Load configuration from the environment.
    ///
    /// - `KEYPORTAL_KEYGEN_URL`: key generator (default: `http://127.0.0.1:8787/keygen`)
    /// - `KEYPORTAL_FIREBASE_API_KEY`: Firebase web API key (default: empty)
    /// - `KEYPORTAL_FIREBASE_PROJECT_ID`: Firebase project id (default: empty)
    /// - `KEYPORTAL_FIREBASE_IDENTITY_URL`: Identity Toolkit base URL (default: public endpoint)
    /// - `KEYPORTAL_FIRESTORE_URL`: Firestore base URL (default: public endpoint)
    /// - `KEYPORTAL_CACHE`: `redb` or `memory` (default: `redb`)
    /// - `KEYPORTAL_CACHE_PATH`: redb file (default: `./.keyportal/cache.redb`)
    /// - `KEYPORTAL_RECORDS`: `firestore` or `memory` (default: `firestore`)
    /// - `KEYPORTAL_HTTP_TIMEOUT_SECS`: request timeout (default: `10`)
    /// - `KEYPORTAL_LOG_LEVEL`: log filter (default: `warn`)
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which returns a variable's value.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let keygen_url = lookup("KEYPORTAL_KEYGEN_URL")
            .unwrap_or_else(|| "http://127.0.0.1:8787/keygen".to_owned());

        let cache_path = lookup("KEYPORTAL_CACHE_PATH")
            .map_or_else(|| PathBuf::from("./.keyportal/cache.redb"), PathBuf::from);

        let cache = match lookup("KEYPORTAL_CACHE")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "memory" => CacheBackendType::Memory,
            _ => CacheBackendType::Redb { path: cache_path },
        };

        let records = match lookup("KEYPORTAL_RECORDS")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "memory" => RecordsBackendType::Memory,
            _ => RecordsBackendType::Firestore,
        };

        let http_timeout = lookup("KEYPORTAL_HTTP_TIMEOUT_SECS")
            .and_then(|v| v.parse().ok())
            .filter(|secs: &u64| *secs > 0)
            .map_or(Duration::from_secs(10), Duration::from_secs);

        Self {
            keygen_url,
            firebase_api_key: lookup("KEYPORTAL_FIREBASE_API_KEY").unwrap_or_default(),
            firebase_project_id: lookup("KEYPORTAL_FIREBASE_PROJECT_ID").unwrap_or_default(),
            identity_url: lookup("KEYPORTAL_FIREBASE_IDENTITY_URL").filter(|v| !v.is_empty()),
            firestore_url: lookup("KEYPORTAL_FIRESTORE_URL").filter(|v| !v.is_empty()),
            cache,
            records,
            http_timeout,
            log_level: lookup("KEYPORTAL_LOG_LEVEL").unwrap_or_else(|| "warn".to_owned()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> PortalConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        PortalConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults() {
        let config = load(&[]);
        assert_eq!(config.keygen_url, "http://127.0.0.1:8787/keygen");
        assert_eq!(
            config.cache,
            CacheBackendType::Redb {
                path: PathBuf::from("./.keyportal/cache.redb")
            }
        );
        assert_eq!(config.records, RecordsBackendType::Firestore);
        assert_eq!(config.http_timeout, Duration::from_secs(10));
        assert_eq!(config.log_level, "warn");
        assert_eq!(config.identity_url, None);
        assert_eq!(config.firestore_url, None);
    }

    #[test]
    fn overrides() {
        let config = load(&[
            ("KEYPORTAL_CACHE", "Memory"),
            ("KEYPORTAL_RECORDS", "memory"),
            ("KEYPORTAL_HTTP_TIMEOUT_SECS", "3"),
            ("KEYPORTAL_FIREBASE_PROJECT_ID", "demo"),
            ("KEYPORTAL_FIREBASE_IDENTITY_URL", "http://127.0.0.1:9099"),
            ("KEYPORTAL_FIRESTORE_URL", ""),
        ]);
        assert_eq!(config.cache, CacheBackendType::Memory);
        assert_eq!(config.records, RecordsBackendType::Memory);
        assert_eq!(config.http_timeout, Duration::from_secs(3));
        assert_eq!(config.firebase_project_id, "demo");
        assert_eq!(config.identity_url.as_deref(), Some("http://127.0.0.1:9099"));
        assert_eq!(config.firestore_url, None);
    }

    #[test]
    fn zero_or_garbage_timeout_falls_back() {
        assert_eq!(
            load(&[("KEYPORTAL_HTTP_TIMEOUT_SECS", "0")]).http_timeout,
            Duration::from_secs(10)
        );
        assert_eq!(
            load(&[("KEYPORTAL_HTTP_TIMEOUT_SECS", "soon")]).http_timeout,
            Duration::from_secs(10)
        );
    }
}
