//! Firebase REST collaborators.
//!
//! - [`FirebaseIdentity`]: email/password accounts via the Identity Toolkit
//!   REST API.
//! - [`FirestoreRecords`]: the `users` collection via the Firestore REST API,
//!   authenticated with the signed-in user's ID token.
//!
//! Both take their base URLs from [`FirebaseConfig`] so tests can point them
//! at a local server.

mod firestore;
mod identity;

use std::time::Duration;

pub use firestore::FirestoreRecords;
pub use identity::{FirebaseIdentity, map_auth_error_code};

/// Identity Toolkit REST base URL.
pub const DEFAULT_IDENTITY_URL: &str = "https://identitytoolkit.googleapis.com/v1";

/// Firestore REST base URL.
pub const DEFAULT_FIRESTORE_URL: &str = "https://firestore.googleapis.com/v1";

/// Connection settings for a Firebase project.
#[derive(Debug, Clone)]
pub struct FirebaseConfig {
    /// Web API key of the project.
    pub api_key: String,
    /// Project id (used in Firestore document paths).
    pub project_id: String,
    /// Identity Toolkit base URL.
    pub identity_url: String,
    /// Firestore base URL.
    pub firestore_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl FirebaseConfig {
    /// Settings for the public Firebase endpoints.
    #[must_use]
    pub fn new(api_key: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            project_id: project_id.into(),
            identity_url: DEFAULT_IDENTITY_URL.to_owned(),
            firestore_url: DEFAULT_FIRESTORE_URL.to_owned(),
            timeout: crate::keygen::DEFAULT_TIMEOUT,
        }
    }
}

fn http_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("keyportal/", env!("CARGO_PKG_VERSION")))
        .build()
}
