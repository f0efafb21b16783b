//! The signed-in user.

use serde::{Deserialize, Serialize};

/// Identity of the signed-in user.
///
/// Owned by the session tracker; every other component only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Stable unique identifier assigned by the identity provider.
    pub id: String,
    /// Display name, if the provider has one.
    pub display_name: Option<String>,
    /// Sign-in email.
    pub email: String,
}

impl Principal {
    /// Build a principal.
    #[must_use]
    pub fn new(id: impl Into<String>, display_name: Option<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name,
            email: email.into(),
        }
    }
}
