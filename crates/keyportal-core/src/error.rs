//! Error types for `keyportal-core`.
//!
//! Identity and issuance errors reach the caller as typed results. Record
//! store errors never do: the reconciler turns them into a `degraded` flag.
//! No variant ever carries API key material.

/// Errors from the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// Unknown email or wrong password.
    #[error("invalid email or password")]
    InvalidCredentials,

    /// An account with this email already exists.
    #[error("an account with this email already exists")]
    AccountExists,

    /// The provider could not be reached or is not configured.
    #[error("identity provider unavailable: {reason}")]
    ProviderUnavailable { reason: String },

    /// The provider refused the request for another reason (e.g. weak password).
    #[error("identity provider rejected the request: {code}")]
    Rejected { code: String },
}

/// Errors from the remote record store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordStoreError {
    /// Network failure, timeout, or the store is offline.
    #[error("record store not reachable: {reason}")]
    NotReachable { reason: String },

    /// The store answered but refused access.
    #[error("record store permission denied: {reason}")]
    PermissionDenied { reason: String },

    /// The store returned a body that could not be decoded.
    #[error("malformed record for '{principal_id}': {reason}")]
    Malformed {
        principal_id: String,
        reason: String,
    },

    /// Any other non-success response.
    #[error("record store rejected the request with HTTP {status}")]
    Rejected { status: u16 },
}

/// Errors from API key issuance.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IssuanceError {
    /// The account already holds its one API key.
    #[error("API key limit reached: delete the existing key before generating a new one")]
    LimitReached,

    /// The key generation service failed or returned an unusable body.
    #[error("key generation failed: {reason}")]
    UpstreamFailure { reason: String },

    /// The entitlement for this principal has not been loaded yet.
    #[error("entitlement for '{principal_id}' has not been loaded")]
    EntitlementNotLoaded { principal_id: String },

    /// No principal is signed in.
    #[error("not signed in")]
    NotSignedIn,
}
