//! Identity provider abstraction.
//!
//! The session tracker talks to any email/password identity service through
//! [`IdentityProvider`]. [`MemoryIdentity`] keeps accounts in process memory
//! and is used by tests and offline runs; the Firebase implementation lives in
//! [`crate::firebase`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::RwLock;

use crate::error::AuthError;
use crate::principal::Principal;

/// An email/password identity service.
#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync + 'static {
    /// Create an account, set its display name, and sign it in.
    ///
    /// # Errors
    ///
    /// [`AuthError::AccountExists`] if the email is taken, or any other
    /// [`AuthError`] the provider reports.
    async fn sign_up(&self, name: &str, email: &str, password: &str)
    -> Result<Principal, AuthError>;

    /// Sign in to an existing account.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidCredentials`] on a bad email/password pair.
    async fn sign_in(&self, email: &str, password: &str) -> Result<Principal, AuthError>;

    /// End the provider-side session.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthError`] if the provider could not confirm sign-out.
    async fn sign_out(&self) -> Result<(), AuthError>;

    /// The session the provider already holds, if any. Called once while the
    /// session tracker bootstraps.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthError`] if the provider cannot be queried.
    async fn current(&self) -> Result<Option<Principal>, AuthError>;

    /// Check that the provider is configured and reachable.
    ///
    /// # Errors
    ///
    /// [`AuthError::ProviderUnavailable`] describing what is wrong.
    async fn probe(&self) -> Result<(), AuthError> {
        Ok(())
    }
}

/// Supplies a bearer token for calls made on behalf of the signed-in user.
#[async_trait::async_trait]
pub trait BearerToken: Send + Sync + 'static {
    /// The current token, or `None` when nobody is signed in.
    async fn bearer_token(&self) -> Option<String>;
}

struct Account {
    principal: Principal,
    password: String,
}

/// In-memory identity provider.
///
/// Accounts are keyed by email. [`set_offline`](MemoryIdentity::set_offline)
/// makes every call fail with [`AuthError::ProviderUnavailable`].
#[derive(Default)]
pub struct MemoryIdentity {
    accounts: RwLock<HashMap<String, Account>>,
    current: RwLock<Option<Principal>>,
    offline: AtomicBool,
}

impl MemoryIdentity {
    /// Create a provider with no accounts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a provider that already holds a signed-in session, as if one
    /// had been persisted by an earlier run.
    #[must_use]
    pub fn with_session(principal: Principal) -> Self {
        Self {
            current: RwLock::new(Some(principal)),
            ..Self::default()
        }
    }

    /// Simulate the provider going offline or coming back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> Result<(), AuthError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(AuthError::ProviderUnavailable {
                reason: "memory identity provider is offline".to_owned(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for MemoryIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryIdentity")
            .field("offline", &self.offline.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl IdentityProvider for MemoryIdentity {
    async fn sign_up(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<Principal, AuthError> {
        self.ensure_online()?;
        let mut accounts = self.accounts.write().await;
        if accounts.contains_key(email) {
            return Err(AuthError::AccountExists);
        }
        let principal = Principal::new(
            uuid::Uuid::new_v4().simple().to_string(),
            Some(name.to_owned()),
            email,
        );
        accounts.insert(
            email.to_owned(),
            Account {
                principal: principal.clone(),
                password: password.to_owned(),
            },
        );
        *self.current.write().await = Some(principal.clone());
        Ok(principal)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Principal, AuthError> {
        self.ensure_online()?;
        let accounts = self.accounts.read().await;
        let principal = accounts
            .get(email)
            .filter(|a| a.password == password)
            .map(|a| a.principal.clone())
            .ok_or(AuthError::InvalidCredentials)?;
        *self.current.write().await = Some(principal.clone());
        Ok(principal)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.ensure_online()?;
        *self.current.write().await = None;
        Ok(())
    }

    async fn current(&self) -> Result<Option<Principal>, AuthError> {
        self.ensure_online()?;
        Ok(self.current.read().await.clone())
    }

    async fn probe(&self) -> Result<(), AuthError> {
        self.ensure_online()
    }
}
