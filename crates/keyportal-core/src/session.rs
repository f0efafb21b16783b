//! Session tracking.
//!
//! The tracker owns the current [`Principal`] and publishes every change on a
//! `tokio::sync::watch` channel. Consumers hold a [`SessionWatch`] and always
//! act on the latest state; intermediate states may be coalesced.
//!
//! ```text
//! Loading ──bootstrap──▶ Authenticated ◀──sign_in / sign_up──┐
//!    │                        │                              │
//!    └──────bootstrap──▶ Anonymous ◀──────sign_out───────────┘
//! ```
//!
//! `Loading` is only ever the initial state.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::AuthError;
use crate::identity::IdentityProvider;
use crate::principal::Principal;

/// The session as seen by consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Bootstrap has not resolved yet.
    Loading,
    /// A principal is signed in.
    Authenticated(Principal),
    /// Nobody is signed in.
    Anonymous,
}

impl SessionState {
    /// The signed-in principal, if any.
    #[must_use]
    pub fn principal(&self) -> Option<&Principal> {
        match self {
            Self::Authenticated(p) => Some(p),
            Self::Loading | Self::Anonymous => None,
        }
    }
}

/// A subscription to session changes.
#[derive(Debug, Clone)]
pub struct SessionWatch {
    rx: watch::Receiver<SessionState>,
}

impl SessionWatch {
    /// The latest published state.
    #[must_use]
    pub fn current(&self) -> SessionState {
        self.rx.borrow().clone()
    }

    /// Wait for the next state change and return it.
    ///
    /// Returns `None` once the tracker has been dropped.
    pub async fn next(&mut self) -> Option<SessionState> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}

/// Tracks the signed-in principal for one process.
pub struct SessionTracker {
    provider: Arc<dyn IdentityProvider>,
    state: watch::Sender<SessionState>,
}

impl SessionTracker {
    /// Create a tracker in the `Loading` state.
    #[must_use]
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        let (state, _) = watch::channel(SessionState::Loading);
        Self { provider, state }
    }

    /// Subscribe to session changes.
    #[must_use]
    pub fn observe(&self) -> SessionWatch {
        SessionWatch {
            rx: self.state.subscribe(),
        }
    }

    /// The latest state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// The signed-in principal, if any.
    #[must_use]
    pub fn principal(&self) -> Option<Principal> {
        self.state.borrow().principal().cloned()
    }

    /// Resolve the initial `Loading` state from the provider's persisted
    /// session. A provider error resolves to `Anonymous`.
    ///
    /// Does nothing once the state has left `Loading`.
    pub async fn bootstrap(&self) -> SessionState {
        if *self.state.borrow() != SessionState::Loading {
            return self.state();
        }

        let resolved = match self.provider.current().await {
            Ok(Some(principal)) => {
                info!(principal_id = %principal.id, "restored session");
                SessionState::Authenticated(principal)
            }
            Ok(None) => SessionState::Anonymous,
            Err(e) => {
                warn!(error = %e, "session bootstrap failed, continuing signed out");
                SessionState::Anonymous
            }
        };

        // A sign-in that completed while bootstrap was in flight wins.
        self.state.send_if_modified(|state| {
            if *state == SessionState::Loading {
                *state = resolved;
                true
            } else {
                false
            }
        });
        self.state()
    }

    /// Create an account and sign it in.
    ///
    /// The tracker has no access to the entitlement cache, so this does not
    /// seed the new account's "no key issued" entry. Use
    /// [`Portal::sign_up`](crate::portal::Portal::sign_up), which does, unless
    /// the caller seeds the cache itself.
    ///
    /// # Errors
    ///
    /// Returns the provider's [`AuthError`] unchanged.
    pub async fn sign_up(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<Principal, AuthError> {
        let principal = self.provider.sign_up(name, email, password).await?;
        info!(principal_id = %principal.id, "account created");
        self.state
            .send_replace(SessionState::Authenticated(principal.clone()));
        Ok(principal)
    }

    /// Sign in to an existing account.
    ///
    /// # Errors
    ///
    /// Returns the provider's [`AuthError`] unchanged.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Principal, AuthError> {
        let principal = self.provider.sign_in(email, password).await?;
        info!(principal_id = %principal.id, "signed in");
        self.state
            .send_replace(SessionState::Authenticated(principal.clone()));
        Ok(principal)
    }

    /// End the session. The local state becomes `Anonymous` before the
    /// provider is asked; a provider failure is logged and otherwise ignored.
    pub async fn sign_out(&self) {
        let previous = self.state.send_replace(SessionState::Anonymous);
        if let Some(p) = previous.principal() {
            info!(principal_id = %p.id, "signed out");
        }
        if let Err(e) = self.provider.sign_out().await {
            warn!(error = %e, "provider sign-out failed, session ended locally");
        }
    }
}

impl std::fmt::Debug for SessionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTracker")
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}
