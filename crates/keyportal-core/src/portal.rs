//! The account session and entitlement store for one process.
//!
//! [`Portal`] wires the session tracker, entitlement reconciler and issuance
//! gateway together and applies the rules that span them. A new account's
//! cache entry is seeded before sign-up returns. Every sign-in, sign-up or
//! restored session reconciles the entitlement. Sign-out wipes key material
//! before anything else, and entitlement operations act on the signed-in
//! principal only.

use std::sync::Arc;

use keyportal_storage::StorageBackend;
use tracing::{debug, info, warn};

use crate::cache::EntitlementCache;
use crate::entitlement::{EntitlementReconciler, EntitlementView};
use crate::error::{AuthError, IssuanceError, RecordStoreError};
use crate::identity::IdentityProvider;
use crate::issuance::{KeyGenerator, KeyIssuanceGateway, KeyMaterial};
use crate::principal::Principal;
use crate::records::RecordStore;
use crate::session::{SessionState, SessionTracker, SessionWatch};

/// Status of one remote collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceStatus {
    /// Reachable and working.
    Connected,
    /// Reachable, but the last entitlement operation had to fall back to the
    /// local cache.
    Degraded,
    /// Not reachable or not configured.
    Unavailable(String),
}

/// Result of [`Portal::health`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    pub identity: ServiceStatus,
    pub records: ServiceStatus,
}

/// Session, entitlement and key issuance for one process.
pub struct Portal {
    identity: Arc<dyn IdentityProvider>,
    records: Arc<dyn RecordStore>,
    session: SessionTracker,
    reconciler: Arc<EntitlementReconciler>,
    gateway: KeyIssuanceGateway,
}

impl Portal {
    /// Build a portal from its collaborators. The session starts `Loading`;
    /// call [`bootstrap`](Portal::bootstrap) to resolve it.
    #[must_use]
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        records: Arc<dyn RecordStore>,
        cache: Arc<dyn StorageBackend>,
        generator: Arc<dyn KeyGenerator>,
    ) -> Self {
        let reconciler = Arc::new(EntitlementReconciler::new(
            Arc::clone(&records),
            EntitlementCache::new(cache),
        ));
        Self {
            session: SessionTracker::new(Arc::clone(&identity)),
            gateway: KeyIssuanceGateway::new(Arc::clone(&reconciler), generator),
            identity,
            records,
            reconciler,
        }
    }

    /// Subscribe to session changes.
    #[must_use]
    pub fn observe_session(&self) -> SessionWatch {
        self.session.observe()
    }

    /// Resolve the initial session and, if someone is signed in, load their
    /// entitlement.
    pub async fn bootstrap(&self) -> SessionState {
        let state = self.session.bootstrap().await;
        if let Some(principal) = state.principal() {
            self.reconciler.load_entitlement(principal).await;
        }
        state
    }

    /// The signed-in principal, if any.
    #[must_use]
    pub fn principal(&self) -> Option<Principal> {
        self.session.principal()
    }

    /// Create an account and load its entitlement. The local cache records
    /// "no key issued" for it before the load.
    ///
    /// # Errors
    ///
    /// The identity provider's [`AuthError`].
    pub async fn sign_up(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<Principal, AuthError> {
        self.gateway.discard().await;
        let previous = self.session.principal();
        let principal = self.session.sign_up(name, email, password).await?;
        self.reconciler.seed_local(&principal.id, false).await;
        self.switch_to(previous, &principal).await;
        Ok(principal)
    }

    /// Sign in to an existing account and load its entitlement.
    ///
    /// # Errors
    ///
    /// The identity provider's [`AuthError`].
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Principal, AuthError> {
        self.gateway.discard().await;
        let previous = self.session.principal();
        let principal = self.session.sign_in(email, password).await?;
        self.switch_to(previous, &principal).await;
        Ok(principal)
    }

    /// Drop what belonged to the previous principal, then reconcile the new
    /// one so issuance works as soon as the session reads `Authenticated`.
    async fn switch_to(&self, previous: Option<Principal>, principal: &Principal) {
        if let Some(previous) = previous.filter(|p| p.id != principal.id) {
            debug!(from = %previous.id, to = %principal.id, "principal replaced");
            self.reconciler.forget(&previous.id).await;
        }
        self.reconciler.clear_degraded();
        self.reconciler.load_entitlement(principal).await;
    }

    /// Sign out. Key material and the in-memory entitlement are dropped
    /// first; the session ends locally even if the provider fails.
    pub async fn sign_out(&self) {
        self.gateway.discard().await;
        if let Some(principal) = self.session.principal() {
            self.reconciler.forget(&principal.id).await;
        }
        self.reconciler.clear_degraded();
        self.session.sign_out().await;
    }

    /// Load the signed-in principal's entitlement. `None` when signed out.
    pub async fn load_entitlement(&self) -> Option<EntitlementView> {
        let principal = self.session.principal()?;
        Some(self.reconciler.load_entitlement(&principal).await)
    }

    /// Last loaded entitlement of the signed-in principal.
    pub async fn entitlement(&self) -> Option<EntitlementView> {
        let principal = self.session.principal()?;
        self.reconciler.current(&principal.id).await
    }

    /// Set the signed-in principal's has-key flag. Returns whether the record
    /// store write failed, or `None` when signed out.
    pub async fn set_entitlement(&self, has_key: bool) -> Option<bool> {
        let principal = self.session.principal()?;
        Some(self.reconciler.set_entitlement(&principal.id, has_key).await)
    }

    /// Issue the signed-in principal's API key.
    ///
    /// # Errors
    ///
    /// [`IssuanceError::NotSignedIn`], or any error from
    /// [`KeyIssuanceGateway::issue_key`].
    pub async fn issue_key(&self) -> Result<KeyMaterial, IssuanceError> {
        let principal = self.session.principal().ok_or(IssuanceError::NotSignedIn)?;
        self.gateway.issue_key(&principal.id).await
    }

    /// Delete the signed-in principal's API key.
    ///
    /// # Errors
    ///
    /// [`IssuanceError::NotSignedIn`] when nobody is signed in.
    pub async fn delete_key(&self) -> Result<(), IssuanceError> {
        let principal = self.session.principal().ok_or(IssuanceError::NotSignedIn)?;
        self.gateway.delete_key(&principal.id).await
    }

    /// Whether the last record store operation fell back to the local cache.
    pub fn is_degraded(&self) -> bool {
        self.reconciler.is_degraded()
    }

    /// Whether freshly issued key material is still held in memory.
    pub async fn holds_key(&self) -> bool {
        self.gateway.holds_key().await
    }

    /// Probe the identity provider and the record store.
    ///
    /// A permission error from the record store still proves it is
    /// reachable.
    pub async fn health(&self) -> HealthReport {
        let identity = match self.identity.probe().await {
            Ok(()) => ServiceStatus::Connected,
            Err(e) => {
                warn!(error = %e, "identity provider probe failed");
                ServiceStatus::Unavailable(e.to_string())
            }
        };

        let records = match self.records.probe().await {
            Ok(()) | Err(RecordStoreError::PermissionDenied { .. }) => {
                if self.reconciler.is_degraded() {
                    ServiceStatus::Degraded
                } else {
                    ServiceStatus::Connected
                }
            }
            Err(e) => {
                warn!(error = %e, "record store probe failed");
                ServiceStatus::Unavailable(e.to_string())
            }
        };

        info!(identity = ?identity, records = ?records, "health checked");
        HealthReport { identity, records }
    }
}

impl std::fmt::Debug for Portal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Portal")
            .field("session", &self.session)
            .field("degraded", &self.is_degraded())
            .finish_non_exhaustive()
    }
}
