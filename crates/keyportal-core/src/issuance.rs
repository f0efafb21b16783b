//! API key issuance.
//!
//! Each account may hold exactly one API key. The gateway checks the loaded
//! entitlement before calling the key generator, records the issuance through
//! the reconciler, and hands the plaintext back exactly once. There is no way
//! to read a previously issued key back.
//!
//! # Security model
//!
//! - Key material is never written to the cache or the record store.
//! - At most one plaintext key is held in memory; it is zeroized on drop.
//! - `KeyMaterial`'s `Debug` output is redacted and it is never logged.
//! - The one-key limit is a client-side check only.

use std::fmt;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::entitlement::EntitlementReconciler;
use crate::error::IssuanceError;

/// Plaintext API key returned by the generator. No `PartialEq`: secrets are
/// not compared with a short-circuiting `==`.
#[derive(Clone)]
pub struct KeyMaterial(Zeroizing<String>);

impl KeyMaterial {
    /// Wrap a plaintext key.
    #[must_use]
    pub fn new(value: String) -> Self {
        Self(Zeroizing::new(value))
    }

    /// The plaintext key. Show it once and let it go.
    #[must_use]
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyMaterial(<redacted>)")
    }
}

/// An external service that mints API keys.
#[async_trait::async_trait]
pub trait KeyGenerator: Send + Sync + 'static {
    /// Mint a new key.
    ///
    /// # Errors
    ///
    /// [`IssuanceError::UpstreamFailure`] on any transport, status or body
    /// problem.
    async fn generate(&self) -> Result<KeyMaterial, IssuanceError>;
}

/// Issues and revokes the single API key of an account.
pub struct KeyIssuanceGateway {
    reconciler: Arc<EntitlementReconciler>,
    generator: Arc<dyn KeyGenerator>,
    held: Mutex<Option<KeyMaterial>>,
}

impl KeyIssuanceGateway {
    /// Create a gateway.
    #[must_use]
    pub fn new(reconciler: Arc<EntitlementReconciler>, generator: Arc<dyn KeyGenerator>) -> Self {
        Self {
            reconciler,
            generator,
            held: Mutex::new(None),
        }
    }

    /// Issue the account's API key.
    ///
    /// The entitlement must already be loaded and show no issued key. The
    /// generator is not called otherwise. A generator failure leaves every
    /// store untouched.
    ///
    /// # Errors
    ///
    /// - [`IssuanceError::EntitlementNotLoaded`] before the first load.
    /// - [`IssuanceError::LimitReached`] if a key was already issued.
    /// - [`IssuanceError::UpstreamFailure`] if the generator failed.
    pub async fn issue_key(&self, principal_id: &str) -> Result<KeyMaterial, IssuanceError> {
        let view = self.reconciler.current(principal_id).await.ok_or_else(|| {
            IssuanceError::EntitlementNotLoaded {
                principal_id: principal_id.to_owned(),
            }
        })?;
        if view.has_issued_key {
            info!(principal_id, "key issuance refused, limit reached");
            return Err(IssuanceError::LimitReached);
        }

        let key = self.generator.generate().await.inspect_err(|e| {
            warn!(principal_id, error = %e, "key generation failed");
        })?;

        let degraded = self.reconciler.set_entitlement(principal_id, true).await;
        *self.held.lock().await = Some(key.clone());
        info!(principal_id, degraded, "API key issued");
        Ok(key)
    }

    /// Revoke the account's API key locally so a new one can be issued.
    ///
    /// Always succeeds; a failed record store write only marks the
    /// entitlement degraded.
    ///
    /// # Errors
    ///
    /// None at present. The `Result` leaves room for a server-side revoke.
    pub async fn delete_key(&self, principal_id: &str) -> Result<(), IssuanceError> {
        let degraded = self.reconciler.set_entitlement(principal_id, false).await;
        self.discard().await;
        info!(principal_id, degraded, "API key deleted");
        Ok(())
    }

    /// Drop any key material held in memory.
    pub async fn discard(&self) {
        self.held.lock().await.take();
    }

    /// Whether a freshly issued key is still held in memory.
    pub async fn holds_key(&self) -> bool {
        self.held.lock().await.is_some()
    }
}

impl fmt::Debug for KeyIssuanceGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyIssuanceGateway").finish_non_exhaustive()
    }
}
