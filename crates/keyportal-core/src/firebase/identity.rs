//! Identity Toolkit REST client.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::warn;

use super::{FirebaseConfig, http_client};
use crate::error::AuthError;
use crate::identity::{BearerToken, IdentityProvider};
use crate::principal::Principal;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PasswordRequest<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateProfileRequest<'a> {
    id_token: &'a str,
    display_name: &'a str,
    return_secure_token: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthResponse {
    local_id: String,
    email: String,
    #[serde(default)]
    display_name: Option<String>,
    id_token: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

struct Session {
    principal: Principal,
    id_token: String,
}

/// Map an Identity Toolkit error message to an [`AuthError`].
///
/// Messages look like `EMAIL_EXISTS` or
/// `WEAK_PASSWORD : Password should be at least 6 characters`.
#[must_use]
pub fn map_auth_error_code(message: &str) -> AuthError {
    let code = message.split(" : ").next().unwrap_or(message).trim();
    match code {
        "EMAIL_EXISTS" => AuthError::AccountExists,
        "EMAIL_NOT_FOUND" | "INVALID_PASSWORD" | "INVALID_LOGIN_CREDENTIALS" | "USER_DISABLED" => {
            AuthError::InvalidCredentials
        }
        other => AuthError::Rejected {
            code: other.to_owned(),
        },
    }
}

/// [`IdentityProvider`] backed by Firebase Authentication.
///
/// The ID token of the signed-in user is kept in memory only and shared with
/// [`super::FirestoreRecords`] through [`BearerToken`].
pub struct FirebaseIdentity {
    config: FirebaseConfig,
    client: reqwest::Client,
    session: RwLock<Option<Session>>,
}

impl FirebaseIdentity {
    /// Create a client for the project in `config`.
    ///
    /// # Errors
    ///
    /// [`AuthError::ProviderUnavailable`] if the HTTP client cannot be built.
    pub fn new(config: FirebaseConfig) -> Result<Arc<Self>, AuthError> {
        let client = http_client(config.timeout).map_err(|e| AuthError::ProviderUnavailable {
            reason: format!("http client: {e}"),
        })?;
        Ok(Arc::new(Self {
            config,
            client,
            session: RwLock::new(None),
        }))
    }

    fn endpoint(&self, method: &str) -> String {
        format!(
            "{}/accounts:{method}?key={}",
            self.config.identity_url.trim_end_matches('/'),
            urlencoding::encode(&self.config.api_key)
        )
    }

    async fn call<B: Serialize + Sync, T: serde::de::DeserializeOwned + Send>(
        &self,
        method: &str,
        body: &B,
    ) -> Result<T, AuthError> {
        let resp = self
            .client
            .post(self.endpoint(method))
            .json(body)
            .send()
            .await
            .map_err(|e| AuthError::ProviderUnavailable {
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if status.is_success() {
            return resp
                .json()
                .await
                .map_err(|e| AuthError::ProviderUnavailable {
                    reason: format!("malformed response: {e}"),
                });
        }

        let text = resp.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorEnvelope>(&text) {
            Ok(envelope) => Err(map_auth_error_code(&envelope.error.message)),
            Err(_) if status.is_server_error() => Err(AuthError::ProviderUnavailable {
                reason: format!("HTTP {}", status.as_u16()),
            }),
            Err(_) => Err(AuthError::Rejected {
                code: format!("HTTP {}", status.as_u16()),
            }),
        }
    }

    async fn store(&self, resp: AuthResponse) -> Principal {
        let principal = Principal::new(resp.local_id, resp.display_name, resp.email);
        *self.session.write().await = Some(Session {
            principal: principal.clone(),
            id_token: resp.id_token,
        });
        principal
    }
}

impl std::fmt::Debug for FirebaseIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirebaseIdentity")
            .field("project_id", &self.config.project_id)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl IdentityProvider for FirebaseIdentity {
    async fn sign_up(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<Principal, AuthError> {
        let mut resp: AuthResponse = self
            .call(
                "signUp",
                &PasswordRequest {
                    email,
                    password,
                    return_secure_token: true,
                },
            )
            .await?;

        // The account exists at this point; a failed name update is not fatal.
        let update = UpdateProfileRequest {
            id_token: &resp.id_token,
            display_name: name,
            return_secure_token: false,
        };
        let updated = self.call::<_, serde_json::Value>("update", &update).await;
        match updated {
            Ok(_) => resp.display_name = Some(name.to_owned()),
            Err(e) => warn!(principal_id = %resp.local_id, error = %e, "could not set display name"),
        }

        Ok(self.store(resp).await)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Principal, AuthError> {
        let resp: AuthResponse = self
            .call(
                "signInWithPassword",
                &PasswordRequest {
                    email,
                    password,
                    return_secure_token: true,
                },
            )
            .await?;
        Ok(self.store(resp).await)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.session.write().await.take();
        Ok(())
    }

    async fn current(&self) -> Result<Option<Principal>, AuthError> {
        Ok(self
            .session
            .read()
            .await
            .as_ref()
            .map(|s| s.principal.clone()))
    }

    async fn probe(&self) -> Result<(), AuthError> {
        if self.config.api_key.trim().is_empty() {
            return Err(AuthError::ProviderUnavailable {
                reason: "Firebase API key is not configured".to_owned(),
            });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl BearerToken for FirebaseIdentity {
    async fn bearer_token(&self) -> Option<String> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.id_token.clone())
    }
}
