//! HTTP key generator.
//!
//! Calls `GET <url>` and expects `{ "value": "<key>" }`. Any transport error,
//! non-2xx status, or body without a non-empty `value` is an upstream failure.
//! Retries are left to the caller; timeouts come from the HTTP client.

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::IssuanceError;
use crate::issuance::{KeyGenerator, KeyMaterial};

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Deserialize)]
struct KeygenResponse {
    value: String,
}

/// A [`KeyGenerator`] backed by a remote HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpKeyGenerator {
    url: String,
    client: reqwest::Client,
}

impl HttpKeyGenerator {
    /// Create a generator for `url`.
    ///
    /// # Errors
    ///
    /// [`IssuanceError::UpstreamFailure`] if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, IssuanceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("keyportal/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| IssuanceError::UpstreamFailure {
                reason: format!("http client: {e}"),
            })?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait::async_trait]
impl KeyGenerator for HttpKeyGenerator {
    async fn generate(&self) -> Result<KeyMaterial, IssuanceError> {
        let upstream = |reason: String| IssuanceError::UpstreamFailure { reason };

        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| upstream(if e.is_timeout() {
                "request timed out".to_owned()
            } else {
                format!("request failed: {e}")
            }))?;

        let status = resp.status();
        debug!(status = status.as_u16(), "key generator responded");
        if !status.is_success() {
            return Err(upstream(format!(
                "HTTP {} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or_default()
            )));
        }

        let body: KeygenResponse = resp
            .json()
            .await
            .map_err(|e| upstream(format!("malformed response: {e}")))?;
        if body.value.trim().is_empty() {
            return Err(upstream("malformed response: empty key".to_owned()));
        }
        Ok(KeyMaterial::new(body.value))
    }
}
