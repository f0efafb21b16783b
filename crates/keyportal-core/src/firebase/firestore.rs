//! Firestore REST client for the `users` collection.
//!
//! Documents use Firestore's typed-value encoding:
//!
//! ```json
//! { "fields": { "hasGeneratedApiKey": { "booleanValue": true },
//!               "createdAt": { "stringValue": "2024-05-01T10:00:00Z" } } }
//! ```
//!
//! Merge writes are a `PATCH` with one `updateMask.fieldPaths` per patched
//! field, which creates the document when it is missing.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{FirebaseConfig, http_client};
use crate::error::RecordStoreError;
use crate::identity::BearerToken;
use crate::records::{RecordPatch, RecordStore, UserRecord};

const USERS: &str = "users";
const STATUS_COLLECTION: &str = "system_status";

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Value {
    #[serde(skip_serializing_if = "Option::is_none")]
    string_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    boolean_value: Option<bool>,
}

impl Value {
    fn string(s: String) -> Self {
        Self {
            string_value: Some(s),
            ..Self::default()
        }
    }

    fn boolean(b: bool) -> Self {
        Self {
            boolean_value: Some(b),
            ..Self::default()
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    fields: HashMap<String, Value>,
}

fn timestamp(fields: &HashMap<String, Value>, name: &str) -> Option<DateTime<Utc>> {
    fields
        .get(name)?
        .string_value
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

fn decode(doc: &Document) -> UserRecord {
    let text = |name: &str| fields_string(&doc.fields, name);
    UserRecord {
        email: text("email"),
        name: text("name"),
        has_generated_api_key: doc
            .fields
            .get("hasGeneratedApiKey")
            .and_then(|v| v.boolean_value)
            .unwrap_or(false),
        created_at: timestamp(&doc.fields, "createdAt"),
        api_key_updated_at: timestamp(&doc.fields, "apiKeyUpdatedAt"),
    }
}

fn fields_string(fields: &HashMap<String, Value>, name: &str) -> Option<String> {
    fields.get(name)?.string_value.clone()
}

fn encode(patch: &RecordPatch) -> Document {
    let mut fields = HashMap::new();
    if let Some(email) = &patch.email {
        fields.insert("email".to_owned(), Value::string(email.clone()));
    }
    if let Some(name) = &patch.name {
        fields.insert("name".to_owned(), Value::string(name.clone()));
    }
    if let Some(has_key) = patch.has_generated_api_key {
        fields.insert("hasGeneratedApiKey".to_owned(), Value::boolean(has_key));
    }
    if let Some(at) = patch.created_at {
        fields.insert("createdAt".to_owned(), Value::string(at.to_rfc3339()));
    }
    if let Some(at) = patch.api_key_updated_at {
        fields.insert("apiKeyUpdatedAt".to_owned(), Value::string(at.to_rfc3339()));
    }
    Document { fields }
}

fn status_error(status: StatusCode) -> RecordStoreError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RecordStoreError::PermissionDenied {
            reason: format!("HTTP {}", status.as_u16()),
        },
        s if s.is_server_error() => RecordStoreError::NotReachable {
            reason: format!("HTTP {}", s.as_u16()),
        },
        s => RecordStoreError::Rejected { status: s.as_u16() },
    }
}

/// [`RecordStore`] backed by Cloud Firestore.
pub struct FirestoreRecords {
    documents_url: String,
    client: reqwest::Client,
    token: Option<Arc<dyn BearerToken>>,
}

fn documents_url(base: &str, project_id: &str) -> String {
    format!(
        "{}/projects/{}/databases/(default)/documents",
        base.trim_end_matches('/'),
        urlencoding::encode(project_id)
    )
}

impl FirestoreRecords {
    /// Create a client for the project in `config`. Requests carry the
    /// bearer token from `token` when one is available.
    ///
    /// # Errors
    ///
    /// [`RecordStoreError::NotReachable`] if the HTTP client cannot be built.
    pub fn new(
        config: &FirebaseConfig,
        token: Option<Arc<dyn BearerToken>>,
    ) -> Result<Self, RecordStoreError> {
        let client = http_client(config.timeout).map_err(|e| RecordStoreError::NotReachable {
            reason: format!("http client: {e}"),
        })?;
        Ok(Self {
            documents_url: documents_url(&config.firestore_url, &config.project_id),
            client,
            token,
        })
    }

    fn user_url(&self, principal_id: &str) -> String {
        format!(
            "{}/{USERS}/{}",
            self.documents_url,
            urlencoding::encode(principal_id)
        )
    }

    async fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(source) => match source.bearer_token().await {
                Some(token) => req.bearer_auth(token),
                None => req,
            },
            None => req,
        }
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response, RecordStoreError> {
        self.authorize(req)
            .await
            .send()
            .await
            .map_err(|e| RecordStoreError::NotReachable {
                reason: e.to_string(),
            })
    }
}

impl std::fmt::Debug for FirestoreRecords {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirestoreRecords")
            .field("documents_url", &self.documents_url)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl RecordStore for FirestoreRecords {
    async fn get(&self, principal_id: &str) -> Result<Option<UserRecord>, RecordStoreError> {
        let resp = self.send(self.client.get(self.user_url(principal_id))).await?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(status_error(status));
        }
        let doc: Document = resp.json().await.map_err(|e| RecordStoreError::Malformed {
            principal_id: principal_id.to_owned(),
            reason: e.to_string(),
        })?;
        Ok(Some(decode(&doc)))
    }

    async fn merge(&self, principal_id: &str, patch: RecordPatch) -> Result<(), RecordStoreError> {
        let mask: Vec<(&str, &str)> = patch
            .field_paths()
            .into_iter()
            .map(|p| ("updateMask.fieldPaths", p))
            .collect();
        let req = self
            .client
            .patch(self.user_url(principal_id))
            .query(&mask)
            .json(&encode(&patch));
        let resp = self.send(req).await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(status_error(status));
        }
        debug!(principal_id, fields = mask.len(), "merged user record");
        Ok(())
    }

    async fn probe(&self) -> Result<(), RecordStoreError> {
        let url = format!("{}/{STATUS_COLLECTION}", self.documents_url);
        let resp = self
            .send(self.client.get(url).query(&[("pageSize", "1")]))
            .await?;
        let status = resp.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(status_error(status))
        }
    }
}
