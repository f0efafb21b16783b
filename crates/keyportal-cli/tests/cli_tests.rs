//! Integration tests for the `keyportal` binary.
//!
//! Run the CLI as a subprocess. Argument handling runs with in-memory cache
//! and records; account commands run against a local fake of Firebase and
//! the key generator, with the cache in a temporary redb file.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

fn run(args: &[&str]) -> (i32, String, String) {
    let output = Command::new(env!("CARGO_BIN_EXE_keyportal"))
        .args(args)
        .env("KEYPORTAL_CACHE", "memory")
        .env("KEYPORTAL_RECORDS", "memory")
        .env("KEYPORTAL_KEYGEN_URL", "http://127.0.0.1:9/keygen")
        .env_remove("KEYPORTAL_EMAIL")
        .env_remove("KEYPORTAL_PASSWORD")
        .env_remove("KEYPORTAL_FIREBASE_API_KEY")
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to execute keyportal");

    let code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (code, stdout, stderr)
}

#[test]
fn version_flag() {
    let (code, stdout, _) = run(&["--version"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("keyportal"), "{stdout}");
}

#[test]
fn help_lists_commands() {
    let (code, stdout, _) = run(&["--help"]);
    assert_eq!(code, 0);
    for command in ["signup", "status", "generate", "delete", "regenerate", "health"] {
        assert!(stdout.contains(command), "help should list '{command}'");
    }
}

#[test]
fn generate_without_credentials_fails() {
    let (code, _, stderr) = run(&["generate"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("--email is required"), "{stderr}");
}

#[test]
fn health_reports_missing_api_key() {
    let (code, stdout, _) = run(&["health"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("identity"), "{stdout}");
    assert!(stdout.contains("unavailable"), "{stdout}");
    assert!(stdout.contains("records"), "{stdout}");
}

#[test]
fn signup_without_name_is_usage_error() {
    let (code, _, stderr) = run(&["signup", "--email", "a@x.com", "--password", "pw"]);
    assert_eq!(code, 2);
    assert!(stderr.contains("--name"), "{stderr}");
}

// ── Account commands against a local Firebase ───────────────────────

#[derive(Default)]
struct Backend {
    accounts: Mutex<HashMap<String, String>>,
    documents: Mutex<HashMap<String, Value>>,
    records_down: AtomicBool,
    keys: AtomicUsize,
}

async fn accounts(
    State(b): State<Arc<Backend>>,
    Path(method): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let email = body["email"].as_str().unwrap_or_default().to_owned();
    let password = body["password"].as_str().unwrap_or_default().to_owned();
    let mut accounts = b.accounts.lock().await;
    let ok = json!({ "localId": "uid-1", "email": email, "displayName": "Alice", "idToken": "tok" });
    match method.as_str() {
        "accounts:signUp" if accounts.contains_key(&email) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": { "message": "EMAIL_EXISTS" } })),
        )
            .into_response(),
        "accounts:signUp" => {
            accounts.insert(email, password);
            Json(ok).into_response()
        }
        "accounts:update" => Json(json!({ "localId": "uid-1" })).into_response(),
        "accounts:signInWithPassword" if accounts.get(&email) == Some(&password) => {
            Json(ok).into_response()
        }
        "accounts:signInWithPassword" => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": { "message": "INVALID_LOGIN_CREDENTIALS" } })),
        )
            .into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn get_user(State(b): State<Arc<Backend>>, Path(id): Path<String>) -> Response {
    if b.records_down.load(Ordering::SeqCst) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    match b.documents.lock().await.get(&id) {
        Some(doc) => Json(doc.clone()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn patch_user(
    State(b): State<Arc<Backend>>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    if b.records_down.load(Ordering::SeqCst) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let mut docs = b.documents.lock().await;
    let doc = docs.entry(id).or_insert_with(|| json!({ "fields": {} }));
    if let (Some(existing), Some(new)) = (doc["fields"].as_object_mut(), body["fields"].as_object()) {
        for (k, v) in new {
            existing.insert(k.clone(), v.clone());
        }
    }
    Json(doc.clone()).into_response()
}

async fn keygen(State(b): State<Arc<Backend>>) -> Json<Value> {
    let n = b.keys.fetch_add(1, Ordering::SeqCst);
    Json(json!({ "value": format!("KEY{}", 123 + n) }))
}

struct Account {
    backend: Arc<Backend>,
    base: String,
    cache: PathBuf,
    _dir: tempfile::TempDir,
}

impl Account {
    async fn start() -> Self {
        let backend = Arc::new(Backend::default());
        let docs = "/projects/demo/databases/(default)/documents";
        let app = Router::new()
            .route("/{method}", post(accounts))
            .route(&format!("{docs}/users/{{id}}"), get(get_user).patch(patch_user))
            .route(&format!("{docs}/system_status"), get(|| async { StatusCode::FORBIDDEN }))
            .route("/keygen", get(keygen))
            .with_state(Arc::clone(&backend));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let dir = tempfile::tempdir().unwrap();
        Self {
            backend,
            base: format!("http://{addr}"),
            cache: dir.path().join("cache.redb"),
            _dir: dir,
        }
    }

    async fn run(&self, args: &[&str]) -> (i32, String, String) {
        let output = tokio::process::Command::new(env!("CARGO_BIN_EXE_keyportal"))
            .args(args)
            .args(["--email", "a@x.com", "--password", "pw"])
            .env("KEYPORTAL_CACHE", "redb")
            .env("KEYPORTAL_CACHE_PATH", &self.cache)
            .env("KEYPORTAL_RECORDS", "firestore")
            .env("KEYPORTAL_FIREBASE_API_KEY", "test-key")
            .env("KEYPORTAL_FIREBASE_PROJECT_ID", "demo")
            .env("KEYPORTAL_FIREBASE_IDENTITY_URL", &self.base)
            .env("KEYPORTAL_FIRESTORE_URL", &self.base)
            .env("KEYPORTAL_KEYGEN_URL", format!("{}/keygen", self.base))
            .env("KEYPORTAL_HTTP_TIMEOUT_SECS", "5")
            .env_remove("RUST_LOG")
            .output()
            .await
            .expect("failed to execute keyportal");

        let code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        (code, stdout, stderr)
    }
}

#[tokio::test]
async fn key_lifecycle_through_cli() {
    let account = Account::start().await;

    let (code, stdout, stderr) = account.run(&["signup", "--name", "Alice"]).await;
    assert_eq!(code, 0, "{stderr}");
    assert!(stdout.contains("Account created"), "{stdout}");
    assert!(stdout.contains("not issued"), "{stdout}");

    let (code, stdout, stderr) = account.run(&["generate"]).await;
    assert_eq!(code, 0, "{stderr}");
    assert!(stdout.contains("KEY123"), "{stdout}");
    assert!(stdout.contains("only time"), "{stdout}");

    let (code, stdout, stderr) = account.run(&["generate"]).await;
    assert_eq!(code, 1);
    assert!(!stdout.contains("KEY124"), "{stdout}");
    assert!(stderr.contains("maximum number of API keys"), "{stderr}");
    assert_eq!(account.backend.keys.load(Ordering::SeqCst), 1);

    let (code, stdout, stderr) = account.run(&["delete"]).await;
    assert_eq!(code, 0, "{stderr}");
    assert!(stdout.contains("API key deleted"), "{stdout}");

    let (code, stdout, _) = account.run(&["status"]).await;
    assert_eq!(code, 0);
    assert!(stdout.contains("not issued"), "{stdout}");

    let (code, stdout, stderr) = account.run(&["regenerate"]).await;
    assert_eq!(code, 0, "{stderr}");
    assert!(stdout.contains("KEY124"), "{stdout}");

    let (code, stdout, _) = account.run(&["status"]).await;
    assert_eq!(code, 0);
    assert!(stdout.contains("issued"), "{stdout}");
    assert!(!stdout.contains("not issued"), "{stdout}");
}

#[tokio::test]
async fn status_falls_back_to_cache_when_records_are_down() {
    let account = Account::start().await;
    account.run(&["signup", "--name", "Alice"]).await;
    let (code, _, stderr) = account.run(&["generate"]).await;
    assert_eq!(code, 0, "{stderr}");

    account.backend.records_down.store(true, Ordering::SeqCst);
    let (code, stdout, stderr) = account.run(&["status"]).await;
    assert_eq!(code, 0, "{stderr}");
    assert!(stdout.contains("issued"), "{stdout}");
    assert!(!stdout.contains("not issued"), "{stdout}");
    assert!(stderr.contains("could not be reached"), "{stderr}");

    let (code, _, stderr) = account.run(&["generate"]).await;
    assert_eq!(code, 1);
    assert!(stderr.contains("maximum number of API keys"), "{stderr}");
}

#[tokio::test]
async fn wrong_password_is_reported() {
    let account = Account::start().await;
    account.run(&["signup", "--name", "Alice"]).await;

    let output = tokio::process::Command::new(env!("CARGO_BIN_EXE_keyportal"))
        .args(["status", "--email", "a@x.com", "--password", "nope"])
        .env("KEYPORTAL_CACHE", "memory")
        .env("KEYPORTAL_FIREBASE_API_KEY", "test-key")
        .env("KEYPORTAL_FIREBASE_PROJECT_ID", "demo")
        .env("KEYPORTAL_FIREBASE_IDENTITY_URL", &account.base)
        .env("KEYPORTAL_FIRESTORE_URL", &account.base)
        .env_remove("RUST_LOG")
        .output()
        .await
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid email or password"), "{stderr}");
}
