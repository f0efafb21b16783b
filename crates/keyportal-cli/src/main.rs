//! `keyportal` CLI: manage the single API key of a portal account.
//!
//! Every command that needs an account signs in with `--email` /
//! `--password`, does its work, and signs out again. The API key is printed
//! once, when it is generated, and cannot be shown again.

#![allow(clippy::print_stdout, clippy::print_stderr)]

mod config;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::debug;

use keyportal_core::entitlement::EntitlementView;
use keyportal_core::error::IssuanceError;
use keyportal_core::firebase::{FirebaseConfig, FirebaseIdentity, FirestoreRecords};
use keyportal_core::identity::{BearerToken, IdentityProvider};
use keyportal_core::issuance::KeyGenerator;
use keyportal_core::keygen::HttpKeyGenerator;
use keyportal_core::portal::{HealthReport, Portal, ServiceStatus};
use keyportal_core::records::{MemoryRecordStore, RecordStore};
use keyportal_storage::{MemoryBackend, RedbBackend, StorageBackend};

use crate::config::{CacheBackendType, PortalConfig, RecordsBackendType};

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";

/// keyportal: your account's API key from the command line.
#[derive(Parser)]
#[command(
    name = "keyportal",
    version,
    about = "keyportal CLI: sign in and manage your account's API key",
    long_about = None,
    after_help = format!(
        "{DIM}Environment variables:{RESET}\n  \
         KEYPORTAL_FIREBASE_API_KEY     Firebase web API key\n  \
         KEYPORTAL_FIREBASE_PROJECT_ID  Firebase project id\n  \
         KEYPORTAL_FIREBASE_IDENTITY_URL  Identity Toolkit base URL override\n  \
         KEYPORTAL_FIRESTORE_URL        Firestore base URL override\n  \
         KEYPORTAL_KEYGEN_URL           Key generation endpoint\n  \
         KEYPORTAL_CACHE                redb (default) or memory\n  \
         KEYPORTAL_RECORDS              firestore (default) or memory\n\n\
         {DIM}Examples:{RESET}\n  \
         keyportal signup --name Alice --email a@x.com --password ...\n  \
         keyportal generate --email a@x.com --password ...\n  \
         keyportal health"
    ),
)]
struct Cli {
    /// Account email.
    #[arg(long, global = true, env = "KEYPORTAL_EMAIL")]
    email: Option<String>,

    /// Account password.
    #[arg(long, global = true, env = "KEYPORTAL_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Emit logs as JSON.
    #[arg(long, global = true, default_value = "false")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account.
    Signup {
        /// Display name.
        #[arg(long)]
        name: String,
    },
    /// Show whether an API key has been issued.
    Status,
    /// Generate the account's API key (shown once).
    Generate,
    /// Delete the account's API key.
    Delete,
    /// Delete the current API key and generate a new one.
    Regenerate,
    /// Check the identity provider and record store.
    Health,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = PortalConfig::from_env();
    init_logging(&config, cli.log_json);

    match run(cli, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{RED}{BOLD}error:{RESET} {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(config: &PortalConfig, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn build_portal(config: &PortalConfig) -> Result<Portal> {
    let cache: Arc<dyn StorageBackend> = match &config.cache {
        CacheBackendType::Memory => Arc::new(MemoryBackend::new()),
        CacheBackendType::Redb { path } => Arc::new(
            RedbBackend::open(path)
                .with_context(|| format!("failed to open cache at {}", path.display()))?,
        ),
    };

    let mut firebase =
        FirebaseConfig::new(&config.firebase_api_key, &config.firebase_project_id);
    firebase.timeout = config.http_timeout;
    if let Some(url) = &config.identity_url {
        firebase.identity_url.clone_from(url);
    }
    if let Some(url) = &config.firestore_url {
        firebase.firestore_url.clone_from(url);
    }
    let identity = FirebaseIdentity::new(firebase.clone()).context("identity provider")?;

    let records: Arc<dyn RecordStore> = match config.records {
        RecordsBackendType::Memory => Arc::new(MemoryRecordStore::new()),
        RecordsBackendType::Firestore => Arc::new(
            FirestoreRecords::new(&firebase, Some(Arc::clone(&identity) as Arc<dyn BearerToken>))
                .context("record store")?,
        ),
    };

    let generator: Arc<dyn KeyGenerator> = Arc::new(
        HttpKeyGenerator::new(&config.keygen_url, config.http_timeout)
            .context("key generator")?,
    );

    debug!(cache = ?config.cache, records = ?config.records, "portal configured");
    let portal = Portal::new(
        identity as Arc<dyn IdentityProvider>,
        records,
        cache,
        generator,
    );
    portal.bootstrap().await;
    Ok(portal)
}

fn credentials(cli: &Cli) -> Result<(&str, &str)> {
    let Some(email) = cli.email.as_deref() else {
        bail!("--email is required (or set KEYPORTAL_EMAIL)");
    };
    let Some(password) = cli.password.as_deref() else {
        bail!("--password is required (or set KEYPORTAL_PASSWORD)");
    };
    Ok((email, password))
}

async fn run(cli: Cli, config: &PortalConfig) -> Result<()> {
    let portal = build_portal(config).await?;

    if let Commands::Health = cli.command {
        print_health(&portal.health().await);
        return Ok(());
    }

    let (email, password) = credentials(&cli)?;
    let result: Result<()> = async {
        match &cli.command {
            Commands::Signup { name } => {
                portal.sign_up(name, email, password).await?;
                println!("{GREEN}✓{RESET} Account created for {BOLD}{email}{RESET}");
                let view = loaded(&portal).await?;
                print_status(view);
                Ok(())
            }
            Commands::Status => {
                portal.sign_in(email, password).await?;
                print_status(loaded(&portal).await?);
                Ok(())
            }
            Commands::Generate => {
                portal.sign_in(email, password).await?;
                generate(&portal).await
            }
            Commands::Delete => {
                portal.sign_in(email, password).await?;
                portal.delete_key().await?;
                println!("{GREEN}✓{RESET} API key deleted. You can generate a new one.");
                warn_if_degraded(&portal);
                Ok(())
            }
            Commands::Regenerate => {
                portal.sign_in(email, password).await?;
                portal.delete_key().await?;
                generate(&portal).await
            }
            Commands::Health => Ok(()),
        }
    }
    .await;

    portal.sign_out().await;
    result
}

async fn loaded(portal: &Portal) -> Result<EntitlementView> {
    portal
        .entitlement()
        .await
        .context("entitlement not loaded after authentication")
}

async fn generate(portal: &Portal) -> Result<()> {
    match portal.issue_key().await {
        Ok(key) => {
            println!("{GREEN}✓{RESET} API key generated:\n");
            println!("  {BOLD}{}{RESET}\n", key.expose());
            println!(
                "{YELLOW}This is the only time you'll see this API key. Copy it now.{RESET}"
            );
            warn_if_degraded(portal);
            Ok(())
        }
        Err(IssuanceError::LimitReached) => bail!(
            "you have already generated the maximum number of API keys allowed (1); \
             run `keyportal delete` first"
        ),
        Err(e) => Err(e).context("failed to generate API key"),
    }
}

fn print_status(view: EntitlementView) {
    if view.has_issued_key {
        println!("API key: {BOLD}issued{RESET} {DIM}(hidden; delete it to generate a new one){RESET}");
    } else {
        println!("API key: {BOLD}not issued{RESET}");
    }
    if view.degraded {
        print_degraded_banner();
    }
}

fn warn_if_degraded(portal: &Portal) {
    if portal.is_degraded() {
        print_degraded_banner();
    }
}

fn print_degraded_banner() {
    eprintln!(
        "{YELLOW}warning:{RESET} the account database could not be reached; \
         using the locally cached status"
    );
}

fn print_health(report: &HealthReport) {
    let line = |label: &str, status: &ServiceStatus| match status {
        ServiceStatus::Connected => println!("{label:<10} {GREEN}connected{RESET}"),
        ServiceStatus::Degraded => println!("{label:<10} {YELLOW}degraded{RESET}"),
        ServiceStatus::Unavailable(reason) => {
            println!("{label:<10} {RED}unavailable{RESET} {DIM}{reason}{RESET}");
        }
    };
    line("identity", &report.identity);
    line("records", &report.records);
}
