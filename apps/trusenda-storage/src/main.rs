#![allow(clippy::print_stdout)]

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use serde::Serialize;
use trusenda_client_core::{
    ActivityKind, ClientStorage, CredentialKey, DEFAULT_RECENT_LIMIT, StorageConfig,
};

#[derive(Parser, Debug)]
#[command(name = "trusenda-storage", about = "Inspect and reset the Trusenda on-device stores")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stored session tokens.
    #[command(subcommand)]
    Session(SessionCommand),
    /// Recovered lead draft.
    #[command(subcommand)]
    Draft(DraftCommand),
    /// Recent activity log.
    #[command(subcommand)]
    Activity(ActivityCommand),
}

#[derive(Subcommand, Debug)]
enum SessionCommand {
    Status,
    /// Log out: drop tokens, keep biometric credentials.
    Clear,
}

#[derive(Subcommand, Debug)]
enum DraftCommand {
    Show,
    Clear,
}

#[derive(Subcommand, Debug)]
enum ActivityCommand {
    Recent {
        #[arg(long, default_value_t = DEFAULT_RECENT_LIMIT)]
        limit: usize,
    },
    Subject {
        subject_id: String,
    },
    Kind {
        /// e.g. lead_created, property_matched
        kind: String,
    },
    Stats,
    /// Drop entries older than the age cap.
    Purge,
    Clear,
}

#[derive(Debug, Serialize)]
struct SessionStatus {
    has_access_token: bool,
    has_refresh_token: bool,
    expires_at: Option<String>,
    expired: bool,
    biometric_enabled: bool,
}

fn main() -> Result<()> {
    let config = StorageConfig::from_env().context("resolve storage config")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let storage = ClientStorage::open(&config);

    match args.command {
        Command::Session(SessionCommand::Status) => {
            let vault = &storage.vault;
            print_json(&SessionStatus {
                has_access_token: vault.get(CredentialKey::AccessToken).is_some(),
                has_refresh_token: vault.get(CredentialKey::RefreshToken).is_some(),
                expires_at: vault.token_expiry().map(|expiry| expiry.to_rfc3339()),
                expired: vault.is_token_expired(),
                biometric_enabled: vault.is_biometric_enabled(),
            })?;
        }
        Command::Session(SessionCommand::Clear) => {
            storage.vault.clear_all();
            tracing::info!("session cleared");
        }
        Command::Draft(DraftCommand::Show) => {
            print_json(&storage.drafts.load_draft())?;
        }
        Command::Draft(DraftCommand::Clear) => {
            storage.drafts.clear_draft();
            tracing::info!("draft cleared");
        }
        Command::Activity(ActivityCommand::Recent { limit }) => {
            print_json(&storage.activity.recent_activities(limit))?;
        }
        Command::Activity(ActivityCommand::Subject { subject_id }) => {
            print_json(&storage.activity.activities_for_subject(&subject_id))?;
        }
        Command::Activity(ActivityCommand::Kind { kind }) => {
            let parsed =
                ActivityKind::parse(&kind).ok_or_else(|| anyhow!("unknown activity kind '{kind}'"))?;
            print_json(&storage.activity.activities_of_kind(parsed))?;
        }
        Command::Activity(ActivityCommand::Stats) => {
            print_json(&storage.activity.stats())?;
        }
        Command::Activity(ActivityCommand::Purge) => {
            let removed = storage.activity.purge_expired();
            tracing::info!(removed, "activity purge finished");
        }
        Command::Activity(ActivityCommand::Clear) => {
            storage.activity.clear_all();
            tracing::info!("activity log cleared");
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("encode output")?;
    println!("{rendered}");
    Ok(())
}
