use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use convo_core::config::ProviderKind;
use convo_core::{build_deck_snapshot, ConvoSettings};
use convo_gateway::{FakeProvider, LocalProvider, OpenAiProvider, Provider};
use convo_telemetry::{export_telemetry, ConversationTelemetryStore};
use rusqlite::Connection;
use tracing::info;

mod chat;
mod deck_file;

use deck_file::FileDeckBackend;

#[derive(Parser)]
#[command(name = "convo-cli", about = "Scriptable terminal driver for the conversation engine")]
struct Cli {
    /// Path to a TOML settings file (falls back to CONVO_CONFIG, then defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to the SQLite telemetry database
    #[arg(long, global = true, default_value = "convo.sqlite3")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run an interactive (or piped) conversation turn loop.
    Chat {
        /// JSON sample deck file to load items from.
        #[arg(long)]
        deck: PathBuf,
        /// Deck ids to pass through to the backend query.
        #[arg(long, value_delimiter = ',', default_value = "1")]
        deck_ids: Vec<i64>,
    },
    /// Dump the telemetry database as structured JSON.
    Export {
        /// Maximum number of most-recent sessions to include.
        #[arg(long, default_value_t = 50)]
        limit_sessions: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "convo_cli=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let config_path = cli.config.clone().or_else(|| std::env::var("CONVO_CONFIG").ok().map(PathBuf::from));
    let settings = ConvoSettings::load(config_path.as_deref().and_then(|p| p.to_str()));

    match cli.command {
        Command::Chat { deck, deck_ids } => run_chat(&cli.db, &deck, &deck_ids, settings).await,
        Command::Export { limit_sessions } => run_export(&cli.db, limit_sessions),
    }
}

async fn run_chat(db_path: &PathBuf, deck_path: &PathBuf, deck_ids: &[i64], settings: ConvoSettings) -> Result<()> {
    let backend = FileDeckBackend::load(deck_path)?;
    let snapshot = build_deck_snapshot(
        &backend,
        deck_ids,
        settings.lexeme_field_index,
        settings.gloss_field_index,
        settings.snapshot_max_items,
    )
    .context("building deck snapshot")?;
    info!(items = snapshot.items.len(), "loaded deck snapshot");

    let conn = Connection::open(db_path).with_context(|| format!("opening telemetry db {}", db_path.display()))?;
    let telemetry = Arc::new(ConversationTelemetryStore::new(conn)?);

    let provider = build_provider(&settings)?;

    chat::run(snapshot, telemetry, provider, settings).await
}

fn run_export(db_path: &PathBuf, limit_sessions: i64) -> Result<()> {
    let conn = Connection::open(db_path).with_context(|| format!("opening telemetry db {}", db_path.display()))?;
    let export = export_telemetry(&conn, limit_sessions)?;
    println!("{}", serde_json::to_string_pretty(&export)?);
    Ok(())
}

fn build_provider(settings: &ConvoSettings) -> Result<Arc<dyn Provider>> {
    Ok(match settings.provider {
        ProviderKind::Fake => Arc::new(FakeProvider::empty()),
        ProviderKind::Local => Arc::new(LocalProvider::new(settings.model.clone(), std::env::var("CONVO_LOCAL_URL").ok())),
        ProviderKind::Openai => {
            let api_key = std::env::var("OPENAI_API_KEY").context("OPENAI_API_KEY must be set for the openai provider")?;
            Arc::new(OpenAiProvider::new(settings.model.clone(), api_key, std::env::var("CONVO_OPENAI_URL").ok()))
        }
    })
}
