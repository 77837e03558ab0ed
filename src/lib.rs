// Declare the modules
pub mod api;
pub mod commands;
pub mod config;
pub mod conversations;
pub mod error;
pub mod models;
pub mod session;
pub mod state;
pub mod storage;
pub mod stream;
pub mod thinking;

pub use error::{ChatError, ChatResult};

use crate::api::{LLMApiProvider, OpenAICompatibleProvider};
use crate::conversations::ConversationStore;
use crate::session::ChatSession;
use crate::storage::{BlobStore, SqliteBlobStore};
use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Command-line options for the terminal client.
#[derive(Parser, Debug)]
#[command(name = "streamchat", version, about)]
pub struct Cli {
    /// SQLite file holding chats and settings
    #[arg(long)]
    pub db: Option<PathBuf>,
    /// API base URL, e.g. https://api.openai.com/v1 (saved)
    #[arg(long)]
    pub base_url: Option<String>,
    /// Model identifier (saved)
    #[arg(long)]
    pub model: Option<String>,
    /// API key, `env:NAME` or `keyring` (saved)
    #[arg(long)]
    pub api_key: Option<String>,
}

async fn apply_overrides(store: &mut ConversationStore, cli: &Cli) {
    let mut config = store.api_config().clone();
    if let Some(base_url) = &cli.base_url {
        config.base_url = base_url.clone();
    }
    if let Some(model) = &cli.model {
        config.model = model.clone();
    }
    if let Some(api_key) = &cli.api_key {
        config.api_key = api_key.clone();
    }
    if &config != store.api_config() {
        store.set_api_config(config).await;
    }
}

pub async fn run() -> anyhow::Result<()> {
    // Initialize logging
    let _ = env_logger::builder()
        .format_timestamp_millis()
        .parse_default_env()
        .try_init();

    let cli = Cli::parse();
    let db_path = match &cli.db {
        Some(path) => path.clone(),
        None => config::default_db_path()?,
    };
    let blobs: Arc<dyn BlobStore> = Arc::new(
        SqliteBlobStore::open(&db_path)
            .await
            .context("Failed to open chat database")?,
    );

    let mut store = ConversationStore::load(blobs).await;
    apply_overrides(&mut store, &cli).await;

    let api_provider: Arc<dyn LLMApiProvider> = Arc::new(OpenAICompatibleProvider::new());
    let session = ChatSession::new(store, api_provider);

    println!("streamchat. Type /help for commands.");
    if !config::has_api_key(session.store().lock().await.api_config()) {
        println!("No API key configured. Restart with --api-key <key|env:NAME|keyring>.");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        // Once a request has listened for Ctrl-C the default handler is gone
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read input")?,
            _ = tokio::signal::ctrl_c() => {
                println!();
                None
            }
        };
        let Some(line) = line else {
            break;
        };
        match commands::parse(&line) {
            Ok(command) => {
                if !commands::execute(&session, command).await {
                    break;
                }
            }
            Err(message) => println!("{}", message),
        }
    }
    log::info!("Exiting");
    Ok(())
}
