use crate::error::{ChatError, ChatResult};
use crate::models::ApiConfig;
use anyhow::{Context, Result};
use keyring::Entry;
use std::path::PathBuf;

// --- API Key Retrieval ---

const KEYRING_SERVICE: &str = "streamchat_api_key";
const DB_FILE_NAME: &str = "streamchat.sqlite";

/// Resolves the API key for a request.
/// `env:NAME` reads an environment variable, `keyring` reads the OS keyring
/// (entry named after the model), anything else is the key itself.
pub fn resolve_api_key(config: &ApiConfig) -> ChatResult<String> {
    if config.base_url.trim().is_empty() {
        return Err(ChatError::Configuration("API base URL is not set".into()));
    }
    if config.model.trim().is_empty() {
        return Err(ChatError::Configuration("model is not set".into()));
    }

    let key_ref = config.api_key.trim();
    let key = match key_ref {
        "" => {
            return Err(ChatError::Configuration(
                "API key required. Please set your API key in the settings.".into(),
            ))
        }
        r if r.starts_with("env:") => {
            let env_var_name = r.trim_start_matches("env:");
            log::debug!("Retrieving API key from environment variable: {}", env_var_name);
            std::env::var(env_var_name).map_err(|_| {
                ChatError::Configuration(format!(
                    "Failed to get API key from environment variable '{}'",
                    env_var_name
                ))
            })?
        }
        "keyring" => {
            log::debug!("Retrieving API key from keyring for model: {}", config.model);
            let entry = keyring_entry(config).map_err(|e| {
                ChatError::Configuration(format!("{:#}", e))
            })?;
            read_keyring(&entry, &config.model)?
        }
        literal => literal.to_string(),
    };

    if key.trim().is_empty() {
        return Err(ChatError::Configuration("API key is empty".into()));
    }
    Ok(key)
}

/// True when a request could be issued with this config.
pub fn has_api_key(config: &ApiConfig) -> bool {
    resolve_api_key(config).is_ok()
}

fn keyring_entry(config: &ApiConfig) -> Result<Entry> {
    Entry::new(KEYRING_SERVICE, &config.model).context("Failed to create keyring entry")
}

fn read_keyring(entry: &Entry, model: &str) -> ChatResult<String> {
    entry.get_password().map_err(|e| {
        ChatError::Configuration(format!(
            "Failed to get API key from keyring for '{}': {}",
            model, e
        ))
    })
}

/// Stores an API key in the OS keyring and points the config at it.
pub fn store_api_key_in_keyring(config: &mut ApiConfig, api_key: &str) -> Result<()> {
    let entry = keyring_entry(config)?;
    log::info!("Setting API key in keyring for model: {}", config.model);
    entry
        .set_password(api_key)
        .context(format!("Failed to set API key in keyring for '{}'", config.model))?;
    config.api_key = "keyring".to_string();
    Ok(())
}

/// `<data dir>/streamchat/streamchat.sqlite`
pub fn default_db_path() -> Result<PathBuf> {
    let base = dirs::data_local_dir().context("Failed to resolve local data directory")?;
    Ok(base.join("streamchat").join(DB_FILE_NAME))
}
