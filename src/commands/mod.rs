mod config_cmd;
mod fetch;
mod resource;
mod status;
mod watch;

use std::sync::Arc;

use agrisync_core::{RealtimeTransport, RestClient, SubscriptionManager, SyncError};
use clap::ValueEnum;

use crate::config::Config;

pub use config_cmd::ConfigCommand;
pub use fetch::FetchCommand;
pub use resource::ResourceArg;
pub use status::StatusCommand;
pub use watch::WatchCommand;

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Builds the sync service against the configured backend.
pub fn connect(config: &Config) -> Result<SubscriptionManager, CommandError> {
    let (url, api_key) = match (&config.backend.url, &config.backend.api_key) {
        (Some(url), Some(key)) => (url.clone(), key.clone()),
        _ => return Err(CommandError::Sync(SyncError::NotConfigured)),
    };
    let settings = config.sync.to_settings();

    let query = RestClient::new(url.clone(), api_key.clone())
        .with_ping_table(config.backend.ping_table.clone());
    let feed = RealtimeTransport::new(url, api_key).with_heartbeat_interval(settings.ping_interval);

    Ok(SubscriptionManager::new(
        Arc::new(feed),
        Arc::new(query),
        settings,
    ))
}

pub fn runtime() -> Result<tokio::runtime::Runtime, CommandError> {
    tokio::runtime::Runtime::new().map_err(|e| CommandError::Runtime(e.to_string()))
}

/// Errors from sync commands
#[derive(Debug)]
pub enum CommandError {
    Sync(SyncError),
    MissingScope(&'static str),
    Output(serde_json::Error),
    Runtime(String),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::Sync(e) => write!(f, "{}", e),
            CommandError::MissingScope(resource) => write!(
                f,
                "No scope for '{}'. Pass --scope column=value or set user_id in config.",
                resource
            ),
            CommandError::Output(e) => write!(f, "Output error: {}", e),
            CommandError::Runtime(e) => write!(f, "Runtime error: {}", e),
        }
    }
}

impl std::error::Error for CommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CommandError::Sync(e) => Some(e),
            CommandError::Output(e) => Some(e),
            CommandError::MissingScope(_) | CommandError::Runtime(_) => None,
        }
    }
}

impl From<SyncError> for CommandError {
    fn from(e: SyncError) -> Self {
        CommandError::Sync(e)
    }
}

impl From<serde_json::Error> for CommandError {
    fn from(e: serde_json::Error) -> Self {
        CommandError::Output(e)
    }
}
