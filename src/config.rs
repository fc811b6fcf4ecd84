use agrisync_core::SyncSettings;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Source of a configuration value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::File => write!(f, "file"),
            ConfigSource::Environment => write!(f, "environment"),
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }
}

fn default_ping_table() -> String {
    agrisync_core::backend::DEFAULT_PING_TABLE.to_string()
}

/// Backend connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Project URL (e.g., "https://abc.example.co")
    pub url: Option<String>,
    /// Anonymous API key
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Table probed by liveness pings
    #[serde(default = "default_ping_table")]
    pub ping_table: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            ping_table: default_ping_table(),
        }
    }
}

impl BackendConfig {
    /// Returns true if the backend is configured (has both url and api_key)
    pub fn is_configured(&self) -> bool {
        self.url.is_some() && self.api_key.is_some()
    }
}

/// Sync timing, in whole seconds unless noted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncTuning {
    pub freshness_window_secs: u64,
    pub ping_interval_secs: u64,
    pub backoff_base_ms: u64,
    pub backoff_cap_secs: u64,
    /// Stop reconnecting after this many consecutive failures (default: never)
    pub max_reconnect_attempts: Option<u32>,
    pub refresh_interval_secs: u64,
    pub event_queue_capacity: usize,
}

impl Default for SyncTuning {
    fn default() -> Self {
        let settings = SyncSettings::default();
        Self {
            freshness_window_secs: settings.freshness_window.as_secs(),
            ping_interval_secs: settings.ping_interval.as_secs(),
            backoff_base_ms: settings.backoff_base.as_millis() as u64,
            backoff_cap_secs: settings.backoff_cap.as_secs(),
            max_reconnect_attempts: settings.max_reconnect_attempts,
            refresh_interval_secs: settings.refresh_interval.as_secs(),
            event_queue_capacity: settings.event_queue_capacity,
        }
    }
}

impl SyncTuning {
    pub fn to_settings(&self) -> SyncSettings {
        SyncSettings {
            freshness_window: Duration::from_secs(self.freshness_window_secs),
            ping_interval: Duration::from_secs(self.ping_interval_secs.max(1)),
            backoff_base: Duration::from_millis(self.backoff_base_ms.max(1)),
            backoff_cap: Duration::from_secs(self.backoff_cap_secs),
            max_reconnect_attempts: self.max_reconnect_attempts,
            refresh_interval: Duration::from_secs(self.refresh_interval_secs.max(1)),
            event_queue_capacity: self.event_queue_capacity.max(1),
            ..SyncSettings::default()
        }
    }
}

/// Application configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Signed-in user, used as the default owner scope
    pub user_id: ConfigValue<Option<String>>,
    /// Log filter used when RUST_LOG is unset
    pub log_filter: ConfigValue<String>,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
    /// Backend connection
    pub backend: BackendConfig,
    /// Sync timing
    pub sync: SyncTuning,
}

/// Internal struct for deserializing config file
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    user_id: Option<String>,
    log_filter: Option<String>,
    backend: Option<BackendConfig>,
    sync: Option<SyncTuning>,
}

pub const DEFAULT_LOG_FILTER: &str = "agrisync=info,agrisync_core=info";

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut user_id = ConfigValue::new(None, ConfigSource::Default);
        let mut log_filter = ConfigValue::new(DEFAULT_LOG_FILTER.to_string(), ConfigSource::Default);
        let mut config_file = None;
        let mut backend = BackendConfig::default();
        let mut sync = SyncTuning::default();

        // Try to load from config file
        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            let file_config: ConfigFile = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;

            config_file = Some(path.clone());

            if let Some(user) = file_config.user_id {
                user_id = ConfigValue::new(Some(user), ConfigSource::File);
            }
            if let Some(filter) = file_config.log_filter {
                log_filter = ConfigValue::new(filter, ConfigSource::File);
            }
            if let Some(backend_config) = file_config.backend {
                backend = backend_config;
            }
            if let Some(sync_config) = file_config.sync {
                sync = sync_config;
            }
        }

        // Apply environment variable overrides
        if let Ok(user) = std::env::var("AGRISYNC_USER_ID") {
            user_id = ConfigValue::new(Some(user), ConfigSource::Environment);
        }
        if let Ok(filter) = std::env::var("AGRISYNC_LOG") {
            log_filter = ConfigValue::new(filter, ConfigSource::Environment);
        }
        if let Ok(url) = std::env::var("AGRISYNC_URL") {
            backend.url = Some(url);
        }
        if let Ok(key) = std::env::var("AGRISYNC_API_KEY") {
            backend.api_key = Some(key);
        }

        Ok(Self {
            user_id,
            log_filter,
            config_file,
            backend,
            sync,
        })
    }

    /// Default config directory (platform-specific):
    /// - Linux: ~/.config/agrisync/
    /// - macOS: ~/Library/Application Support/agrisync/
    /// - Windows: %APPDATA%/agrisync/
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("agrisync")
    }

    /// Default config file path (platform-specific config dir + config.yaml)
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
