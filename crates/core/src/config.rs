use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid TOML at line {line}, column {column}: {message}")]
    InvalidToml {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("I/O error reading configuration: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub event_bus: EventBusConfig,
}

/// Tunables of the reconciliation engine.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncConfig {
    /// Max distance between an optimistic message and its confirmation
    #[serde(default = "default_temp_match_window_secs")]
    pub temp_match_window_secs: u64,
    /// A typing indicator with no refresh expires after this long
    #[serde(default = "default_typing_timeout_secs")]
    pub typing_timeout_secs: u64,
    /// Local keystroke idle time before `stop-typing` is emitted
    #[serde(default = "default_typing_idle_secs")]
    pub typing_idle_secs: u64,
    #[serde(default = "default_conversations_page_size")]
    pub conversations_page_size: u32,
    #[serde(default = "default_messages_page_size")]
    pub messages_page_size: u32,
    #[serde(default = "default_users_page_size")]
    pub users_page_size: u32,
    /// Messages kept per conversation in the list
    #[serde(default = "default_chat_preview_limit")]
    pub chat_preview_limit: usize,
    #[serde(default = "default_online_strip_limit")]
    pub online_strip_limit: usize,
}

impl SyncConfig {
    pub fn temp_match_window(&self) -> Duration {
        Duration::from_secs(self.temp_match_window_secs)
    }

    pub fn typing_timeout(&self) -> Duration {
        Duration::from_secs(self.typing_timeout_secs)
    }

    pub fn typing_idle(&self) -> Duration {
        Duration::from_secs(self.typing_idle_secs)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            temp_match_window_secs: default_temp_match_window_secs(),
            typing_timeout_secs: default_typing_timeout_secs(),
            typing_idle_secs: default_typing_idle_secs(),
            conversations_page_size: default_conversations_page_size(),
            messages_page_size: default_messages_page_size(),
            users_page_size: default_users_page_size(),
            chat_preview_limit: default_chat_preview_limit(),
            online_strip_limit: default_online_strip_limit(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EventBusConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[derive(Debug, Default, Clone)]
struct ConfigOverrides {
    log_level: Option<String>,
    temp_match_window_secs: Option<String>,
    typing_timeout_secs: Option<String>,
}

fn default_temp_match_window_secs() -> u64 {
    10
}

fn default_typing_timeout_secs() -> u64 {
    6
}

fn default_typing_idle_secs() -> u64 {
    2
}

fn default_conversations_page_size() -> u32 {
    10
}

fn default_messages_page_size() -> u32 {
    20
}

fn default_users_page_size() -> u32 {
    10
}

fn default_chat_preview_limit() -> usize {
    10
}

fn default_online_strip_limit() -> usize {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_channel_capacity() -> usize {
    1024
}

const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

const DEFAULT_CONFIG_TOML: &str = r#"# Murmur configuration.
# MURMUR_LOG_LEVEL, MURMUR_TEMP_MATCH_WINDOW_SECS and
# MURMUR_TYPING_TIMEOUT_SECS override the values below.

[sync]
# Max distance between an optimistic message and its confirmation
temp_match_window_secs = 10
# A remote typing indicator expires after this long without a refresh
typing_timeout_secs = 6
# Local typing stops this long after the last keystroke
typing_idle_secs = 2
conversations_page_size = 10
messages_page_size = 20
users_page_size = 10
# Messages kept per conversation for previews and receipt ticks
chat_preview_limit = 10
online_strip_limit = 8

[logging]
# trace, debug, info, warn or error
level = "info"

[event_bus]
channel_capacity = 1024
"#;

/// Return the resolved platform-appropriate configuration file path.
#[cfg(feature = "native")]
pub fn config_path() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("com", "murmur", "murmur") {
        proj_dirs.config_dir().join("config.toml")
    } else {
        PathBuf::from("config.toml")
    }
}

/// Load configuration from the platform config path, merging environment
/// variable overrides.
#[cfg(feature = "native")]
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(config_path())
}

/// Load configuration from a specific path. A missing file is created with
/// the defaults, which are then used.
pub fn load_config_from(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    load_config_from_with_overrides(path.as_ref(), config_overrides_from_env())
}

/// Parse configuration from a TOML string directly.
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    load_config_from_str_with_overrides(toml_str, config_overrides_from_env())
}

fn load_config_from_with_overrides(
    path: &Path,
    overrides: ConfigOverrides,
) -> Result<Config, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            create_default_config(path)?;
            tracing::info!(path = %path.display(), "created default configuration");
            DEFAULT_CONFIG_TOML.to_string()
        }
        Err(e) => return Err(ConfigError::Io(e)),
    };

    load_config_from_str_with_overrides(&contents, overrides)
}

fn load_config_from_str_with_overrides(
    toml_str: &str,
    overrides: ConfigOverrides,
) -> Result<Config, ConfigError> {
    let mut config: Config = toml::from_str(toml_str).map_err(|e| {
        let (line, column) = e.span().map_or((0, 0), |span| {
            let before = &toml_str[..span.start];
            let line = before.chars().filter(|&c| c == '\n').count() + 1;
            let column = before
                .rfind('\n')
                .map_or(span.start + 1, |nl| span.start - nl);
            (line, column)
        });
        ConfigError::InvalidToml {
            line,
            column,
            message: e.message().to_string(),
        }
    })?;

    apply_overrides(&mut config, overrides)?;
    validate(&config)?;

    Ok(config)
}

fn config_overrides_from_env() -> ConfigOverrides {
    ConfigOverrides {
        log_level: std::env::var("MURMUR_LOG_LEVEL").ok(),
        temp_match_window_secs: std::env::var("MURMUR_TEMP_MATCH_WINDOW_SECS").ok(),
        typing_timeout_secs: std::env::var("MURMUR_TYPING_TIMEOUT_SECS").ok(),
    }
}

fn parse_secs(field: &str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        message: format!("expected a whole number of seconds, got {raw:?}"),
    })
}

fn apply_overrides(config: &mut Config, overrides: ConfigOverrides) -> Result<(), ConfigError> {
    if let Some(level) = overrides.log_level {
        config.logging.level = level;
    }
    if let Some(raw) = overrides.temp_match_window_secs {
        config.sync.temp_match_window_secs = parse_secs("sync.temp_match_window_secs", &raw)?;
    }
    if let Some(raw) = overrides.typing_timeout_secs {
        config.sync.typing_timeout_secs = parse_secs("sync.typing_timeout_secs", &raw)?;
    }
    Ok(())
}

fn require_positive(field: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            message: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    let sync = &config.sync;
    require_positive("sync.temp_match_window_secs", sync.temp_match_window_secs)?;
    require_positive("sync.typing_timeout_secs", sync.typing_timeout_secs)?;
    require_positive("sync.typing_idle_secs", sync.typing_idle_secs)?;
    require_positive(
        "sync.conversations_page_size",
        u64::from(sync.conversations_page_size),
    )?;
    require_positive("sync.messages_page_size", u64::from(sync.messages_page_size))?;
    require_positive("sync.users_page_size", u64::from(sync.users_page_size))?;
    require_positive("sync.chat_preview_limit", sync.chat_preview_limit as u64)?;
    require_positive("sync.online_strip_limit", sync.online_strip_limit as u64)?;
    require_positive(
        "event_bus.channel_capacity",
        config.event_bus.channel_capacity as u64,
    )?;

    if !VALID_LOG_LEVELS.contains(&config.logging.level.as_str()) {
        return Err(ConfigError::InvalidValue {
            field: "logging.level".to_string(),
            message: format!("must be one of: {}", VALID_LOG_LEVELS.join(", ")),
        });
    }

    Ok(())
}

fn create_default_config(path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, DEFAULT_CONFIG_TOML)?;
    Ok(())
}
