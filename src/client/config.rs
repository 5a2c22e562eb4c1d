use crate::shared::config::{AppConfig, AppConfigBuilder, ConfigError};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Directory under the platform data dir holding local state
const DATA_DIR_NAME: &str = "sponsorlink";

/// Database file name
const DB_FILE_NAME: &str = "local.db";

const ENV_MAX_SEND_ATTEMPTS: &str = "SPONSORLINK_MAX_SEND_ATTEMPTS";
const ENV_TYPING_DECAY_MS: &str = "SPONSORLINK_TYPING_DECAY_MS";
const ENV_HISTORY_PAGE_SIZE: &str = "SPONSORLINK_HISTORY_PAGE_SIZE";
const ENV_DB_PATH: &str = "SPONSORLINK_DB_PATH";

/// Client configuration wrapper.
#[derive(Debug, Clone)]
pub struct Config {
    app: AppConfig,
    db_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app: AppConfig::default(),
            db_path: default_db_path(),
        }
    }
}

impl Config {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `SPONSORLINK_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut builder = AppConfig::builder();
        if let Some(attempts) = env_value::<u32>(ENV_MAX_SEND_ATTEMPTS)? {
            builder = builder.max_send_attempts(attempts);
        }
        if let Some(millis) = env_value::<u64>(ENV_TYPING_DECAY_MS)? {
            builder = builder.typing_decay(Duration::from_millis(millis));
        }
        if let Some(page) = env_value::<u32>(ENV_HISTORY_PAGE_SIZE)? {
            builder = builder.history_page_size(page);
        }
        let mut config = Self::with_builder(builder)?;
        if let Ok(path) = std::env::var(ENV_DB_PATH) {
            if !path.trim().is_empty() {
                config.db_path = PathBuf::from(path);
            }
        }
        Ok(config)
    }

    pub fn with_builder(builder: AppConfigBuilder) -> Result<Self, ConfigError> {
        Ok(Self {
            app: builder.build()?,
            db_path: default_db_path(),
        })
    }

    /// Core tunables
    pub fn app(&self) -> &AppConfig {
        &self.app
    }

    /// Location of the SQLite file backing the offline queue
    pub fn db_path(&self) -> &std::path::Path {
        &self.db_path
    }

    pub fn set_db_path(&mut self, path: impl Into<PathBuf>) {
        self.db_path = path.into();
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(DATA_DIR_NAME)
        .join(DB_FILE_NAME)
}

fn env_value<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { name, value: raw }),
        Err(_) => Ok(None),
    }
}
