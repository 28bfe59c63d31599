//! Configuration management for keysync services

use config::{builder::DefaultState, Config, ConfigBuilder, ConfigError, Environment};
use serde::Deserialize;

/// Environment variable prefix, e.g. `KEYSYNC_SYNC_INTERVAL_SECS`
pub const ENV_PREFIX: &str = "KEYSYNC";

/// Storage backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Process-local map, lost on exit
    Memory,
    /// One file per key under `storage_path`
    File,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Console,
}

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct KeysyncConfig {
    pub backend: BackendKind,
    pub storage_path: String,
    pub sync_interval_secs: u64,
    pub watch: bool,
    pub compress: bool,
    pub grace_period_secs: u64,
    pub rotation_lease_secs: u64,
    pub prune_missing: bool,
    pub key_ttl_secs: u64,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl KeysyncConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        Self::builder()?
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize::<Self>()?
            .validated()
    }

    /// Builder pre-populated with the defaults.
    ///
    /// Callers layer their own sources on top; `from_env` adds the environment.
    pub fn builder() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Config::builder()
            .set_default("backend", "memory")?
            .set_default("storage_path", "./keys")?
            .set_default("sync_interval_secs", 60)?
            .set_default("watch", false)?
            .set_default("compress", true)?
            .set_default("grace_period_secs", 2 * 60 * 60)?
            .set_default("rotation_lease_secs", 5 * 60)?
            .set_default("prune_missing", false)?
            .set_default("key_ttl_secs", 24 * 60 * 60)?
            .set_default("log_level", "info")?
            .set_default("log_format", "json")
    }

    /// Reject values the key store cannot run with
    pub fn validated(self) -> Result<Self, ConfigError> {
        if self.sync_interval_secs == 0 {
            return Err(ConfigError::Message(
                "sync_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.rotation_lease_secs == 0 {
            return Err(ConfigError::Message(
                "rotation_lease_secs must be greater than zero".to_string(),
            ));
        }
        Ok(self)
    }

    /// Get log level, defaulting to "info"
    pub fn log_level(&self) -> &str {
        if self.log_level.is_empty() {
            "info"
        } else {
            &self.log_level
        }
    }
}
