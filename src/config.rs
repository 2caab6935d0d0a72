//! Static bot configuration loaded from YAML

use crate::enforcement::EnforcementSettings;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default location of the config file
pub const CONFIG_FILE: &str = "config/sentinel.yaml";
/// Environment variable overriding [`CONFIG_FILE`]
pub const CONFIG_ENV: &str = "SENTINEL_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("Log channel {channel_id} belongs to guild {found}, not log guild {expected}")]
    LogChannelGuild {
        channel_id: u64,
        expected: u64,
        found: u64,
    },
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

const fn default_rate_limit_delay_ms() -> u64 {
    750
}

const fn default_settle_delay_ms() -> u64 {
    1000
}

const fn default_audit_window_secs() -> u64 {
    30
}

const fn default_initial_sweep_delay_secs() -> u64 {
    5
}

const fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Guild whose members may run operator commands
    pub control_guild_id: u64,
    /// Guild that owns `log_channel_id`; checked at startup
    pub log_guild_id: u64,
    /// Central audit channel
    pub log_channel_id: u64,
    #[serde(default)]
    pub owner_ids: HashSet<u64>,
    /// Roles in the control guild allowed to operate the bot
    #[serde(default)]
    pub allowed_roles: HashSet<u64>,
    #[serde(default)]
    pub exempt_guilds: HashSet<u64>,
    #[serde(default)]
    pub appeal_link: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_rate_limit_delay_ms")]
    pub rate_limit_delay_ms: u64,
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_audit_window_secs")]
    pub audit_window_secs: u64,
    #[serde(default = "default_initial_sweep_delay_secs")]
    pub initial_sweep_delay_secs: u64,
    /// Periodic sweep interval; 0 disables it
    #[serde(default)]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_true")]
    pub silence_on_store_error: bool,
}

impl Config {
    /// Load from `SENTINEL_CONFIG`, or [`CONFIG_FILE`] when unset
    pub async fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_ENV).map_or_else(|_| PathBuf::from(CONFIG_FILE), PathBuf::from);
        Self::load_from(&path).await
    }

    pub async fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Self::parse(&content).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    #[must_use]
    pub fn is_exempt(&self, guild_id: u64) -> bool {
        self.exempt_guilds.contains(&guild_id)
    }

    /// Whether a member with these roles may run operator commands
    #[must_use]
    pub fn is_operator(&self, user_id: u64, roles: &[u64]) -> bool {
        self.owner_ids.contains(&user_id) || roles.iter().any(|r| self.allowed_roles.contains(r))
    }

    /// Check that the audit channel, found in `channel_guild_id`, lives in
    /// the log guild
    pub fn check_log_channel(&self, channel_guild_id: u64) -> Result<(), ConfigError> {
        if self.log_guild_id == 0 || channel_guild_id == self.log_guild_id {
            return Ok(());
        }
        Err(ConfigError::LogChannelGuild {
            channel_id: self.log_channel_id,
            expected: self.log_guild_id,
            found: channel_guild_id,
        })
    }

    #[must_use]
    pub fn initial_sweep_delay(&self) -> Duration {
        Duration::from_secs(self.initial_sweep_delay_secs)
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }

    #[must_use]
    pub fn enforcement_settings(&self) -> EnforcementSettings {
        EnforcementSettings {
            exempt_guilds: self.exempt_guilds.clone(),
            appeal_link: self.appeal_link.clone(),
            rate_limit_delay: Duration::from_millis(self.rate_limit_delay_ms),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            audit_window: Duration::from_secs(self.audit_window_secs),
            silence_on_store_error: self.silence_on_store_error,
        }
    }
}
