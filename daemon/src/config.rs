//! Daemon configuration with TOML file support.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use warden_types::{CaptchaSettings, SettingsError};
use warden_utils::LogFormat;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("could not render TOML: {0}")]
    Render(#[from] toml::ser::Error),

    #[error(transparent)]
    Invalid(#[from] SettingsError),

    #[error("reply_timeout_secs must be between 1 and {MAX_REPLY_TIMEOUT_SECS}, got {0}")]
    ReplyTimeout(u64),
}

/// Upper bound on how long an effect may wait for the adapter.
pub const MAX_REPLY_TIMEOUT_SECS: u64 = 300;

/// Configuration for a Warden daemon.
///
/// Can be loaded from a TOML file via [`WardenConfig::from_toml_file`] or
/// built programmatically (e.g. for tests).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WardenConfig {
    /// Port the adapter bridge listens on (`/ws` and `/metrics`).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Membership role granted on successful verification.
    #[serde(default = "default_role_name")]
    pub role_name: String,

    /// Seconds the adapter has to answer an effect.
    #[serde(default = "default_reply_timeout_secs")]
    pub reply_timeout_secs: u64,

    /// Log format: "human" or "json".
    #[serde(default)]
    pub log_format: LogFormat,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// The `[captcha]` table.
    #[serde(default)]
    pub captcha: CaptchaSettings,
}

fn default_port() -> u16 {
    7080
}

fn default_role_name() -> String {
    "Verified".to_string()
}

fn default_reply_timeout_secs() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

// ── Impl ───────────────────────────────────────────────────────────────

impl WardenConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_secs(self.reply_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_REPLY_TIMEOUT_SECS).contains(&self.reply_timeout_secs) {
            return Err(ConfigError::ReplyTimeout(self.reply_timeout_secs));
        }
        Ok(self.captcha.validate()?)
    }
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            role_name: default_role_name(),
            reply_timeout_secs: default_reply_timeout_secs(),
            log_format: LogFormat::default(),
            log_level: default_log_level(),
            captcha: CaptchaSettings::default(),
        }
    }
}
