//! Command line interface. Flags and `WARDEN_*` environment variables
//! override values from the TOML file.

use clap::Parser;
use std::path::PathBuf;

use warden_utils::LogFormat;

use crate::config::WardenConfig;

#[derive(Debug, Parser)]
#[command(name = "warden-daemon", about = "CAPTCHA membership gate daemon")]
pub struct Cli {
    /// Path to a TOML configuration file. If provided, file settings
    /// are used as the base; CLI flags and env vars override them.
    #[arg(long, env = "WARDEN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Port for the adapter bridge.
    #[arg(long, env = "WARDEN_PORT")]
    pub port: Option<u16>,

    /// Membership role granted on successful verification.
    #[arg(long, env = "WARDEN_ROLE")]
    pub role: Option<String>,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[arg(long, env = "WARDEN_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Log format: "human" or "json".
    #[arg(long, env = "WARDEN_LOG_FORMAT")]
    pub log_format: Option<LogFormat>,

    /// Seconds a principal has to answer a challenge.
    #[arg(long, env = "WARDEN_CAPTCHA_TIMEOUT")]
    pub captcha_timeout: Option<u64>,

    /// Characters in a challenge token.
    #[arg(long, env = "WARDEN_CAPTCHA_LENGTH")]
    pub captcha_length: Option<usize>,

    /// Non-matching responses allowed per challenge (unbounded when unset).
    #[arg(long, env = "WARDEN_CAPTCHA_ATTEMPTS_LIMIT")]
    pub captcha_attempts_limit: Option<u32>,

    /// Minimum seconds between challenges to the same principal.
    #[arg(long, env = "WARDEN_RATE_LIMIT_WINDOW")]
    pub rate_limit_window: Option<u64>,

    /// Consecutive failures before a suspension.
    #[arg(long, env = "WARDEN_RETRY_LIMIT")]
    pub retry_limit: Option<u32>,

    /// Seconds a suspension lasts.
    #[arg(long, env = "WARDEN_BAN_DURATION")]
    pub ban_duration: Option<u64>,

    /// Subcommand.
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::Subcommand)]
pub enum Command {
    /// Run the engine and the adapter bridge.
    Run,
    /// Print the effective configuration as TOML.
    PrintConfig,
}

impl Cli {
    /// Layer the flags over `base`.
    pub fn apply(&self, base: WardenConfig) -> WardenConfig {
        let mut config = base;
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(role) = &self.role {
            config.role_name = role.clone();
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }

        let captcha = &mut config.captcha;
        if let Some(secs) = self.captcha_timeout {
            captcha.captcha_timeout_secs = secs;
        }
        if let Some(length) = self.captcha_length {
            captcha.captcha_length = length;
        }
        if let Some(limit) = self.captcha_attempts_limit {
            captcha.captcha_attempts_limit = Some(limit);
        }
        if let Some(secs) = self.rate_limit_window {
            captcha.rate_limit_window_secs = secs;
        }
        if let Some(limit) = self.retry_limit {
            captcha.captcha_retry_limit = limit;
        }
        if let Some(secs) = self.ban_duration {
            captcha.captcha_retry_ban_duration_secs = secs;
        }
        config
    }
}
