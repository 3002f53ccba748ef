//! CAPTCHA gate settings.
//!
//! Every field has a serde default, so an empty `[captcha]` table yields the
//! stock configuration.

use crate::error::SettingsError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Longest token the generator will render legibly on the artifact.
pub const MAX_CAPTCHA_LENGTH: usize = 12;

/// Longest answer window: one day.
pub const MAX_TIMEOUT_SECS: u64 = 24 * 60 * 60;

/// Longest suspension: thirty days.
pub const MAX_BAN_DURATION_SECS: u64 = 30 * 24 * 60 * 60;

/// Tunable parameters of the verification session engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptchaSettings {
    // ── Session ──────────────────────────────────────────────────────────
    /// Seconds a principal has to answer a challenge.
    #[serde(default = "default_timeout_secs")]
    pub captcha_timeout_secs: u64,

    /// Number of characters in a challenge token.
    #[serde(default = "default_length")]
    pub captcha_length: usize,

    /// Optional cap on non-matching responses within one challenge.
    /// `None` lets the principal keep guessing until the deadline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captcha_attempts_limit: Option<u32>,

    // ── Rate limiting ────────────────────────────────────────────────────
    /// Minimum seconds between two challenge issuances to the same principal.
    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_secs: u64,

    // ── Escalation ───────────────────────────────────────────────────────
    /// Consecutive failures that trigger a temporary suspension.
    #[serde(default = "default_retry_limit")]
    pub captcha_retry_limit: u32,

    /// Seconds a suspension lasts before it is lifted automatically.
    #[serde(default = "default_ban_duration_secs")]
    pub captcha_retry_ban_duration_secs: u64,
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_length() -> usize {
    6
}

fn default_rate_limit_window_secs() -> u64 {
    60
}

fn default_retry_limit() -> u32 {
    3
}

fn default_ban_duration_secs() -> u64 {
    300
}

impl CaptchaSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.captcha_timeout_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    pub fn ban_duration(&self) -> Duration {
        Duration::from_secs(self.captcha_retry_ban_duration_secs)
    }

    /// Reject settings the engine cannot run with.
    ///
    /// A zero cooldown is allowed (no rate limiting); a zero timeout, token
    /// length or retry limit is not. Durations are capped so deadlines always
    /// fit in an `Instant`.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.captcha_timeout_secs == 0 {
            return Err(SettingsError::Zero {
                field: "captcha_timeout_secs",
            });
        }
        if self.captcha_timeout_secs > MAX_TIMEOUT_SECS {
            return Err(SettingsError::TooLarge {
                field: "captcha_timeout_secs",
                max: MAX_TIMEOUT_SECS,
            });
        }
        if self.captcha_retry_ban_duration_secs > MAX_BAN_DURATION_SECS {
            return Err(SettingsError::TooLarge {
                field: "captcha_retry_ban_duration_secs",
                max: MAX_BAN_DURATION_SECS,
            });
        }
        if self.captcha_length == 0 {
            return Err(SettingsError::Zero {
                field: "captcha_length",
            });
        }
        if self.captcha_length > MAX_CAPTCHA_LENGTH {
            return Err(SettingsError::LengthTooLarge(self.captcha_length));
        }
        if self.captcha_retry_limit == 0 {
            return Err(SettingsError::Zero {
                field: "captcha_retry_limit",
            });
        }
        if self.captcha_attempts_limit == Some(0) {
            return Err(SettingsError::Zero {
                field: "captcha_attempts_limit",
            });
        }
        Ok(())
    }
}

impl Default for CaptchaSettings {
    fn default() -> Self {
        Self {
            captcha_timeout_secs: default_timeout_secs(),
            captcha_length: default_length(),
            captcha_attempts_limit: None,
            rate_limit_window_secs: default_rate_limit_window_secs(),
            captcha_retry_limit: default_retry_limit(),
            captcha_retry_ban_duration_secs: default_ban_duration_secs(),
        }
    }
}
