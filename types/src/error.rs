//! Errors raised while validating shared settings.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} must be at most {max}")]
    TooLarge { field: &'static str, max: u64 },

    #[error("captcha_length {0} exceeds the maximum of {max}", max = crate::settings::MAX_CAPTCHA_LENGTH)]
    LengthTooLarge(usize),
}
