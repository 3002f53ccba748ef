//! Fundamental types for the Warden membership gate.
//!
//! This crate defines the core types shared across every other crate in the workspace:
//! principal identities, message handles, verification status and the tunable
//! CAPTCHA settings.

pub mod error;
pub mod message;
pub mod principal;
pub mod settings;
pub mod status;

pub use error::SettingsError;
pub use message::{MessageHandle, MessageOrigin};
pub use principal::Principal;
pub use settings::{CaptchaSettings, MAX_BAN_DURATION_SECS, MAX_CAPTCHA_LENGTH, MAX_TIMEOUT_SECS};
pub use status::VerificationStatus;
