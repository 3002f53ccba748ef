use thiserror::Error;
use warden_types::{Principal, SettingsError};

use crate::gateway::GatewayError;

#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("invalid settings: {0}")]
    Settings(#[from] SettingsError),

    #[error("challenge generation failed: {0}")]
    Challenge(#[from] warden_captcha::CaptchaError),

    #[error("could not deliver challenge to {principal}: {source}")]
    Delivery {
        principal: Principal,
        #[source]
        source: GatewayError,
    },
}
