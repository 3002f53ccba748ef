//! Informational text sent to principals.

use std::fmt;

use warden_utils::format_duration;

use crate::session::FailureReason;

/// A message the engine sends to a principal, either as a policy rejection
/// or to announce an outcome.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notice {
    RateLimited { remaining_secs: u64 },
    AlreadyVerified,
    AlreadyPending,
    /// `retry` without a live challenge.
    NotPending,
    /// `retry` after the live challenge already ended (answered or expired).
    ChallengeClosed,
    Suspended { remaining_secs: u64 },
    VerifyFirst,
    Verified,
    Failed { reason: FailureReason },
}

impl Notice {
    /// Whether this notice rejects a request (as opposed to reporting an outcome).
    pub fn is_rejection(&self) -> bool {
        !matches!(
            self,
            Self::VerifyFirst | Self::Verified | Self::Failed { .. }
        )
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited { remaining_secs } => write!(
                f,
                "You've exceeded the rate limit. Please wait for {remaining_secs} seconds before trying again."
            ),
            Self::AlreadyVerified => f.write_str("You are already verified."),
            Self::AlreadyPending => f.write_str(
                "You are currently undergoing verification. Use retry to get a fresh CAPTCHA.",
            ),
            Self::NotPending => f.write_str(
                "You have no CAPTCHA to refresh. Use new-challenge to request one.",
            ),
            Self::ChallengeClosed => {
                f.write_str("This CAPTCHA has already closed and can no longer be refreshed.")
            }
            Self::Suspended { remaining_secs } => write!(
                f,
                "You are suspended for failing verification too many times. Try again in {}.",
                format_duration(*remaining_secs)
            ),
            Self::VerifyFirst => f.write_str(
                "You must verify the CAPTCHA before you can send messages in the server.",
            ),
            Self::Verified => {
                f.write_str("CAPTCHA verification successful! Welcome to the server.")
            }
            Self::Failed { reason } => write!(
                f,
                "CAPTCHA verification failed: {reason}. You have been removed from the server."
            ),
        }
    }
}

/// Caption delivered alongside a challenge artifact.
pub fn challenge_caption(timeout_secs: u64) -> String {
    format!(
        "CAPTCHA Verification\n\
         Type the text displayed in the image in the chat. The CAPTCHA is case-sensitive.\n\
         You have {} to solve the CAPTCHA. Use retry to refresh the CAPTCHA.",
        format_duration(timeout_secs)
    )
}
