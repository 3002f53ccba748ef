//! Verification status of a principal.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a principal stands in the verification lifecycle.
///
/// Exactly one status is held per principal at any instant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    /// Never challenged, or back to a clean slate after a failure.
    #[default]
    Unverified,
    /// A challenge is outstanding.
    Pending,
    /// Solved a challenge; membership granted.
    Verified,
    /// Banned after too many consecutive failures, until the ban is lifted.
    Suspended,
}

impl VerificationStatus {
    /// Whether a fresh challenge may be issued from this status
    /// (rate limiting aside).
    pub fn can_be_challenged(&self) -> bool {
        matches!(self, Self::Unverified)
    }

    /// Whether messages from the principal may reach the shared space.
    pub fn may_speak(&self) -> bool {
        matches!(self, Self::Verified)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unverified => "unverified",
            Self::Pending => "pending",
            Self::Verified => "verified",
            Self::Suspended => "suspended",
        }
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
