//! Per-principal challenge cooldown.
//!
//! The limiter is read-only: it only answers whether a challenge may be
//! issued now. The registry records the issuance time, and only after a
//! challenge was actually delivered, so probing never resets a cooldown.

use std::time::Duration;

use tokio::time::Instant;
use warden_utils::whole_secs_ceil;

/// Answer of a cooldown check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    /// Still cooling down; `remaining_secs` is rounded up and never 0.
    Limited { remaining_secs: u64 },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Enforces a minimum gap between successive issuances to one principal.
#[derive(Clone, Copy, Debug)]
pub struct RateLimiter {
    cooldown: Duration,
}

impl RateLimiter {
    pub fn new(cooldown: Duration) -> Self {
        Self { cooldown }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Check whether a challenge may be issued at `now`, given the last
    /// issuance recorded for the principal (if any).
    pub fn may_issue(&self, last_issued: Option<Instant>, now: Instant) -> RateDecision {
        let Some(last) = last_issued else {
            return RateDecision::Allowed;
        };
        let elapsed = now.saturating_duration_since(last);
        if elapsed >= self.cooldown {
            RateDecision::Allowed
        } else {
            RateDecision::Limited {
                remaining_secs: whole_secs_ceil(self.cooldown - elapsed),
            }
        }
    }
}
