//! Verification session engine.
//!
//! Gates membership of a shared space behind a CAPTCHA:
//! 1. **Issue**: on arrival (or on request) a challenge is generated and
//!    delivered, subject to a per-principal cooldown.
//! 2. **Wait**: the session waits for whichever comes first, a response equal
//!    to the token or the deadline.
//! 3. **Resolve**: success grants the membership role; failure ejects the
//!    principal and counts towards a temporary suspension.
//!
//! All per-principal state lives in the [`SessionRegistry`]; every transition
//! on a principal runs while holding that principal's entry lock.

pub mod engine;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod notice;
pub mod rate_limit;
pub mod registry;
pub mod session;
pub mod tracker;

pub use engine::{IncomingMessage, IssueOutcome, MessageDisposition, VerificationEngine};
pub use error::VerificationError;
pub use gateway::{GatewayError, MessagingGateway};
pub use metrics::EngineMetrics;
pub use notice::Notice;
pub use rate_limit::{RateDecision, RateLimiter};
pub use registry::{PrincipalEntry, PrincipalSnapshot, SessionRegistry};
pub use session::{FailureReason, Session, SessionOutcome};
pub use tracker::{RetryTracker, TrackerAction};
