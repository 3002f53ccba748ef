//! A live challenge and its two-outcome wait.
//!
//! The wait is a `select!` between a signal from the response matcher and
//! the deadline. Cancellation (an explicit retry) aborts the waiting task
//! outright, so a cancelled session never produces an outcome.

use std::fmt;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use warden_types::{MessageHandle, Principal};

/// Raised by the response matcher to end a wait early.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionSignal {
    /// The principal sent the token.
    Matched,
    /// The principal used up the per-challenge response allowance.
    Exhausted,
}

/// Why a session failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureReason {
    Timeout,
    TooManyAttempts,
    /// The wait ended without a signal or deadline; never leaves a principal
    /// stuck in `Pending`.
    Unexpected,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.write_str("timeout"),
            Self::TooManyAttempts => f.write_str("too many attempts"),
            Self::Unexpected => f.write_str("an unexpected error"),
        }
    }
}

/// Terminal result of a session wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionOutcome {
    Verified,
    Failed(FailureReason),
}

/// Wait for whichever comes first: a matcher signal or the deadline.
///
/// A signal sent before the deadline wins even if both are ready when polled.
pub async fn wait_for_outcome(
    signal: oneshot::Receiver<SessionSignal>,
    deadline: Instant,
) -> SessionOutcome {
    tokio::select! {
        biased;
        received = signal => match received {
            Ok(SessionSignal::Matched) => SessionOutcome::Verified,
            Ok(SessionSignal::Exhausted) => SessionOutcome::Failed(FailureReason::TooManyAttempts),
            Err(_) => SessionOutcome::Failed(FailureReason::Unexpected),
        },
        _ = tokio::time::sleep_until(deadline) => SessionOutcome::Failed(FailureReason::Timeout),
    }
}

/// The live record of an outstanding challenge.
pub struct Session {
    principal: Principal,
    generation: u64,
    token: String,
    issued_at: Instant,
    deadline: Instant,
    message: MessageHandle,
    mismatches: u32,
    signal: Option<oneshot::Sender<SessionSignal>>,
    wait: Option<JoinHandle<()>>,
}

impl Session {
    /// Create a session and the receiving half its wait task listens on.
    pub fn new(
        principal: Principal,
        generation: u64,
        token: String,
        issued_at: Instant,
        deadline: Instant,
        message: MessageHandle,
    ) -> (Self, oneshot::Receiver<SessionSignal>) {
        let (tx, rx) = oneshot::channel();
        let session = Self {
            principal,
            generation,
            token,
            issued_at,
            deadline,
            message,
            mismatches: 0,
            signal: Some(tx),
            wait: None,
        };
        (session, rx)
    }

    pub fn principal(&self) -> Principal {
        self.principal
    }

    /// Distinguishes this session from earlier ones for the same principal,
    /// so a wait that lost a race with a replacement resolves nothing.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn issued_at(&self) -> Instant {
        self.issued_at
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Handle of the delivered challenge message.
    pub fn message(&self) -> MessageHandle {
        self.message
    }

    pub fn mismatches(&self) -> u32 {
        self.mismatches
    }

    /// Exact, case-sensitive comparison against the token.
    pub fn matches(&self, text: &str) -> bool {
        text == self.token
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    /// Whether the matcher already ended the wait and resolution is underway.
    pub fn is_resolving(&self) -> bool {
        self.signal.is_none()
    }

    /// Count a non-matching response; returns the new count.
    pub(crate) fn record_mismatch(&mut self) -> u32 {
        self.mismatches += 1;
        self.mismatches
    }

    /// Send `signal` to the wait. Only the first signal counts.
    pub(crate) fn signal(&mut self, signal: SessionSignal) -> bool {
        match self.signal.take() {
            Some(tx) => tx.send(signal).is_ok(),
            None => false,
        }
    }

    pub(crate) fn attach_wait(&mut self, wait: JoinHandle<()>) {
        self.wait = Some(wait);
    }

    /// Abort the wait without producing an outcome; returns the message to
    /// delete.
    pub(crate) fn cancel(mut self) -> MessageHandle {
        if let Some(wait) = self.wait.take() {
            wait.abort();
        }
        self.message
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("principal", &self.principal)
            .field("generation", &self.generation)
            .field("message", &self.message)
            .field("mismatches", &self.mismatches)
            .field("resolving", &self.is_resolving())
            .finish_non_exhaustive()
    }
}
