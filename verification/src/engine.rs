//! The verification engine. Drives every principal through
//! `Unverified → Pending → {Verified, Unverified/Suspended}`.
//!
//! Each public operation locks the principal's registry entry, decides, and
//! applies its effects through the [`MessagingGateway`] before releasing the
//! lock. Session waits and suspension lifts run as their own tasks and
//! re-enter through the same lock.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use warden_captcha::ChallengeGenerator;
use warden_types::{
    CaptchaSettings, MessageHandle, MessageOrigin, Principal, VerificationStatus,
    MAX_BAN_DURATION_SECS,
};
use warden_utils::whole_secs_ceil;

use crate::error::VerificationError;
use crate::gateway::MessagingGateway;
use crate::metrics::EngineMetrics;
use crate::notice::{challenge_caption, Notice};
use crate::rate_limit::{RateDecision, RateLimiter};
use crate::registry::{PrincipalEntry, PrincipalSnapshot, SessionRegistry};
use crate::session::{wait_for_outcome, Session, SessionOutcome, SessionSignal};
use crate::tracker::{RetryTracker, SuspensionTimer, TrackerAction};

/// Result of a request for a challenge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IssueOutcome {
    /// A challenge was delivered; the principal is now `Pending`.
    Issued { handle: MessageHandle },
    /// A policy rule refused the request; nothing changed.
    Rejected(Notice),
}

impl IssueOutcome {
    pub fn is_issued(&self) -> bool {
        matches!(self, Self::Issued { .. })
    }
}

/// A text message observed on the platform.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IncomingMessage {
    pub principal: Principal,
    pub text: String,
    pub origin: MessageOrigin,
    /// Needed to suppress a message posted in the shared space.
    pub handle: Option<MessageHandle>,
}

impl IncomingMessage {
    pub fn direct(principal: Principal, text: impl Into<String>) -> Self {
        Self {
            principal,
            text: text.into(),
            origin: MessageOrigin::Direct,
            handle: None,
        }
    }

    pub fn space(principal: Principal, text: impl Into<String>, handle: MessageHandle) -> Self {
        Self {
            principal,
            text: text.into(),
            origin: MessageOrigin::Space,
            handle: Some(handle),
        }
    }
}

/// What the engine did with an observed message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageDisposition {
    /// Sender is verified; the message is left alone.
    PassThrough,
    /// The text equalled the live token; the session resolves as verified.
    Matched,
    /// A non-matching response while pending.
    Mismatched,
    /// Nothing to match against (no live session, or it already closed),
    /// or non-token chatter in the shared space from a pending sender.
    Ignored,
    /// A shared-space message from a non-pending, unverified sender: deleted
    /// and answered with a fresh challenge.
    Suppressed,
}

struct EngineInner {
    settings: CaptchaSettings,
    registry: SessionRegistry,
    limiter: RateLimiter,
    tracker: RetryTracker,
    generator: Arc<dyn ChallengeGenerator>,
    gateway: Arc<dyn MessagingGateway>,
    metrics: EngineMetrics,
}

/// Cheap to clone; every clone drives the same registry.
#[derive(Clone)]
pub struct VerificationEngine {
    inner: Arc<EngineInner>,
}

impl VerificationEngine {
    pub fn new(
        settings: CaptchaSettings,
        generator: Arc<dyn ChallengeGenerator>,
        gateway: Arc<dyn MessagingGateway>,
    ) -> Result<Self, VerificationError> {
        settings.validate()?;
        let limiter = RateLimiter::new(settings.cooldown());
        let tracker = RetryTracker::new(settings.captcha_retry_limit);
        Ok(Self {
            inner: Arc::new(EngineInner {
                settings,
                registry: SessionRegistry::new(),
                limiter,
                tracker,
                generator,
                gateway,
                metrics: EngineMetrics::new(),
            }),
        })
    }

    pub fn settings(&self) -> &CaptchaSettings {
        &self.inner.settings
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.inner.metrics
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    pub async fn snapshot(&self, principal: Principal) -> PrincipalSnapshot {
        self.inner.registry.snapshot(principal).await
    }

    pub async fn status(&self, principal: Principal) -> VerificationStatus {
        self.snapshot(principal).await.status
    }

    // ── Commands ────────────────────────────────────────────────────────

    /// A principal joined the shared space.
    ///
    /// Already-verified members rejoin silently; every other rejection is
    /// reported to the principal.
    pub async fn on_arrival(&self, principal: Principal) -> Result<IssueOutcome, VerificationError> {
        tracing::info!(%principal, "principal arrived");
        let mut entry = self.inner.registry.lock(principal).await;
        let outcome = self.issue_locked(&mut entry, principal).await;
        if let Ok(IssueOutcome::Rejected(notice)) = &outcome {
            if *notice != Notice::AlreadyVerified {
                self.notify(principal, notice).await;
            }
        }
        self.inner.registry.release(principal, entry).await;
        outcome
    }

    /// Explicit request for a challenge while neither verified nor pending.
    pub async fn new_challenge(
        &self,
        principal: Principal,
    ) -> Result<IssueOutcome, VerificationError> {
        let mut entry = self.inner.registry.lock(principal).await;
        let outcome = self.issue_locked(&mut entry, principal).await;
        if let Ok(IssueOutcome::Rejected(notice)) = &outcome {
            self.notify(principal, notice).await;
        }
        self.inner.registry.release(principal, entry).await;
        outcome
    }

    /// Replace the live challenge with a fresh one.
    ///
    /// The cooldown is checked before the old challenge is touched, so a
    /// rejected retry leaves the running session intact.
    pub async fn retry(&self, principal: Principal) -> Result<IssueOutcome, VerificationError> {
        let mut entry = self.inner.registry.lock(principal).await;
        let outcome = self.retry_locked(&mut entry, principal).await;
        self.inner.registry.release(principal, entry).await;
        outcome
    }

    /// Observe a text message.
    pub async fn on_message(&self, message: IncomingMessage) -> MessageDisposition {
        let principal = message.principal;
        let mut entry = self.inner.registry.lock(principal).await;
        let disposition = self.observe_locked(&mut entry, message).await;
        self.inner.registry.release(principal, entry).await;
        disposition
    }

    // ── Internals ───────────────────────────────────────────────────────

    async fn retry_locked(
        &self,
        entry: &mut PrincipalEntry,
        principal: Principal,
    ) -> Result<IssueOutcome, VerificationError> {
        let rejection = if entry.status() != VerificationStatus::Pending {
            Some(Notice::NotPending)
        } else if entry
            .session()
            .map_or(true, |s| s.is_resolving() || s.is_expired(Instant::now()))
        {
            Some(Notice::ChallengeClosed)
        } else if let RateDecision::Limited { remaining_secs } = self
            .inner
            .limiter
            .may_issue(entry.last_issued(), Instant::now())
        {
            self.inner.metrics.challenges_rate_limited.inc();
            Some(Notice::RateLimited { remaining_secs })
        } else {
            None
        };
        if let Some(notice) = rejection {
            tracing::debug!(%principal, %notice, "retry rejected");
            self.notify(principal, &notice).await;
            return Ok(IssueOutcome::Rejected(notice));
        }

        if let Some(old) = entry.cancel_session() {
            self.inner.metrics.pending_sessions.dec();
            tracing::info!(%principal, message = %old, "challenge cancelled for retry");
            self.delete(old).await;
        }
        self.issue_locked(entry, principal).await
    }

    async fn observe_locked(
        &self,
        entry: &mut PrincipalEntry,
        message: IncomingMessage,
    ) -> MessageDisposition {
        let IncomingMessage {
            principal,
            text,
            origin,
            handle,
        } = message;

        if entry.status().may_speak() {
            return MessageDisposition::PassThrough;
        }

        if origin == MessageOrigin::Space {
            match handle {
                Some(handle) => self.delete(handle).await,
                None => tracing::debug!(%principal, "space message without handle, cannot delete"),
            }
        }

        if entry.status() == VerificationStatus::Pending {
            return self.match_response(entry, principal, &text, origin);
        }

        if origin == MessageOrigin::Direct {
            tracing::debug!(%principal, "direct message outside a session ignored");
            return MessageDisposition::Ignored;
        }

        self.notify(principal, &Notice::VerifyFirst).await;
        match self.issue_locked(entry, principal).await {
            Ok(IssueOutcome::Rejected(notice)) => self.notify(principal, &notice).await,
            Ok(IssueOutcome::Issued { .. }) => {}
            Err(e) => tracing::warn!(%principal, error = %e, "could not challenge suppressed sender"),
        }
        MessageDisposition::Suppressed
    }

    /// Compare a pending principal's text with the live token. Only direct
    /// replies count toward the attempts cap.
    fn match_response(
        &self,
        entry: &mut PrincipalEntry,
        principal: Principal,
        text: &str,
        origin: MessageOrigin,
    ) -> MessageDisposition {
        let attempts_limit = self.inner.settings.captcha_attempts_limit;
        let Some(session) = entry.session_mut() else {
            return MessageDisposition::Ignored;
        };
        if session.is_resolving() || session.is_expired(Instant::now()) {
            tracing::debug!(%principal, "response after the session closed ignored");
            return MessageDisposition::Ignored;
        }

        if session.matches(text) {
            session.signal(SessionSignal::Matched);
            tracing::debug!(%principal, "response matched");
            return MessageDisposition::Matched;
        }
        if origin == MessageOrigin::Space {
            tracing::debug!(%principal, "space chatter while pending dropped");
            return MessageDisposition::Ignored;
        }

        let mismatches = session.record_mismatch();
        tracing::debug!(%principal, mismatches, "response did not match");
        if attempts_limit.is_some_and(|limit| mismatches >= limit) {
            session.signal(SessionSignal::Exhausted);
        }
        MessageDisposition::Mismatched
    }

    /// Apply the issuance guards and, if they pass, start a session.
    async fn issue_locked(
        &self,
        entry: &mut PrincipalEntry,
        principal: Principal,
    ) -> Result<IssueOutcome, VerificationError> {
        let now = Instant::now();
        match entry.status() {
            VerificationStatus::Verified => {
                return Ok(IssueOutcome::Rejected(Notice::AlreadyVerified))
            }
            VerificationStatus::Pending => {
                return Ok(IssueOutcome::Rejected(Notice::AlreadyPending))
            }
            VerificationStatus::Suspended => {
                let remaining_secs = entry
                    .suspension()
                    .map_or(0, |s| whole_secs_ceil(s.until().saturating_duration_since(now)));
                return Ok(IssueOutcome::Rejected(Notice::Suspended { remaining_secs }));
            }
            VerificationStatus::Unverified => {}
        }

        if let RateDecision::Limited { remaining_secs } =
            self.inner.limiter.may_issue(entry.last_issued(), now)
        {
            self.inner.metrics.challenges_rate_limited.inc();
            tracing::debug!(%principal, remaining_secs, "challenge rate limited");
            return Ok(IssueOutcome::Rejected(Notice::RateLimited { remaining_secs }));
        }

        let challenge = self
            .inner
            .generator
            .generate(self.inner.settings.captcha_length)?;
        let caption = challenge_caption(self.inner.settings.captcha_timeout_secs);
        let handle = match self
            .inner
            .gateway
            .deliver_challenge(principal, &challenge.artifact, &caption)
            .await
        {
            Ok(handle) => handle,
            Err(source) => {
                self.inner.metrics.delivery_failures.inc();
                tracing::warn!(%principal, error = %source, "challenge delivery failed");
                return Err(VerificationError::Delivery { principal, source });
            }
        };

        let issued_at = Instant::now();
        let deadline = instant_after(issued_at, self.inner.settings.timeout());
        let generation = self.inner.registry.next_generation();
        let (mut session, signal) = Session::new(
            principal,
            generation,
            challenge.token,
            issued_at,
            deadline,
            handle,
        );

        let engine = self.clone();
        session.attach_wait(tokio::spawn(async move {
            let outcome = wait_for_outcome(signal, deadline).await;
            engine.resolve(principal, generation, outcome).await;
        }));
        entry.begin_session(session);

        self.inner.metrics.challenges_issued.inc();
        self.inner.metrics.pending_sessions.inc();
        tracing::info!(%principal, generation, message = %handle, "challenge issued");
        Ok(IssueOutcome::Issued { handle })
    }

    /// Apply a session outcome. A wait whose session was replaced is a no-op.
    async fn resolve(&self, principal: Principal, generation: u64, outcome: SessionOutcome) {
        let mut entry = self.inner.registry.lock(principal).await;
        self.resolve_locked(&mut entry, principal, generation, outcome)
            .await;
        self.inner.registry.release(principal, entry).await;
    }

    async fn resolve_locked(
        &self,
        entry: &mut PrincipalEntry,
        principal: Principal,
        generation: u64,
        outcome: SessionOutcome,
    ) {
        let Some(session) = entry.take_session(generation) else {
            tracing::debug!(%principal, generation, "stale session outcome dropped");
            return;
        };
        self.inner.metrics.pending_sessions.dec();
        let message = session.message();
        let solve_time = session.issued_at().elapsed();
        drop(session);

        match outcome {
            SessionOutcome::Verified => {
                entry.mark_verified();
                self.inner.metrics.verifications_succeeded.inc();
                self.inner
                    .metrics
                    .solve_time_secs
                    .observe(solve_time.as_secs_f64());
                tracing::info!(%principal, "principal verified");

                self.delete(message).await;
                self.notify(principal, &Notice::Verified).await;
                if let Err(e) = self.inner.gateway.grant_role(principal).await {
                    tracing::warn!(%principal, error = %e, "could not grant membership role");
                }
            }
            SessionOutcome::Failed(reason) => {
                self.inner.metrics.verifications_failed.inc();
                tracing::info!(%principal, %reason, "verification failed");

                self.delete(message).await;
                self.notify(principal, &Notice::Failed { reason }).await;
                let kick_reason = format!("Failed CAPTCHA verification: {reason}");
                if let Err(e) = self.inner.gateway.eject(principal, &kick_reason).await {
                    tracing::warn!(%principal, error = %e, "could not eject principal");
                }

                match self.inner.tracker.record_failure(entry) {
                    TrackerAction::AllowFutureChallenge { failures } => {
                        tracing::debug!(%principal, failures, "failure recorded");
                    }
                    TrackerAction::Suspend { failures } => {
                        self.suspend_locked(entry, principal, failures).await;
                    }
                }
            }
        }
    }

    async fn suspend_locked(&self, entry: &mut PrincipalEntry, principal: Principal, failures: u32) {
        let until = instant_after(Instant::now(), self.inner.settings.ban_duration());
        let engine = self.clone();
        let lift = tokio::spawn(async move {
            tokio::time::sleep_until(until).await;
            engine.lift(principal).await;
        });
        entry.suspend(SuspensionTimer::new(until, lift));
        self.inner.metrics.suspensions.inc();
        tracing::info!(
            %principal,
            failures,
            ban_secs = self.inner.settings.captcha_retry_ban_duration_secs,
            "principal suspended"
        );

        let reason = format!("Exceeded CAPTCHA retry limit: {failures} attempts");
        if let Err(e) = self.inner.gateway.suspend(principal, &reason).await {
            tracing::warn!(%principal, error = %e, "could not suspend principal");
        }
    }

    async fn lift(&self, principal: Principal) {
        let mut entry = self.inner.registry.lock(principal).await;
        if entry.status() != VerificationStatus::Suspended {
            tracing::debug!(%principal, "suspension lift found nothing to lift");
            return;
        }
        entry.lift();
        self.inner.metrics.suspensions_lifted.inc();
        tracing::info!(%principal, "suspension lifted");

        if let Err(e) = self.inner.gateway.lift_suspension(principal).await {
            tracing::warn!(%principal, error = %e, "could not lift suspension");
        }
        self.inner.registry.release(principal, entry).await;
    }

    async fn notify(&self, principal: Principal, notice: &Notice) {
        if let Err(e) = self
            .inner
            .gateway
            .send_notice(principal, &notice.to_string())
            .await
        {
            tracing::warn!(%principal, error = %e, "could not send notice");
        }
    }

    async fn delete(&self, handle: MessageHandle) {
        if let Err(e) = self.inner.gateway.delete_message(handle).await {
            tracing::warn!(message = %handle, error = %e, "could not delete message");
        }
    }
}

/// `now + span`, clamped to the longest suspension if that would overflow.
fn instant_after(now: Instant, span: Duration) -> Instant {
    now.checked_add(span)
        .or_else(|| now.checked_add(Duration::from_secs(MAX_BAN_DURATION_SECS)))
        .unwrap_or(now)
}
