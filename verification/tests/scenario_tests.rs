//! End-to-end scenarios for the verification engine:
//! arrival → challenge → response/deadline → role or ejection → suspension.
//!
//! The engine runs against the nullable gateway and generator, and every
//! test drives tokio's paused clock so deadlines and ban timers elapse
//! instantly and deterministically.

use std::sync::Arc;
use std::time::Duration;

use warden_nullables::{NullGateway, NullGenerator};
use warden_types::{
    CaptchaSettings, MessageHandle, Principal, VerificationStatus, MAX_BAN_DURATION_SECS,
};
use warden_verification::{
    GatewayError, IncomingMessage, IssueOutcome, MessageDisposition, Notice, VerificationEngine,
    VerificationError,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Harness {
    engine: VerificationEngine,
    gateway: Arc<NullGateway>,
    generator: Arc<NullGenerator>,
}

fn harness(settings: CaptchaSettings, tokens: &[&str]) -> Harness {
    let gateway = Arc::new(NullGateway::new());
    let generator = Arc::new(NullGenerator::with_tokens(tokens.iter().copied()));
    let engine = VerificationEngine::new(settings, generator.clone(), gateway.clone())
        .expect("valid settings");
    Harness {
        engine,
        gateway,
        generator,
    }
}

fn with_cooldown(secs: u64) -> CaptchaSettings {
    CaptchaSettings {
        rate_limit_window_secs: secs,
        ..CaptchaSettings::default()
    }
}

/// Let spawned waits and lifts run to completion.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

async fn secs(n: u64) {
    tokio::time::sleep(Duration::from_secs(n)).await;
}

fn issued_handle(outcome: IssueOutcome) -> MessageHandle {
    match outcome {
        IssueOutcome::Issued { handle } => handle,
        other => panic!("expected a challenge, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Happy path
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn join_then_correct_reply_verifies_and_grants_role() {
    let h = harness(CaptchaSettings::default(), &["Ab3xQ9"]);
    let p = Principal::new(1);

    let handle = issued_handle(h.engine.on_arrival(p).await.unwrap());
    assert_eq!(h.engine.status(p).await, VerificationStatus::Pending);

    assert_eq!(
        h.engine.on_message(IncomingMessage::direct(p, "ab3xq9")).await,
        MessageDisposition::Mismatched
    );
    assert_eq!(
        h.engine.on_message(IncomingMessage::direct(p, "Ab3xQ9")).await,
        MessageDisposition::Matched
    );
    settle().await;

    let snap = h.engine.snapshot(p).await;
    assert_eq!(snap.status, VerificationStatus::Verified);
    assert_eq!(snap.failures, 0);
    assert!(snap.token.is_none());
    assert!(snap.consistent);

    assert!(h.gateway.role_granted(p));
    assert!(h.gateway.deleted().contains(&handle));
    assert!(h
        .gateway
        .notices_to(p)
        .contains(&Notice::Verified.to_string()));
    assert!(h.gateway.ejections_of(p).is_empty());
    assert_eq!(h.engine.metrics().verifications_succeeded.get(), 1);
    assert_eq!(h.engine.metrics().pending_sessions.get(), 0);
}

#[tokio::test(start_paused = true)]
async fn challenge_caption_carries_instructions() {
    let h = harness(CaptchaSettings::default(), &["Ab3xQ9"]);
    h.engine.on_arrival(Principal::new(1)).await.unwrap();

    let caption = h
        .gateway
        .effects()
        .into_iter()
        .find_map(|e| match e {
            warden_nullables::Effect::ChallengeDelivered { caption, .. } => Some(caption),
            _ => None,
        })
        .expect("challenge delivered");
    assert!(caption.contains("case-sensitive"));
    assert!(caption.contains("retry"));
}

#[tokio::test(start_paused = true)]
async fn role_grant_failure_does_not_undo_verification() {
    let h = harness(CaptchaSettings::default(), &["Ab3xQ9"]);
    let p = Principal::new(1);
    h.gateway
        .fail_role_grants(GatewayError::RoleMissing("Verified".into()));

    h.engine.on_arrival(p).await.unwrap();
    h.engine.on_message(IncomingMessage::direct(p, "Ab3xQ9")).await;
    settle().await;

    assert_eq!(h.engine.status(p).await, VerificationStatus::Verified);
    assert!(!h.gateway.role_granted(p));
}

// ---------------------------------------------------------------------------
// Timeouts and escalation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn silence_until_deadline_ejects_and_counts_a_failure() {
    let h = harness(CaptchaSettings::default(), &["Ab3xQ9"]);
    let p = Principal::new(1);
    let handle = issued_handle(h.engine.on_arrival(p).await.unwrap());

    secs(59).await;
    assert_eq!(h.engine.status(p).await, VerificationStatus::Pending);

    secs(2).await;
    let snap = h.engine.snapshot(p).await;
    assert_eq!(snap.status, VerificationStatus::Unverified);
    assert_eq!(snap.failures, 1);
    assert!(snap.consistent);

    assert_eq!(
        h.gateway.ejections_of(p),
        vec!["Failed CAPTCHA verification: timeout".to_string()]
    );
    assert!(h.gateway.deleted().contains(&handle));
    assert!(h
        .gateway
        .notices_to(p)
        .iter()
        .any(|n| n.contains("verification failed: timeout")));
    assert!(!h.gateway.role_granted(p));
}

#[tokio::test(start_paused = true)]
async fn response_after_deadline_is_ignored() {
    let h = harness(CaptchaSettings::default(), &["Ab3xQ9"]);
    let p = Principal::new(1);
    h.engine.on_arrival(p).await.unwrap();
    secs(61).await;

    assert_eq!(
        h.engine.on_message(IncomingMessage::direct(p, "Ab3xQ9")).await,
        MessageDisposition::Ignored
    );
    settle().await;
    assert_eq!(h.engine.status(p).await, VerificationStatus::Unverified);
    assert!(!h.gateway.role_granted(p));
}

#[tokio::test(start_paused = true)]
async fn response_while_resolution_is_held_back_past_the_deadline_is_ignored() {
    let h = harness(CaptchaSettings::default(), &["Ab3xQ9"]);
    let p = Principal::new(1);
    h.engine.on_arrival(p).await.unwrap();
    secs(59).await;

    // The space post is deleted under the entry lock; the slow delete keeps
    // the expired session in place until the token is compared.
    h.gateway.delay_deletes(Duration::from_secs(5));
    assert_eq!(
        h.engine
            .on_message(IncomingMessage::space(p, "Ab3xQ9", MessageHandle::new(900)))
            .await,
        MessageDisposition::Ignored
    );
    secs(10).await;

    let snap = h.engine.snapshot(p).await;
    assert_eq!(snap.status, VerificationStatus::Unverified);
    assert_eq!(snap.failures, 1);
    assert!(!h.gateway.role_granted(p));
    assert_eq!(
        h.gateway.ejections_of(p),
        vec!["Failed CAPTCHA verification: timeout".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn longest_allowed_ban_is_applied() {
    let settings = CaptchaSettings {
        captcha_retry_limit: 1,
        captcha_retry_ban_duration_secs: MAX_BAN_DURATION_SECS,
        ..CaptchaSettings::default()
    };
    let h = harness(settings, &[]);
    let p = Principal::new(1);
    h.engine.on_arrival(p).await.unwrap();
    secs(61).await;

    let snap = h.engine.snapshot(p).await;
    assert_eq!(snap.status, VerificationStatus::Suspended);
    assert!(snap.suspended_until.is_some());
    assert!(snap.consistent);
    assert_eq!(h.gateway.suspensions_of(p).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn repeated_failures_suspend_then_lift_to_a_clean_slate() {
    let h = harness(CaptchaSettings::default(), &[]);
    let p = Principal::new(1);

    for round in 1..=3u32 {
        assert!(h.engine.on_arrival(p).await.unwrap().is_issued());
        secs(61).await;
        assert_eq!(h.engine.snapshot(p).await.failures, round);
    }

    let snap = h.engine.snapshot(p).await;
    assert_eq!(snap.status, VerificationStatus::Suspended);
    assert!(snap.suspended_until.is_some());
    assert!(snap.consistent);
    assert_eq!(
        h.gateway.suspensions_of(p),
        vec!["Exceeded CAPTCHA retry limit: 3 attempts".to_string()]
    );
    assert_eq!(h.gateway.ejections_of(p).len(), 3);

    match h.engine.on_arrival(p).await.unwrap() {
        IssueOutcome::Rejected(Notice::Suspended { remaining_secs }) => {
            assert!(remaining_secs > 0 && remaining_secs <= 300);
        }
        other => panic!("expected suspension notice, got {other:?}"),
    }

    secs(300).await;
    let snap = h.engine.snapshot(p).await;
    assert_eq!(snap.status, VerificationStatus::Unverified);
    assert_eq!(snap.failures, 0);
    assert!(snap.suspended_until.is_none());
    assert!(h.gateway.suspension_lifted(p));
    assert_eq!(h.engine.metrics().suspensions_lifted.get(), 1);
    assert!(h.engine.registry().is_empty().await);

    // Rate state was cleared with the ban, so the challenge goes out at once.
    assert!(h.engine.on_arrival(p).await.unwrap().is_issued());
}

#[tokio::test(start_paused = true)]
async fn success_resets_the_failure_count() {
    let h = harness(CaptchaSettings::default(), &["first1", "second"]);
    let p = Principal::new(1);

    h.engine.on_arrival(p).await.unwrap();
    secs(61).await;
    assert_eq!(h.engine.snapshot(p).await.failures, 1);

    h.engine.new_challenge(p).await.unwrap();
    h.engine
        .on_message(IncomingMessage::direct(p, "second"))
        .await;
    settle().await;
    let snap = h.engine.snapshot(p).await;
    assert_eq!(snap.status, VerificationStatus::Verified);
    assert_eq!(snap.failures, 0);
}

#[tokio::test(start_paused = true)]
async fn attempts_cap_fails_the_session_early() {
    let settings = CaptchaSettings {
        captcha_attempts_limit: Some(2),
        ..CaptchaSettings::default()
    };
    let h = harness(settings, &["Ab3xQ9"]);
    let p = Principal::new(1);
    h.engine.on_arrival(p).await.unwrap();

    h.engine.on_message(IncomingMessage::direct(p, "nope")).await;
    assert_eq!(h.engine.status(p).await, VerificationStatus::Pending);
    h.engine.on_message(IncomingMessage::direct(p, "nope")).await;
    settle().await;

    assert_eq!(h.engine.status(p).await, VerificationStatus::Unverified);
    assert_eq!(
        h.gateway.ejections_of(p),
        vec!["Failed CAPTCHA verification: too many attempts".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn space_chatter_does_not_count_toward_the_cap() {
    let settings = CaptchaSettings {
        captcha_attempts_limit: Some(1),
        ..CaptchaSettings::default()
    };
    let h = harness(settings, &["Ab3xQ9"]);
    let p = Principal::new(1);
    h.engine.on_arrival(p).await.unwrap();

    for n in 0..3 {
        let posted = MessageHandle::new(600 + n);
        assert_eq!(
            h.engine
                .on_message(IncomingMessage::space(p, "hi everyone", posted))
                .await,
            MessageDisposition::Ignored
        );
        assert!(h.gateway.deleted().contains(&posted));
    }
    settle().await;
    assert_eq!(h.engine.status(p).await, VerificationStatus::Pending);
    assert!(h.gateway.ejections_of(p).is_empty());

    assert_eq!(
        h.engine.on_message(IncomingMessage::direct(p, "nope")).await,
        MessageDisposition::Mismatched
    );
    settle().await;
    assert_eq!(h.engine.status(p).await, VerificationStatus::Unverified);
}

#[tokio::test(start_paused = true)]
async fn wrong_answers_never_fail_without_a_cap() {
    let h = harness(CaptchaSettings::default(), &["Ab3xQ9"]);
    let p = Principal::new(1);
    h.engine.on_arrival(p).await.unwrap();

    for _ in 0..50 {
        h.engine.on_message(IncomingMessage::direct(p, "guess")).await;
    }
    settle().await;
    assert_eq!(h.engine.status(p).await, VerificationStatus::Pending);

    h.engine.on_message(IncomingMessage::direct(p, "Ab3xQ9")).await;
    settle().await;
    assert_eq!(h.engine.status(p).await, VerificationStatus::Verified);
}

// ---------------------------------------------------------------------------
// Rate limiting and commands
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn second_issuance_inside_cooldown_is_rejected_with_remaining_time() {
    let h = harness(with_cooldown(120), &[]);
    let p = Principal::new(1);
    h.engine.on_arrival(p).await.unwrap();
    secs(61).await;

    match h.engine.new_challenge(p).await.unwrap() {
        IssueOutcome::Rejected(Notice::RateLimited { remaining_secs }) => {
            assert!(remaining_secs > 0);
            assert!(remaining_secs <= 59);
        }
        other => panic!("expected rate limit, got {other:?}"),
    }
    assert!(h
        .gateway
        .notices_to(p)
        .iter()
        .any(|n| n.contains("exceeded the rate limit")));
    assert_eq!(h.gateway.challenges_to(p).len(), 1);
    assert_eq!(h.engine.metrics().challenges_rate_limited.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn retry_replaces_the_challenge_and_the_old_deadline_never_fires() {
    let h = harness(with_cooldown(10), &["Ab3xQ9", "Zz9Yy8"]);
    let p = Principal::new(1);
    let first = issued_handle(h.engine.on_arrival(p).await.unwrap());

    secs(30).await;
    let second = issued_handle(h.engine.retry(p).await.unwrap());
    assert_ne!(first, second);
    assert!(h.gateway.deleted().contains(&first));
    assert_eq!(h.engine.snapshot(p).await.token.as_deref(), Some("Zz9Yy8"));

    // Past the first deadline, inside the second.
    secs(40).await;
    let snap = h.engine.snapshot(p).await;
    assert_eq!(snap.status, VerificationStatus::Pending);
    assert_eq!(snap.failures, 0);
    assert!(h.gateway.ejections_of(p).is_empty());

    assert_eq!(
        h.engine.on_message(IncomingMessage::direct(p, "Ab3xQ9")).await,
        MessageDisposition::Mismatched
    );
    assert_eq!(
        h.engine.on_message(IncomingMessage::direct(p, "Zz9Yy8")).await,
        MessageDisposition::Matched
    );
    settle().await;
    assert_eq!(h.engine.status(p).await, VerificationStatus::Verified);
    assert_eq!(h.engine.metrics().verifications_failed.get(), 0);
}

#[tokio::test(start_paused = true)]
async fn rate_limited_retry_keeps_the_live_session() {
    let h = harness(CaptchaSettings::default(), &["Ab3xQ9", "unused"]);
    let p = Principal::new(1);
    let handle = issued_handle(h.engine.on_arrival(p).await.unwrap());

    secs(5).await;
    match h.engine.retry(p).await.unwrap() {
        IssueOutcome::Rejected(Notice::RateLimited { remaining_secs }) => {
            assert_eq!(remaining_secs, 55);
        }
        other => panic!("expected rate limit, got {other:?}"),
    }
    let snap = h.engine.snapshot(p).await;
    assert_eq!(snap.message, Some(handle));
    assert_eq!(snap.token.as_deref(), Some("Ab3xQ9"));
    assert!(h.gateway.deleted().is_empty());

    h.engine.on_message(IncomingMessage::direct(p, "Ab3xQ9")).await;
    settle().await;
    assert_eq!(h.engine.status(p).await, VerificationStatus::Verified);
}

#[tokio::test(start_paused = true)]
async fn commands_outside_their_state_are_refused() {
    let h = harness(with_cooldown(0), &["Ab3xQ9"]);
    let p = Principal::new(1);

    assert_eq!(
        h.engine.retry(p).await.unwrap(),
        IssueOutcome::Rejected(Notice::NotPending)
    );

    h.engine.on_arrival(p).await.unwrap();
    assert_eq!(
        h.engine.new_challenge(p).await.unwrap(),
        IssueOutcome::Rejected(Notice::AlreadyPending)
    );

    h.engine.on_message(IncomingMessage::direct(p, "Ab3xQ9")).await;
    settle().await;
    assert_eq!(
        h.engine.new_challenge(p).await.unwrap(),
        IssueOutcome::Rejected(Notice::AlreadyVerified)
    );
    assert_eq!(
        h.engine.retry(p).await.unwrap(),
        IssueOutcome::Rejected(Notice::NotPending)
    );
    assert_eq!(h.gateway.challenges_to(p).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn verified_member_rejoins_silently() {
    let h = harness(CaptchaSettings::default(), &["Ab3xQ9"]);
    let p = Principal::new(1);
    h.engine.on_arrival(p).await.unwrap();
    h.engine.on_message(IncomingMessage::direct(p, "Ab3xQ9")).await;
    settle().await;
    h.gateway.clear();

    assert_eq!(
        h.engine.on_arrival(p).await.unwrap(),
        IssueOutcome::Rejected(Notice::AlreadyVerified)
    );
    assert!(h.gateway.effects().is_empty());
}

// ---------------------------------------------------------------------------
// Delivery failures
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn failed_delivery_leaves_no_session_and_no_cooldown() {
    let h = harness(CaptchaSettings::default(), &[]);
    let p = Principal::new(1);
    h.gateway
        .refuse_delivery_to(p, GatewayError::DeliveryFailed("dms closed".into()));

    let err = h.engine.on_arrival(p).await.unwrap_err();
    assert!(matches!(err, VerificationError::Delivery { principal, .. } if principal == p));
    let snap = h.engine.snapshot(p).await;
    assert_eq!(snap.status, VerificationStatus::Unverified);
    assert!(snap.token.is_none());
    assert_eq!(h.engine.metrics().delivery_failures.get(), 1);

    h.gateway.allow_delivery_to(p);
    assert!(h.engine.new_challenge(p).await.unwrap().is_issued());
}

#[tokio::test(start_paused = true)]
async fn collaborator_failures_do_not_block_transitions() {
    let h = harness(CaptchaSettings::default(), &["Ab3xQ9"]);
    let p = Principal::new(1);
    h.gateway.fail_deletes(GatewayError::NotFound);
    h.gateway.fail_notices(GatewayError::Forbidden);

    h.engine.on_arrival(p).await.unwrap();
    secs(61).await;
    let snap = h.engine.snapshot(p).await;
    assert_eq!(snap.status, VerificationStatus::Unverified);
    assert_eq!(snap.failures, 1);
    assert_eq!(h.gateway.ejections_of(p).len(), 1);
}

// ---------------------------------------------------------------------------
// Shared-space messages
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn unverified_space_message_is_suppressed_and_challenged() {
    let h = harness(CaptchaSettings::default(), &["Ab3xQ9"]);
    let p = Principal::new(1);
    let posted = MessageHandle::new(500);

    assert_eq!(
        h.engine
            .on_message(IncomingMessage::space(p, "hello all", posted))
            .await,
        MessageDisposition::Suppressed
    );
    assert!(h.gateway.deleted().contains(&posted));
    assert!(h
        .gateway
        .notices_to(p)
        .contains(&Notice::VerifyFirst.to_string()));
    assert_eq!(h.gateway.challenges_to(p).len(), 1);
    assert_eq!(h.engine.status(p).await, VerificationStatus::Pending);
}

#[tokio::test(start_paused = true)]
async fn token_posted_in_space_is_deleted_and_counts() {
    let h = harness(CaptchaSettings::default(), &["Ab3xQ9"]);
    let p = Principal::new(1);
    h.engine.on_arrival(p).await.unwrap();

    let posted = MessageHandle::new(501);
    assert_eq!(
        h.engine
            .on_message(IncomingMessage::space(p, "Ab3xQ9", posted))
            .await,
        MessageDisposition::Matched
    );
    settle().await;
    assert!(h.gateway.deleted().contains(&posted));
    assert_eq!(h.engine.status(p).await, VerificationStatus::Verified);
}

// ---------------------------------------------------------------------------
// Registry footprint
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn principals_without_state_are_not_remembered() {
    let h = harness(CaptchaSettings::default(), &["Ab3xQ9"]);
    let stranger = Principal::new(1);
    let undeliverable = Principal::new(2);
    let member = Principal::new(3);

    h.engine
        .on_message(IncomingMessage::direct(stranger, "hello?"))
        .await;
    h.engine.retry(stranger).await.unwrap();
    assert_eq!(h.engine.status(stranger).await, VerificationStatus::Unverified);

    h.gateway.refuse_delivery_to(
        undeliverable,
        GatewayError::DeliveryFailed("dms closed".into()),
    );
    assert!(h.engine.on_arrival(undeliverable).await.is_err());

    h.engine.on_arrival(member).await.unwrap();
    h.engine
        .on_message(IncomingMessage::direct(member, "Ab3xQ9"))
        .await;
    settle().await;

    // Verified status must survive for the silent rejoin.
    assert_eq!(h.engine.registry().principals().await, vec![member]);
    assert_eq!(h.engine.status(member).await, VerificationStatus::Verified);
}

// ---------------------------------------------------------------------------
// Many principals
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn concurrent_principals_resolve_independently() {
    let h = harness(CaptchaSettings::default(), &[]);
    let principals: Vec<Principal> = (1..=20).map(Principal::new).collect();

    let arrivals: Vec<_> = principals
        .iter()
        .map(|&p| {
            let engine = h.engine.clone();
            tokio::spawn(async move { engine.on_arrival(p).await })
        })
        .collect();
    for arrival in arrivals {
        assert!(arrival.await.unwrap().unwrap().is_issued());
    }
    assert_eq!(h.engine.metrics().pending_sessions.get(), 20);
    assert_eq!(h.generator.issued().len(), 20);

    for &p in principals.iter().step_by(2) {
        let token = h.engine.snapshot(p).await.token.expect("pending");
        h.engine.on_message(IncomingMessage::direct(p, token)).await;
    }
    secs(61).await;

    for (i, &p) in principals.iter().enumerate() {
        let snap = h.engine.snapshot(p).await;
        assert!(snap.consistent);
        if i % 2 == 0 {
            assert_eq!(snap.status, VerificationStatus::Verified);
        } else {
            assert_eq!(snap.status, VerificationStatus::Unverified);
            assert_eq!(snap.failures, 1);
        }
    }
    assert_eq!(h.engine.metrics().pending_sessions.get(), 0);
    assert_eq!(h.engine.registry().len().await, 20);
}
