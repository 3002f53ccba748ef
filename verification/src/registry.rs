//! Session registry, the single source of truth for per-principal state.
//!
//! Each principal owns one [`PrincipalEntry`] behind its own async mutex.
//! The outer map lock is held only long enough to find or create an entry,
//! so principals never contend with each other; every transition on a
//! principal holds that principal's entry lock from decision to effect.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use warden_types::{MessageHandle, Principal, VerificationStatus};

use crate::session::Session;
use crate::tracker::SuspensionTimer;

/// Everything the engine knows about one principal.
#[derive(Debug, Default)]
pub struct PrincipalEntry {
    status: VerificationStatus,
    session: Option<Session>,
    last_issued: Option<Instant>,
    failures: u32,
    suspension: Option<SuspensionTimer>,
}

impl PrincipalEntry {
    pub fn status(&self) -> VerificationStatus {
        self.status
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub(crate) fn session_mut(&mut self) -> Option<&mut Session> {
        self.session.as_mut()
    }

    /// Last time a challenge was actually issued.
    pub fn last_issued(&self) -> Option<Instant> {
        self.last_issued
    }

    /// Consecutive failed sessions.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn suspension(&self) -> Option<&SuspensionTimer> {
        self.suspension.as_ref()
    }

    /// `Pending` iff a session is live; `Suspended` iff a lift is scheduled.
    pub fn is_consistent(&self) -> bool {
        (self.status == VerificationStatus::Pending) == self.session.is_some()
            && (self.status == VerificationStatus::Suspended) == self.suspension.is_some()
    }

    /// Indistinguishable from an entry never seen before.
    pub fn is_idle(&self) -> bool {
        self.status == VerificationStatus::Unverified
            && self.session.is_none()
            && self.suspension.is_none()
            && self.failures == 0
            && self.last_issued.is_none()
    }

    /// Record a freshly delivered challenge: `Unverified → Pending`.
    pub(crate) fn begin_session(&mut self, session: Session) {
        debug_assert!(self.session.is_none(), "at most one live session");
        debug_assert_eq!(self.status, VerificationStatus::Unverified);
        self.last_issued = Some(session.issued_at());
        self.session = Some(session);
        self.status = VerificationStatus::Pending;
    }

    /// Remove the live session if it is the given generation.
    pub(crate) fn take_session(&mut self, generation: u64) -> Option<Session> {
        if self.session.as_ref()?.generation() != generation {
            return None;
        }
        self.status = VerificationStatus::Unverified;
        self.session.take()
    }

    /// Cancel the live session for replacement; returns its message.
    pub(crate) fn cancel_session(&mut self) -> Option<MessageHandle> {
        let session = self.session.take()?;
        self.status = VerificationStatus::Unverified;
        Some(session.cancel())
    }

    pub(crate) fn mark_verified(&mut self) {
        self.status = VerificationStatus::Verified;
        self.failures = 0;
    }

    pub(crate) fn increment_failures(&mut self) -> u32 {
        self.failures += 1;
        self.failures
    }

    pub(crate) fn suspend(&mut self, timer: SuspensionTimer) {
        debug_assert!(self.session.is_none(), "suspended principals have no session");
        self.status = VerificationStatus::Suspended;
        self.suspension = Some(timer);
    }

    /// Back to a clean slate, as if never challenged.
    pub(crate) fn lift(&mut self) {
        self.status = VerificationStatus::Unverified;
        self.failures = 0;
        self.last_issued = None;
        self.suspension = None;
    }

    pub fn snapshot(&self) -> PrincipalSnapshot {
        PrincipalSnapshot {
            status: self.status,
            failures: self.failures,
            token: self.session.as_ref().map(|s| s.token().to_string()),
            message: self.session.as_ref().map(Session::message),
            suspended_until: self.suspension.as_ref().map(SuspensionTimer::until),
            consistent: self.is_consistent(),
        }
    }
}

/// Read-only copy of a principal's entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrincipalSnapshot {
    pub status: VerificationStatus,
    pub failures: u32,
    /// Token of the live session, if any.
    pub token: Option<String>,
    /// Challenge message of the live session, if any.
    pub message: Option<MessageHandle>,
    pub suspended_until: Option<Instant>,
    /// Whether the entry satisfied the session/suspension invariants.
    pub consistent: bool,
}

/// Per-principal state, serialized per key.
#[derive(Default)]
pub struct SessionRegistry {
    entries: Mutex<HashMap<Principal, Arc<Mutex<PrincipalEntry>>>>,
    generations: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock a principal's entry, creating a fresh one on first contact.
    ///
    /// Transitions on the same principal queue up behind this lock.
    pub async fn lock(&self, principal: Principal) -> OwnedMutexGuard<PrincipalEntry> {
        let entry = {
            let mut entries = self.entries.lock().await;
            Arc::clone(entries.entry(principal).or_default())
        };
        entry.lock_owned().await
    }

    /// Unlock an entry. An idle entry nobody else is waiting on is dropped
    /// from the map, so the registry only holds principals with state.
    pub async fn release(&self, principal: Principal, entry: OwnedMutexGuard<PrincipalEntry>) {
        if !entry.is_idle() {
            return;
        }
        let mut entries = self.entries.lock().await;
        let shared = OwnedMutexGuard::mutex(&entry);
        // Entry handles are only cloned under the map lock: one in the map,
        // one behind this guard means no one is queued.
        let unshared = entries
            .get(&principal)
            .is_some_and(|current| Arc::ptr_eq(current, shared))
            && Arc::strong_count(shared) == 2;
        if unshared {
            entries.remove(&principal);
        }
    }

    pub async fn snapshot(&self, principal: Principal) -> PrincipalSnapshot {
        let entry = self.lock(principal).await;
        let snapshot = entry.snapshot();
        self.release(principal, entry).await;
        snapshot
    }

    /// A generation number never handed out before.
    pub fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Number of principals with state worth keeping.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub async fn principals(&self) -> Vec<Principal> {
        self.entries.lock().await.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn session(generation: u64) -> Session {
        let now = Instant::now();
        Session::new(
            Principal::new(5),
            generation,
            "tok".into(),
            now,
            now + Duration::from_secs(60),
            MessageHandle::new(generation),
        )
        .0
    }

    #[test]
    fn fresh_entry_is_unverified_and_consistent() {
        let entry = PrincipalEntry::default();
        assert_eq!(entry.status(), VerificationStatus::Unverified);
        assert!(entry.is_consistent());
        assert_eq!(entry.last_issued(), None);
    }

    #[test]
    fn begin_session_sets_pending_and_rate_state() {
        let mut entry = PrincipalEntry::default();
        let s = session(1);
        let issued = s.issued_at();
        entry.begin_session(s);
        assert_eq!(entry.status(), VerificationStatus::Pending);
        assert_eq!(entry.last_issued(), Some(issued));
        assert!(entry.is_consistent());
    }

    #[test]
    fn stale_generation_takes_nothing() {
        let mut entry = PrincipalEntry::default();
        entry.begin_session(session(2));
        assert!(entry.take_session(1).is_none());
        assert_eq!(entry.status(), VerificationStatus::Pending);
        assert!(entry.take_session(2).is_some());
        assert_eq!(entry.status(), VerificationStatus::Unverified);
        assert!(entry.is_consistent());
    }

    #[test]
    fn verified_resets_failures() {
        let mut entry = PrincipalEntry::default();
        entry.increment_failures();
        entry.increment_failures();
        entry.mark_verified();
        assert_eq!(entry.failures(), 0);
        assert_eq!(entry.status(), VerificationStatus::Verified);
    }

    #[tokio::test]
    async fn lift_clears_everything() {
        let mut entry = PrincipalEntry::default();
        entry.begin_session(session(3));
        entry.take_session(3);
        entry.increment_failures();
        entry.suspend(SuspensionTimer::new(
            Instant::now() + Duration::from_secs(300),
            tokio::spawn(async {}),
        ));
        assert!(entry.is_consistent());
        entry.lift();
        assert_eq!(entry.status(), VerificationStatus::Unverified);
        assert_eq!(entry.failures(), 0);
        assert_eq!(entry.last_issued(), None);
        assert!(entry.is_consistent());
    }

    #[tokio::test]
    async fn lock_creates_one_entry_per_principal() {
        let registry = SessionRegistry::new();
        drop(registry.lock(Principal::new(1)).await);
        drop(registry.lock(Principal::new(1)).await);
        drop(registry.lock(Principal::new(2)).await);
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn distinct_principals_do_not_contend() {
        let registry = SessionRegistry::new();
        let _held = registry.lock(Principal::new(1)).await;
        // Would deadlock if principals shared a lock.
        let other = tokio::time::timeout(Duration::from_secs(1), registry.lock(Principal::new(2))).await;
        assert!(other.is_ok());
    }

    #[tokio::test]
    async fn same_principal_is_serialized() {
        let registry = SessionRegistry::new();
        let _held = registry.lock(Principal::new(1)).await;
        let again =
            tokio::time::timeout(Duration::from_millis(50), registry.lock(Principal::new(1))).await;
        assert!(again.is_err());
    }

    #[tokio::test]
    async fn released_idle_entry_is_forgotten() {
        let registry = SessionRegistry::new();
        let entry = registry.lock(Principal::new(1)).await;
        registry.release(Principal::new(1), entry).await;
        assert!(registry.is_empty().await);
        assert_eq!(registry.snapshot(Principal::new(2)).await.status, VerificationStatus::Unverified);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn entry_with_state_is_kept() {
        let registry = SessionRegistry::new();
        let mut entry = registry.lock(Principal::new(1)).await;
        entry.increment_failures();
        registry.release(Principal::new(1), entry).await;
        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.snapshot(Principal::new(1)).await.failures, 1);
    }

    #[tokio::test]
    async fn queued_entry_is_not_dropped() {
        let registry = Arc::new(SessionRegistry::new());
        let entry = registry.lock(Principal::new(1)).await;
        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move {
                let mut entry = registry.lock(Principal::new(1)).await;
                entry.increment_failures();
            })
        };
        while Arc::strong_count(OwnedMutexGuard::mutex(&entry)) < 3 {
            tokio::task::yield_now().await;
        }
        registry.release(Principal::new(1), entry).await;
        waiter.await.unwrap();
        assert_eq!(registry.snapshot(Principal::new(1)).await.failures, 1);
    }

    #[test]
    fn generations_are_unique() {
        let registry = SessionRegistry::new();
        let a = registry.next_generation();
        let b = registry.next_generation();
        assert_ne!(a, b);
    }
}
