//! Nullable gateway: record platform effects without performing them.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use warden_captcha::Artifact;
use warden_types::{MessageHandle, Principal};
use warden_verification::{GatewayError, MessagingGateway};

/// One recorded call on the gateway.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    ChallengeDelivered {
        principal: Principal,
        handle: MessageHandle,
        caption: String,
    },
    Notice {
        principal: Principal,
        text: String,
    },
    MessageDeleted(MessageHandle),
    RoleGranted(Principal),
    Ejected {
        principal: Principal,
        reason: String,
    },
    Suspended {
        principal: Principal,
        reason: String,
    },
    SuspensionLifted(Principal),
}

#[derive(Default)]
struct State {
    effects: Vec<Effect>,
    next_handle: u64,
    undeliverable: HashMap<Principal, GatewayError>,
    role_error: Option<GatewayError>,
    delete_error: Option<GatewayError>,
    delete_delay: Option<Duration>,
    notice_error: Option<GatewayError>,
}

/// A test gateway that records effects instead of applying them.
///
/// Successful effects are recorded; failed ones are not.
#[derive(Default)]
pub struct NullGateway {
    state: Mutex<State>,
}

impl NullGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, effect: Effect) {
        self.state().effects.push(effect);
    }

    // ── Failure injection ──────────────────────────────────────────────

    /// Make challenge delivery to `principal` fail (e.g. closed DMs).
    pub fn refuse_delivery_to(&self, principal: Principal, error: GatewayError) {
        self.state().undeliverable.insert(principal, error);
    }

    /// Restore delivery to `principal`.
    pub fn allow_delivery_to(&self, principal: Principal) {
        self.state().undeliverable.remove(&principal);
    }

    /// Make every role grant fail.
    pub fn fail_role_grants(&self, error: GatewayError) {
        self.state().role_error = Some(error);
    }

    /// Make every message deletion fail.
    pub fn fail_deletes(&self, error: GatewayError) {
        self.state().delete_error = Some(error);
    }

    /// Make every message deletion take `delay` before it completes.
    pub fn delay_deletes(&self, delay: Duration) {
        self.state().delete_delay = Some(delay);
    }

    /// Make every notice fail.
    pub fn fail_notices(&self, error: GatewayError) {
        self.state().notice_error = Some(error);
    }

    // ── Assertions ─────────────────────────────────────────────────────

    /// All recorded effects, oldest first.
    pub fn effects(&self) -> Vec<Effect> {
        self.state().effects.clone()
    }

    /// Handles of challenges delivered to `principal`, oldest first.
    pub fn challenges_to(&self, principal: Principal) -> Vec<MessageHandle> {
        self.filter(|e| match e {
            Effect::ChallengeDelivered {
                principal: p,
                handle,
                ..
            } if *p == principal => Some(*handle),
            _ => None,
        })
    }

    /// Notice texts sent to `principal`, oldest first.
    pub fn notices_to(&self, principal: Principal) -> Vec<String> {
        self.filter(|e| match e {
            Effect::Notice { principal: p, text } if *p == principal => Some(text.clone()),
            _ => None,
        })
    }

    pub fn deleted(&self) -> Vec<MessageHandle> {
        self.filter(|e| match e {
            Effect::MessageDeleted(handle) => Some(*handle),
            _ => None,
        })
    }

    /// Ejection reasons recorded for `principal`.
    pub fn ejections_of(&self, principal: Principal) -> Vec<String> {
        self.filter(|e| match e {
            Effect::Ejected { principal: p, reason } if *p == principal => Some(reason.clone()),
            _ => None,
        })
    }

    /// Suspension reasons recorded for `principal`.
    pub fn suspensions_of(&self, principal: Principal) -> Vec<String> {
        self.filter(|e| match e {
            Effect::Suspended { principal: p, reason } if *p == principal => Some(reason.clone()),
            _ => None,
        })
    }

    pub fn role_granted(&self, principal: Principal) -> bool {
        self.state()
            .effects
            .contains(&Effect::RoleGranted(principal))
    }

    pub fn suspension_lifted(&self, principal: Principal) -> bool {
        self.state()
            .effects
            .contains(&Effect::SuspensionLifted(principal))
    }

    /// Forget all recorded effects; injected failures stay.
    pub fn clear(&self) {
        self.state().effects.clear();
    }

    fn filter<T>(&self, f: impl Fn(&Effect) -> Option<T>) -> Vec<T> {
        self.state().effects.iter().filter_map(f).collect()
    }
}

#[async_trait]
impl MessagingGateway for NullGateway {
    async fn deliver_challenge(
        &self,
        principal: Principal,
        _artifact: &Artifact,
        caption: &str,
    ) -> Result<MessageHandle, GatewayError> {
        let mut state = self.state();
        if let Some(error) = state.undeliverable.get(&principal) {
            return Err(error.clone());
        }
        state.next_handle += 1;
        let handle = MessageHandle::new(state.next_handle);
        state.effects.push(Effect::ChallengeDelivered {
            principal,
            handle,
            caption: caption.to_string(),
        });
        Ok(handle)
    }

    async fn send_notice(&self, principal: Principal, text: &str) -> Result<(), GatewayError> {
        if let Some(error) = self.state().notice_error.clone() {
            return Err(error);
        }
        self.record(Effect::Notice {
            principal,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn delete_message(&self, handle: MessageHandle) -> Result<(), GatewayError> {
        let delay = self.state().delete_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.state().delete_error.clone() {
            return Err(error);
        }
        self.record(Effect::MessageDeleted(handle));
        Ok(())
    }

    async fn grant_role(&self, principal: Principal) -> Result<(), GatewayError> {
        if let Some(error) = self.state().role_error.clone() {
            return Err(error);
        }
        self.record(Effect::RoleGranted(principal));
        Ok(())
    }

    async fn eject(&self, principal: Principal, reason: &str) -> Result<(), GatewayError> {
        self.record(Effect::Ejected {
            principal,
            reason: reason.to_string(),
        });
        Ok(())
    }

    async fn suspend(&self, principal: Principal, reason: &str) -> Result<(), GatewayError> {
        self.record(Effect::Suspended {
            principal,
            reason: reason.to_string(),
        });
        Ok(())
    }

    async fn lift_suspension(&self, principal: Principal) -> Result<(), GatewayError> {
        self.record(Effect::SuspensionLifted(principal));
        Ok(())
    }
}
