//! Messaging gateway that forwards effects to the connected adapter.
//!
//! Each effect gets a fresh id and is pushed onto the adapter's outbound
//! queue; the caller then waits for the `effect_result` with the same id.
//! At most one adapter is attached at a time; a newer connection replaces
//! the older one.
//!
//! A challenge whose delivery is confirmed only after the caller gave up is
//! deleted again, since the engine never started a session for it.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tokio::sync::{mpsc, oneshot, Mutex};
use warden_captcha::Artifact;
use warden_types::{MessageHandle, Principal};
use warden_verification::{GatewayError, MessagingGateway};

use crate::protocol::{BridgeMessage, Effect, EffectFailure};

/// Default time the adapter has to answer an effect.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(10);

type Reply = Result<Option<MessageHandle>, GatewayError>;

struct Adapter {
    connection: u64,
    outbound: mpsc::UnboundedSender<BridgeMessage>,
}

pub struct BridgeGateway {
    role: String,
    reply_timeout: Duration,
    next_id: AtomicU64,
    next_connection: AtomicU64,
    adapter: Mutex<Option<Adapter>>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Reply>>>,
    /// Deliveries that timed out; a late handle for one gets deleted.
    abandoned_deliveries: Mutex<HashSet<u64>>,
}

impl BridgeGateway {
    /// `role` is the membership role granted on success.
    pub fn new(role: impl Into<String>, reply_timeout: Duration) -> Self {
        Self {
            role: role.into(),
            reply_timeout,
            next_id: AtomicU64::new(1),
            next_connection: AtomicU64::new(1),
            adapter: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            abandoned_deliveries: Mutex::new(HashSet::new()),
        }
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    /// Attach a new adapter connection, replacing any previous one.
    ///
    /// Returns the connection id (for [`detach`](Self::detach)) and the queue
    /// of frames to write to the socket.
    pub async fn attach(&self) -> (u64, mpsc::UnboundedReceiver<BridgeMessage>) {
        let connection = self.next_connection.fetch_add(1, Ordering::Relaxed);
        let (outbound, rx) = mpsc::unbounded_channel();
        let replaced = self
            .adapter
            .lock()
            .await
            .replace(Adapter {
                connection,
                outbound,
            })
            .is_some();
        if replaced {
            tracing::warn!(connection, "adapter connection replaced an existing one");
        }
        (connection, rx)
    }

    /// Detach `connection` if it is still the current adapter. Effects still
    /// awaiting a reply fail with a transport error.
    pub async fn detach(&self, connection: u64) {
        {
            let mut adapter = self.adapter.lock().await;
            match adapter.as_ref() {
                Some(current) if current.connection == connection => *adapter = None,
                _ => return,
            }
        }
        let abandoned = {
            let mut pending = self.pending.lock().await;
            let count = pending.len();
            pending.clear();
            count
        };
        self.abandoned_deliveries.lock().await.clear();
        tracing::info!(connection, abandoned, "adapter detached");
    }

    pub async fn is_attached(&self) -> bool {
        self.adapter.lock().await.is_some()
    }

    /// Effects still waiting for the adapter's reply.
    pub async fn in_flight(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Detach whichever adapter is attached.
    pub async fn close(&self) {
        let current = self.adapter.lock().await.as_ref().map(|a| a.connection);
        if let Some(connection) = current {
            self.detach(connection).await;
        }
    }

    /// Deliver the adapter's answer for effect `id`.
    pub async fn complete(
        &self,
        id: u64,
        handle: Option<MessageHandle>,
        error: Option<EffectFailure>,
    ) {
        let (waiter, late_delivery) = {
            let mut pending = self.pending.lock().await;
            let waiter = pending.remove(&id);
            let late = waiter.is_none() && self.abandoned_deliveries.lock().await.remove(&id);
            (waiter, late)
        };
        let Some(waiter) = waiter else {
            match (late_delivery, handle, error) {
                (true, Some(handle), None) => {
                    tracing::info!(id, message = %handle, "deleting challenge delivered after timeout");
                    self.send_unawaited(Effect::DeleteMessage { handle }).await;
                }
                _ => tracing::debug!(id, "result for unknown or expired effect"),
            }
            return;
        };
        let reply = match error {
            Some(failure) => Err(failure.into_gateway_error(&self.role)),
            None => Ok(handle),
        };
        // The waiter may have timed out in the meantime.
        let _ = waiter.send(reply);
    }

    /// Push an effect without waiting for its result. Used from the socket
    /// reader, which must not block on a reply it would itself have to read.
    async fn send_unawaited(&self, effect: Effect) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let sent = match self.adapter.lock().await.as_ref() {
            Some(adapter) => adapter.outbound.send(BridgeMessage::Effect { id, effect }).is_ok(),
            None => false,
        };
        if !sent {
            tracing::warn!(id, "no adapter to send effect to");
        }
    }

    async fn perform(&self, effect: Effect) -> Reply {
        let name = effect.name();
        let is_delivery = matches!(effect, Effect::DeliverChallenge { .. });
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let outbound = match self.adapter.lock().await.as_ref() {
            Some(adapter) => adapter.outbound.clone(),
            None => return Err(GatewayError::Transport("no adapter connected".into())),
        };

        let (tx, mut rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);
        if outbound.send(BridgeMessage::Effect { id, effect }).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(GatewayError::Transport("adapter connection closed".into()));
        }
        tracing::debug!(id, effect = name, "effect sent to adapter");

        let reply = match tokio::time::timeout(self.reply_timeout, &mut rx).await {
            Ok(reply) => reply,
            Err(_) => {
                let mut pending = self.pending.lock().await;
                if pending.remove(&id).is_some() {
                    if is_delivery {
                        self.abandoned_deliveries.lock().await.insert(id);
                    }
                    drop(pending);
                    return Err(GatewayError::Transport(format!(
                        "no reply to {name} within {}s",
                        self.reply_timeout.as_secs()
                    )));
                }
                drop(pending);
                // The result was claimed just as the timer fired.
                rx.await
            }
        };
        reply.unwrap_or_else(|_| {
            Err(GatewayError::Transport(
                "adapter disconnected before replying".into(),
            ))
        })
    }

    async fn perform_unit(&self, effect: Effect) -> Result<(), GatewayError> {
        self.perform(effect).await.map(|_| ())
    }
}

impl Default for BridgeGateway {
    fn default() -> Self {
        Self::new("Verified", DEFAULT_REPLY_TIMEOUT)
    }
}

#[async_trait]
impl MessagingGateway for BridgeGateway {
    async fn deliver_challenge(
        &self,
        principal: Principal,
        artifact: &Artifact,
        caption: &str,
    ) -> Result<MessageHandle, GatewayError> {
        let effect = Effect::DeliverChallenge {
            principal,
            image: BASE64.encode(&artifact.bytes),
            media_type: artifact.media_type.to_string(),
            file_name: artifact.file_name.to_string(),
            caption: caption.to_string(),
        };
        self.perform(effect).await?.ok_or_else(|| {
            GatewayError::Transport("adapter delivered a challenge without a message handle".into())
        })
    }

    async fn send_notice(&self, principal: Principal, text: &str) -> Result<(), GatewayError> {
        self.perform_unit(Effect::SendNotice {
            principal,
            text: text.to_string(),
        })
        .await
    }

    async fn delete_message(&self, handle: MessageHandle) -> Result<(), GatewayError> {
        self.perform_unit(Effect::DeleteMessage { handle }).await
    }

    async fn grant_role(&self, principal: Principal) -> Result<(), GatewayError> {
        self.perform_unit(Effect::GrantRole {
            principal,
            role: self.role.clone(),
        })
        .await
    }

    async fn eject(&self, principal: Principal, reason: &str) -> Result<(), GatewayError> {
        self.perform_unit(Effect::Eject {
            principal,
            reason: reason.to_string(),
        })
        .await
    }

    async fn suspend(&self, principal: Principal, reason: &str) -> Result<(), GatewayError> {
        self.perform_unit(Effect::Suspend {
            principal,
            reason: reason.to_string(),
        })
        .await
    }

    async fn lift_suspension(&self, principal: Principal) -> Result<(), GatewayError> {
        self.perform_unit(Effect::LiftSuspension { principal }).await
    }
}
