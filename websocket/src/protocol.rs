//! JSON wire protocol spoken with the platform adapter.
//!
//! Every frame is a text message carrying one JSON object tagged by `type`.

use serde::{Deserialize, Serialize};
use warden_types::{MessageHandle, MessageOrigin, Principal};
use warden_verification::GatewayError;

/// Adapter → bridge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AdapterMessage {
    /// A principal joined the shared space.
    MemberJoined { principal: Principal },
    /// A text message was observed.
    Message {
        principal: Principal,
        text: String,
        origin: MessageOrigin,
        #[serde(default)]
        handle: Option<MessageHandle>,
    },
    /// A principal issued a gate command.
    Command {
        principal: Principal,
        command: CommandKind,
    },
    /// Completion of an effect the bridge requested.
    EffectResult {
        id: u64,
        /// Handle of the delivered message, for `deliver_challenge`.
        #[serde(default)]
        handle: Option<MessageHandle>,
        #[serde(default)]
        error: Option<EffectFailure>,
    },
    Ping,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Retry,
    NewChallenge,
}

/// Why the adapter could not apply an effect.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectFailure {
    pub kind: FailureKind,
    #[serde(default)]
    pub detail: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    DeliveryFailed,
    NotFound,
    Forbidden,
    RoleMissing,
    Transport,
}

impl EffectFailure {
    /// Map onto the gateway error the engine understands.
    ///
    /// `role` names the membership role, reported by `RoleMissing`.
    pub fn into_gateway_error(self, role: &str) -> GatewayError {
        match self.kind {
            FailureKind::DeliveryFailed => GatewayError::DeliveryFailed(self.detail),
            FailureKind::NotFound => GatewayError::NotFound,
            FailureKind::Forbidden => GatewayError::Forbidden,
            FailureKind::RoleMissing => GatewayError::RoleMissing(role.to_string()),
            FailureKind::Transport => GatewayError::Transport(self.detail),
        }
    }
}

/// Bridge → adapter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeMessage {
    /// Apply `effect` and answer with an `effect_result` carrying `id`.
    Effect { id: u64, effect: Effect },
    Pong,
    Error { message: String },
}

/// A platform effect requested by the engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Effect {
    DeliverChallenge {
        principal: Principal,
        /// Base64 of the artifact bytes.
        image: String,
        media_type: String,
        file_name: String,
        caption: String,
    },
    SendNotice {
        principal: Principal,
        text: String,
    },
    DeleteMessage {
        handle: MessageHandle,
    },
    GrantRole {
        principal: Principal,
        role: String,
    },
    Eject {
        principal: Principal,
        reason: String,
    },
    Suspend {
        principal: Principal,
        reason: String,
    },
    LiftSuspension {
        principal: Principal,
    },
}

impl Effect {
    pub fn name(&self) -> &'static str {
        match self {
            Self::DeliverChallenge { .. } => "deliver_challenge",
            Self::SendNotice { .. } => "send_notice",
            Self::DeleteMessage { .. } => "delete_message",
            Self::GrantRole { .. } => "grant_role",
            Self::Eject { .. } => "eject",
            Self::Suspend { .. } => "suspend",
            Self::LiftSuspension { .. } => "lift_suspension",
        }
    }
}
