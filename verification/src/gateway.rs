//! Messaging gateway contract: every effect the engine has on the platform.
//!
//! The engine never talks to the platform directly. Failures of anything but
//! challenge delivery are logged by the engine and never roll back a
//! registry transition.

use async_trait::async_trait;
use thiserror::Error;
use warden_captcha::Artifact;
use warden_types::{MessageHandle, Principal};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("direct message could not be delivered: {0}")]
    DeliveryFailed(String),

    #[error("message not found")]
    NotFound,

    #[error("missing permission for this action")]
    Forbidden,

    #[error("membership role {0} does not exist")]
    RoleMissing(String),

    #[error("platform transport error: {0}")]
    Transport(String),
}

/// Effects applied to the platform on behalf of the engine.
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    /// Deliver a challenge artifact by direct message.
    async fn deliver_challenge(
        &self,
        principal: Principal,
        artifact: &Artifact,
        caption: &str,
    ) -> Result<MessageHandle, GatewayError>;

    /// Deliver informational text by direct message.
    async fn send_notice(&self, principal: Principal, text: &str) -> Result<(), GatewayError>;

    async fn delete_message(&self, handle: MessageHandle) -> Result<(), GatewayError>;

    /// Grant the membership role.
    async fn grant_role(&self, principal: Principal) -> Result<(), GatewayError>;

    /// Remove the principal from the shared space (kick).
    async fn eject(&self, principal: Principal, reason: &str) -> Result<(), GatewayError>;

    /// Ban the principal.
    async fn suspend(&self, principal: Principal, reason: &str) -> Result<(), GatewayError>;

    /// Unban the principal.
    async fn lift_suspension(&self, principal: Principal) -> Result<(), GatewayError>;
}
