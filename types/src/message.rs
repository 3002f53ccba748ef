//! Platform message handles and message origins.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque handle to a message delivered or observed on the platform.
///
/// The engine keeps the handle of every challenge it delivers so the
/// artifact can be deleted when the session resolves or is replaced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageHandle(u64);

impl MessageHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for MessageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "msg#{}", self.0)
    }
}

/// Where an inbound text message was posted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageOrigin {
    /// Direct message to the gate.
    Direct,
    /// Posted in the shared space, visible to other members.
    Space,
}
