//! WebSocket bridge between a platform adapter and the verification engine.
//!
//! The adapter connects to `/ws` and streams platform events in:
//! - Member arrivals
//! - Observed text messages (direct or in the shared space)
//! - Gate commands (`retry`, `new_challenge`)
//! - Results of effects the bridge asked it to apply
//!
//! The bridge answers with effect requests produced by the engine through
//! [`BridgeGateway`].

pub mod error;
pub mod gateway;
pub mod protocol;
pub mod server;

pub use error::BridgeError;
pub use gateway::{BridgeGateway, DEFAULT_REPLY_TIMEOUT};
pub use protocol::{AdapterMessage, BridgeMessage, CommandKind, Effect};
pub use server::BridgeServer;
