//! Nullable infrastructure for deterministic testing.
//!
//! The engine reaches the outside world through two seams: the messaging
//! gateway and the challenge generator. This crate provides test-friendly
//! implementations of both that:
//! - Return deterministic values
//! - Record every effect for later assertions
//! - Can be told to fail on demand
//! - Never touch the network
//!
//! Usage: hand these to `VerificationEngine::new` in place of the bridge
//! gateway and `ImageCaptcha`.

pub mod gateway;
pub mod generator;

pub use gateway::{Effect, NullGateway};
pub use generator::NullGenerator;
