//! Challenge generation for the membership gate.
//!
//! A challenge is a short random token plus an image depicting it. The
//! engine only ever compares the token; the image is opaque bytes handed to
//! the platform for delivery.

pub mod error;
pub mod font;
pub mod generator;
pub mod png;
pub mod render;
pub mod token;

pub use error::CaptchaError;
pub use generator::{Artifact, Challenge, ChallengeGenerator, ImageCaptcha};
pub use token::{random_token, TOKEN_ALPHABET};
