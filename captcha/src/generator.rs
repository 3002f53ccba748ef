//! Challenge generation: token plus rendered artifact.

use std::fmt;

use rand::Rng;

use crate::error::CaptchaError;
use crate::png;
use crate::render::{self, render_token};
use crate::token::random_token;

/// Longest token [`ImageCaptcha`] can fit on its canvas.
pub use warden_types::settings::MAX_CAPTCHA_LENGTH as MAX_TOKEN_LENGTH;

/// Rendered puzzle bytes, opaque to the engine.
#[derive(Clone, PartialEq, Eq)]
pub struct Artifact {
    pub bytes: Vec<u8>,
    pub media_type: &'static str,
    pub file_name: &'static str,
}

impl Artifact {
    pub fn png(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            media_type: "image/png",
            file_name: "captcha.png",
        }
    }
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artifact")
            .field("media_type", &self.media_type)
            .field("file_name", &self.file_name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// A token and the artifact depicting it.
#[derive(Clone, Debug)]
pub struct Challenge {
    pub token: String,
    pub artifact: Artifact,
}

/// Produces challenges for the engine.
///
/// Implementations must return an artifact that depicts exactly the returned
/// token; only the token decides whether a response matches.
pub trait ChallengeGenerator: Send + Sync {
    fn generate(&self, length: usize) -> Result<Challenge, CaptchaError>;
}

/// Generates alphanumeric tokens rendered as distorted PNG images.
#[derive(Clone, Copy, Debug, Default)]
pub struct ImageCaptcha;

impl ImageCaptcha {
    pub fn new() -> Self {
        Self
    }

    /// Generate with a caller-supplied RNG (deterministic in tests).
    pub fn generate_with<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        length: usize,
    ) -> Result<Challenge, CaptchaError> {
        if length == 0 {
            return Err(CaptchaError::EmptyToken);
        }
        if length > MAX_TOKEN_LENGTH {
            return Err(CaptchaError::TooLong {
                requested: length,
                max: MAX_TOKEN_LENGTH,
            });
        }
        let token = random_token(rng, length);
        let artifact = self.render_with(rng, &token)?;
        Ok(Challenge { token, artifact })
    }

    /// Render an artifact for an existing token.
    pub fn render_with<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        token: &str,
    ) -> Result<Artifact, CaptchaError> {
        let canvas = render_token(rng, token)?;
        let bytes = png::encode_rgb(
            render::WIDTH as u32,
            render::HEIGHT as u32,
            canvas.pixels(),
        )?;
        Ok(Artifact::png(bytes))
    }
}

impl ChallengeGenerator for ImageCaptcha {
    fn generate(&self, length: usize) -> Result<Challenge, CaptchaError> {
        self.generate_with(&mut rand::thread_rng(), length)
    }
}
