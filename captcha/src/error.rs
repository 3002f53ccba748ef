use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptchaError {
    #[error("token length must be at least 1")]
    EmptyToken,

    #[error("token length {requested} exceeds the renderable maximum of {max}")]
    TooLong { requested: usize, max: usize },

    #[error("character {0:?} has no glyph")]
    NoGlyph(char),

    #[error("PNG encoding failed: {0}")]
    Encode(#[from] std::io::Error),
}
