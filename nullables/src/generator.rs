//! Nullable challenge generator with scripted tokens, placeholder artifacts.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use warden_captcha::{Artifact, CaptchaError, Challenge, ChallengeGenerator};

#[derive(Default)]
struct State {
    script: VecDeque<String>,
    issued: Vec<String>,
    counter: u64,
}

/// A generator that hands out pre-scripted tokens.
///
/// Once the script runs out it falls back to numbered tokens of the requested
/// length, so every challenge is still distinct. The artifact bytes are the
/// token itself.
#[derive(Default)]
pub struct NullGenerator {
    state: Mutex<State>,
}

impl NullGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// A generator that returns `tokens` in order.
    pub fn with_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let generator = Self::new();
        for token in tokens {
            generator.push(token);
        }
        generator
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue another scripted token.
    pub fn push(&self, token: impl Into<String>) {
        self.state().script.push_back(token.into());
    }

    /// Every token handed out so far, oldest first.
    pub fn issued(&self) -> Vec<String> {
        self.state().issued.clone()
    }

    pub fn last_issued(&self) -> Option<String> {
        self.state().issued.last().cloned()
    }
}

impl ChallengeGenerator for NullGenerator {
    fn generate(&self, length: usize) -> Result<Challenge, CaptchaError> {
        if length == 0 {
            return Err(CaptchaError::EmptyToken);
        }
        let mut state = self.state();
        let token = match state.script.pop_front() {
            Some(token) => token,
            None => {
                state.counter += 1;
                let digits = format!("{:0>length$}", state.counter);
                digits[digits.len() - length..].to_string()
            }
        };
        state.issued.push(token.clone());
        Ok(Challenge {
            artifact: Artifact::png(token.as_bytes().to_vec()),
            token,
        })
    }
}
