//! Shared utilities for the Warden membership gate.

pub mod logging;
pub mod time;

pub use logging::{init_logging, LogFormat};
pub use time::{format_duration, whole_secs_ceil};
