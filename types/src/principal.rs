//! Principal identity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A member of the shared space, identified by its platform id.
///
/// The gate tracks nothing about a principal beyond this identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(u64);

impl Principal {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Return the raw platform id.
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Principal {
    fn from(id: u64) -> Self {
        Self::new(id)
    }
}
