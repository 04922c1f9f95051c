//! Runtime identifiers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of a runtime family, e.g. `python` or `docgen`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuntimeKind(String);

impl RuntimeKind {
    /// Create new kind; names are case-insensitive
    #[must_use]
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_ascii_lowercase())
    }

    /// Kind name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RuntimeKind {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for RuntimeKind {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}
