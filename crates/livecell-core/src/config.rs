//! Manager configuration

use crate::error::CellError;
use livecell_runtime::DEFAULT_MAX_OUTPUT_CHARS;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Configuration for [`crate::CellManager`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Displayed output limit, in characters
    pub max_output_chars: usize,
    /// Origin used to resolve `#%load` URLs
    pub host_origin: String,
    /// Start loading every runtime as soon as it is registered
    pub eager_bootstrap: bool,
    /// Capacity of the cell event channel
    pub event_capacity: usize,
    /// Extra fence language -> runtime kind aliases
    pub languages: BTreeMap<String, String>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_output_chars: DEFAULT_MAX_OUTPUT_CHARS,
            host_origin: "http://localhost".to_string(),
            eager_bootstrap: true,
            event_capacity: 256,
            languages: BTreeMap::new(),
        }
    }
}

impl ManagerConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set output limit
    #[inline]
    #[must_use]
    pub fn with_max_output_chars(mut self, chars: usize) -> Self {
        self.max_output_chars = chars;
        self
    }

    /// Set host origin
    #[inline]
    #[must_use]
    pub fn with_host_origin(mut self, origin: impl Into<String>) -> Self {
        self.host_origin = origin.into();
        self
    }

    /// Set eager bootstrap
    #[inline]
    #[must_use]
    pub fn with_eager_bootstrap(mut self, eager: bool) -> Self {
        self.eager_bootstrap = eager;
        self
    }

    /// Set event channel capacity
    #[inline]
    #[must_use]
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Map a fence language to a runtime kind
    #[inline]
    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>, kind: impl Into<String>) -> Self {
        self.languages.insert(language.into(), kind.into());
        self
    }

    /// Parse from TOML
    ///
    /// # Errors
    /// Returns [`CellError::Config`] on invalid TOML or values.
    pub fn from_toml_str(text: &str) -> Result<Self, CellError> {
        let config: Self = toml::from_str(text).map_err(|e| CellError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// Returns [`CellError::Config`] if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CellError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| CellError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Check value ranges
    ///
    /// # Errors
    /// Returns [`CellError::Config`] for a zero output limit or an origin
    /// that is not `http(s)://`.
    pub fn validate(&self) -> Result<(), CellError> {
        if self.max_output_chars == 0 {
            return Err(CellError::Config("max_output_chars must be positive".into()));
        }
        if !(self.host_origin.starts_with("http://") || self.host_origin.starts_with("https://")) {
            return Err(CellError::Config(format!(
                "host_origin must start with http:// or https://, got '{}'",
                self.host_origin
            )));
        }
        Ok(())
    }
}
