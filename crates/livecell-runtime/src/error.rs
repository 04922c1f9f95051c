//! Error types for runtimes
//!
//! Provides error handling for:
//! - Runtime and library loading
//! - Template fetching
//! - Faults raised while running a cell
//! - Bootstrap state transitions

use crate::bootstrap::BootstrapPhase;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Errors raised by a runtime adapter outside of cell execution
#[derive(Debug, Clone, thiserror::Error)]
pub enum RuntimeError {
    /// Interpreter or engine could not be loaded
    #[error("failed to load runtime core: {0}")]
    CoreLoad(String),

    /// Optional library could not be loaded
    #[error("failed to load library '{name}': {reason}")]
    LibraryLoad { name: String, reason: String },

    /// Runtime used before it was ready
    #[error("runtime '{0}' is not ready")]
    NotReady(String),

    /// IO failure while preparing the runtime
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for RuntimeError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Template fetch failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Transport-level failure
    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    /// Non-success status
    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    /// URL outside of anything the fetcher can serve
    #[error("cannot fetch {0}")]
    Unsupported(String),

    /// Local file could not be read
    #[error("cannot read {path}: {reason}")]
    Io { path: String, reason: String },
}

/// Illegal bootstrap transition
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BootstrapError {
    /// Phase change not allowed
    #[error("illegal bootstrap transition: {from:?} -> {to:?}")]
    IllegalTransition {
        from: BootstrapPhase,
        to: BootstrapPhase,
    },
}

/// Failure category attached to a failed run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureCategory {
    /// Referenced template could not be fetched
    TemplateLoadError,
    /// A required directive (e.g. `#%load`) is absent
    MissingDirective,
    /// A required data block is absent or invalid
    MissingData,
    /// Exception or non-zero exit while running code
    RuntimeError,
    /// Runtime failed to load; execution is best-effort
    BootstrapError,
}

impl FailureCategory {
    /// Stable kebab-case name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TemplateLoadError => "template-load-error",
            Self::MissingDirective => "missing-directive",
            Self::MissingData => "missing-data",
            Self::RuntimeError => "runtime-error",
            Self::BootstrapError => "bootstrap-error",
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fault raised by an adapter while running code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeFault {
    /// Classification
    pub category: FailureCategory,
    /// Human-readable message
    pub message: String,
    /// Expected syntax or next step for the user
    pub hint: Option<String>,
    /// Structured trace, when the runtime provides one
    pub trace: Option<String>,
}

impl RuntimeFault {
    /// Create new fault
    #[inline]
    #[must_use]
    pub fn new(category: FailureCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            hint: None,
            trace: None,
        }
    }

    /// Runtime-level fault
    #[inline]
    #[must_use]
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(FailureCategory::RuntimeError, message)
    }

    /// Add a hint
    #[inline]
    #[must_use]
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Add a trace
    #[inline]
    #[must_use]
    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }
}

impl fmt::Display for RuntimeFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.category, self.message)
    }
}

impl std::error::Error for RuntimeFault {}

impl From<FetchError> for RuntimeFault {
    fn from(err: FetchError) -> Self {
        Self::new(FailureCategory::TemplateLoadError, err.to_string())
    }
}
