//! Error types for the cell manager
//!
//! Provides error handling for:
//! - Operations on unknown or busy cells
//! - Runtime lookup and readiness
//! - Host input failures
//! - Configuration loading
//!
//! Failures that belong to a cell are never returned as errors; they are
//! stored on the cell as a [`Diagnostic`].

use crate::host::HostError;
use crate::identity::CellId;
use crate::state::RunStatus;
use livecell_magic::ParseWarning;
use livecell_runtime::{ExecutionFailure, FailureCategory, RuntimeKind};
use serde::{Deserialize, Serialize};

/// Cell manager errors
#[derive(Debug, thiserror::Error)]
pub enum CellError {
    /// No cell with this id is mounted
    #[error("unknown cell: {0}")]
    UnknownCell(CellId),

    /// No runtime registered for a kind or language
    #[error("no runtime registered for '{0}'")]
    UnknownRuntime(String),

    /// Runtime still bootstrapping
    #[error("runtime '{kind}' is still loading")]
    RuntimeNotReady { kind: RuntimeKind },

    /// A run of this cell is already in progress
    #[error("cell {0} is already running")]
    RunInProgress(CellId),

    /// Nothing to run
    #[error("cell {0} has no code to run")]
    EmptySource(CellId),

    /// Illegal run status change
    #[error("illegal run status transition: {from:?} -> {to:?}")]
    IllegalTransition { from: RunStatus, to: RunStatus },

    /// Host input failed
    #[error("host input error: {0}")]
    Host(#[from] HostError),

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(String),
}

impl CellError {
    /// Check if a retry later may succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RuntimeNotReady { .. } | Self::RunInProgress(_))
    }

    /// Check if the cell is unknown
    #[inline]
    #[must_use]
    pub fn is_unknown_cell(&self) -> bool {
        matches!(self, Self::UnknownCell(_))
    }
}

/// User-facing error class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Malformed directive, annotated inline
    ParseWarning,
    /// Template or library fetch failure
    LoadError,
    /// Required directive or data missing at run time
    MissingInput,
    /// Exception during execution
    Runtime,
    /// Runtime failed to load
    Bootstrap,
}

impl ErrorClass {
    /// Class of a failure category
    #[must_use]
    pub fn of(category: FailureCategory) -> Self {
        match category {
            FailureCategory::TemplateLoadError => Self::LoadError,
            FailureCategory::MissingDirective | FailureCategory::MissingData => Self::MissingInput,
            FailureCategory::RuntimeError => Self::Runtime,
            FailureCategory::BootstrapError => Self::Bootstrap,
        }
    }
}

/// Inspectable failure attached to a cell
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Error class shown to the user
    pub class: ErrorClass,
    /// Failure category, if the engine reported one
    pub category: Option<FailureCategory>,
    /// Human-readable message
    pub message: String,
    /// Expected syntax or next step
    pub hint: Option<String>,
    /// Structured trace
    pub trace: Option<String>,
    /// User may dismiss it
    pub dismissible: bool,
}

impl Diagnostic {
    /// Create new diagnostic
    #[inline]
    #[must_use]
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            category: None,
            message: message.into(),
            hint: None,
            trace: None,
            dismissible: class == ErrorClass::LoadError,
        }
    }

    /// Set the category
    #[inline]
    #[must_use]
    pub fn with_category(mut self, category: FailureCategory) -> Self {
        self.category = Some(category);
        self
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

    /// Template fetch failure
    #[must_use]
    pub fn load_error(url: &str, reason: impl std::fmt::Display) -> Self {
        Self::new(ErrorClass::LoadError, format!("failed to load {url}: {reason}"))
            .with_category(FailureCategory::TemplateLoadError)
            .with_hint("check the #%load URL and run the cell again")
    }

    /// Parser warning
    #[must_use]
    pub fn parse_warning(warning: &ParseWarning) -> Self {
        Self::new(ErrorClass::ParseWarning, warning.to_string())
    }
}

impl From<&ExecutionFailure> for Diagnostic {
    fn from(failure: &ExecutionFailure) -> Self {
        Self {
            class: ErrorClass::of(failure.category),
            category: Some(failure.category),
            message: failure.message.clone(),
            hint: failure.hint.clone(),
            trace: failure.trace.clone(),
            dismissible: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_map_to_classes() {
        assert_eq!(ErrorClass::of(FailureCategory::MissingData), ErrorClass::MissingInput);
        assert_eq!(ErrorClass::of(FailureCategory::MissingDirective), ErrorClass::MissingInput);
        assert_eq!(ErrorClass::of(FailureCategory::TemplateLoadError), ErrorClass::LoadError);
        assert_eq!(ErrorClass::of(FailureCategory::BootstrapError), ErrorClass::Bootstrap);
    }

    #[test]
    fn load_errors_are_dismissible() {
        let diag = Diagnostic::load_error("https://x/t.py", "HTTP 404");
        assert!(diag.dismissible);
        assert_eq!(diag.category, Some(FailureCategory::TemplateLoadError));
        assert!(diag.message.contains("HTTP 404"));

        let runtime = Diagnostic::new(ErrorClass::Runtime, "boom");
        assert!(!runtime.dismissible);
    }

    #[test]
    fn diagnostic_from_failure() {
        let failure = ExecutionFailure {
            category: FailureCategory::MissingData,
            message: "no json_data_for_template block found".into(),
            hint: Some("json_data_for_template = {}".into()),
            trace: None,
        };
        let diag = Diagnostic::from(&failure);
        assert_eq!(diag.class, ErrorClass::MissingInput);
        assert!(diag.message.contains("json_data_for_template"));
    }
}
