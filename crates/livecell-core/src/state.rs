//! Per-cell state
//!
//! Run status follows a small state machine:
//!
//! ```text
//! Idle | Succeeded | Failed -> Queued -> Running -> Succeeded | Failed
//! Succeeded | Failed -> Idle            (clear output)
//! ```

use crate::error::{CellError, Diagnostic};
use crate::host::SurfaceId;
use crate::identity::CellId;
use livecell_magic::{ConsumedFlags, MagicCommandSet, ParseWarning};
use livecell_runtime::{ExecutionResult, RuntimeKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Run status of a cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Never run or output cleared
    #[default]
    Idle,
    /// Waiting for the runtime or the run gate
    Queued,
    /// Executing
    Running,
    /// Last run succeeded
    Succeeded,
    /// Last run failed
    Failed,
}

impl RunStatus {
    /// Get allowed transitions from this status
    #[must_use]
    pub fn allowed_transitions(self) -> &'static [RunStatus] {
        match self {
            Self::Idle => &[Self::Queued],
            Self::Queued => &[Self::Running, Self::Failed],
            Self::Running => &[Self::Succeeded, Self::Failed],
            Self::Succeeded | Self::Failed => &[Self::Queued, Self::Idle],
        }
    }

    /// Check if transition is valid
    #[must_use]
    pub fn can_transition_to(self, to: RunStatus) -> bool {
        self.allowed_transitions().contains(&to)
    }

    /// A run is queued or executing
    #[must_use]
    pub fn is_busy(self) -> bool {
        matches!(self, Self::Queued | Self::Running)
    }

    /// Finished one way or the other
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Validate a run status transition
///
/// # Errors
/// Returns [`CellError::IllegalTransition`] if not allowed.
pub fn validate_transition(from: RunStatus, to: RunStatus) -> Result<(), CellError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(CellError::IllegalTransition { from, to })
    }
}

/// One-shot markers; each flips to `true` once and never back
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OneShotFlags {
    autorun_consumed: bool,
    collapse_applied: bool,
    console_consumed: bool,
}

impl OneShotFlags {
    /// Mark autorun dispatched; `true` if this call did it
    pub fn consume_autorun(&mut self) -> bool {
        !std::mem::replace(&mut self.autorun_consumed, true)
    }

    /// Mark collapse applied; `true` if this call did it
    pub fn consume_collapse(&mut self) -> bool {
        !std::mem::replace(&mut self.collapse_applied, true)
    }

    /// Mark console command handled; `true` if this call did it
    pub fn consume_console(&mut self) -> bool {
        !std::mem::replace(&mut self.console_consumed, true)
    }

    /// Autorun was dispatched
    #[must_use]
    pub fn autorun_consumed(&self) -> bool {
        self.autorun_consumed
    }

    /// Automatic collapse was applied
    #[must_use]
    pub fn collapse_applied(&self) -> bool {
        self.collapse_applied
    }

    /// Console command was handled
    #[must_use]
    pub fn console_consumed(&self) -> bool {
        self.console_consumed
    }

    /// View for merging re-parsed directives
    #[must_use]
    pub fn as_consumed(&self) -> ConsumedFlags {
        ConsumedFlags {
            autorun: self.autorun_consumed,
            collapse: self.collapse_applied,
            console: self.console_consumed,
        }
    }
}

/// Mutable state of one mounted cell
#[derive(Debug, Clone)]
pub struct CellState {
    /// Cell identity
    pub id: CellId,
    /// Runtime kind
    pub kind: RuntimeKind,
    /// Surface the cell is mounted under
    pub surface: SurfaceId,
    /// Block text as rendered
    pub source_text: String,
    /// Text in the editor; grows when a template is spliced in
    pub editable_text: String,
    /// Directives in effect
    pub commands: MagicCommandSet,
    /// Warnings raised while parsing
    pub warnings: Vec<ParseWarning>,
    /// Number of times the renderer materialized this id
    pub render_generation: u64,
    /// One-shot markers
    pub flags: OneShotFlags,
    /// Current run status
    pub run_status: RunStatus,
    /// Result of the last completed run
    pub last_output: Option<Arc<ExecutionResult>>,
    /// Failure shown on the cell
    pub diagnostic: Option<Diagnostic>,
    /// Editor body currently hidden
    pub collapsed: bool,
    /// Number of times UI handlers were bound
    pub bind_generation: u64,
}

impl CellState {
    /// Fresh state for a newly materialized cell
    #[must_use]
    pub fn new(id: CellId, kind: RuntimeKind, surface: SurfaceId, raw_text: &str) -> Self {
        let report = livecell_magic::parse_report(raw_text);
        Self {
            id,
            kind,
            surface,
            source_text: raw_text.to_string(),
            editable_text: raw_text.to_string(),
            commands: report.commands,
            warnings: report.warnings,
            render_generation: 1,
            flags: OneShotFlags::default(),
            run_status: RunStatus::Idle,
            last_output: None,
            diagnostic: None,
            collapsed: false,
            bind_generation: 1,
        }
    }

    /// Move to a new run status
    ///
    /// # Errors
    /// Returns [`CellError::IllegalTransition`] if not allowed.
    pub fn transition(&mut self, to: RunStatus) -> Result<(), CellError> {
        validate_transition(self.run_status, to)?;
        self.run_status = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::identify;

    #[test]
    fn run_status_transitions() {
        use RunStatus::*;
        assert!(validate_transition(Idle, Queued).is_ok());
        assert!(validate_transition(Queued, Running).is_ok());
        assert!(validate_transition(Running, Succeeded).is_ok());
        assert!(validate_transition(Failed, Queued).is_ok());
        assert!(validate_transition(Succeeded, Idle).is_ok());
        assert!(validate_transition(Idle, Running).is_err());
        assert!(validate_transition(Running, Queued).is_err());
        assert!(validate_transition(Running, Idle).is_err());
    }

    #[test]
    fn flags_fire_once() {
        let mut flags = OneShotFlags::default();
        assert!(flags.consume_autorun());
        assert!(!flags.consume_autorun());
        assert!(flags.autorun_consumed());
        assert!(!flags.collapse_applied());
        assert!(flags.consume_console());
        assert_eq!(
            flags.as_consumed(),
            ConsumedFlags {
                autorun: true,
                collapse: false,
                console: true
            }
        );
    }

    #[test]
    fn new_state_parses_directives() {
        let text = "#%autorun\n#%collapse\nprint(1)";
        let state = CellState::new(identify(text, 0), "python".into(), "s".into(), text);
        assert!(state.commands.autorun);
        assert!(state.commands.collapse);
        assert_eq!(state.run_status, RunStatus::Idle);
        assert_eq!(state.render_generation, 1);
        assert!(!state.collapsed);
    }
}
