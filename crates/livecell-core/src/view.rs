//! UI-facing values: mount points, run controls and cell events

use crate::console::ForwardOutcome;
use crate::error::Diagnostic;
use crate::identity::CellId;
use crate::state::RunStatus;
use livecell_runtime::{BootstrapPhase, BootstrapStatus};
use serde::{Deserialize, Serialize};

/// Label while the runtime is loading
pub const LABEL_LOADING: &str = "Loading libraries…";
/// Label while the cell is executing
pub const LABEL_RUNNING: &str = "Running…";
/// Label when a run can be started
pub const LABEL_RUN: &str = "Run";

/// State of a cell's run button
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunControl {
    /// Button can be pressed
    pub enabled: bool,
    /// Button label
    pub label: String,
    /// Explanation shown on hover
    pub tooltip: Option<String>,
}

impl RunControl {
    /// Derive the control from runtime and cell status
    #[must_use]
    pub fn derive(bootstrap: &BootstrapStatus, run_status: RunStatus) -> Self {
        if !bootstrap.is_ready() {
            let tooltip = match bootstrap.phase {
                BootstrapPhase::NotStarted => "Runtime not started yet",
                BootstrapPhase::LoadingCore => "Loading runtime",
                BootstrapPhase::Failed => "Runtime failed to load",
                BootstrapPhase::LoadingLibraries | BootstrapPhase::Ready => "Loading libraries",
            };
            return Self {
                enabled: false,
                label: LABEL_LOADING.to_string(),
                tooltip: Some(tooltip.to_string()),
            };
        }

        if run_status.is_busy() {
            return Self {
                enabled: false,
                label: LABEL_RUNNING.to_string(),
                tooltip: None,
            };
        }

        let tooltip = bootstrap.degraded.then(|| {
            format!(
                "Runtime failed to load ({}); runs will report the error",
                bootstrap.failure.as_deref().unwrap_or("unknown reason")
            )
        });
        Self {
            enabled: true,
            label: LABEL_RUN.to_string(),
            tooltip,
        }
    }
}

/// Where the renderer mounts a cell widget
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountPoint {
    /// Cell identity
    pub id: CellId,
    /// Widget already existed and is reused
    pub reused: bool,
    /// Editor body hidden at first paint
    pub collapsed: bool,
    /// Initial run control
    pub run_control: RunControl,
}

/// Notifications for a UI layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellEvent {
    /// Cell mounted or reused
    Mounted { id: CellId, reused: bool },
    /// Run status changed
    StatusChanged { id: CellId, status: RunStatus },
    /// Editor collapsed or expanded
    Collapsed { id: CellId, collapsed: bool },
    /// UI handlers re-attached
    Rebound { id: CellId, generation: u64 },
    /// Run finished
    OutputReady { id: CellId, success: bool },
    /// Output forwarded to the host input
    ConsoleForwarded { id: CellId, outcome: ForwardOutcome },
    /// Failure attached to the cell
    Diagnostic { id: CellId, diagnostic: Diagnostic },
    /// Cell removed
    Unmounted { id: CellId },
}

impl CellEvent {
    /// Cell the event is about
    #[must_use]
    pub fn cell(&self) -> CellId {
        match self {
            Self::Mounted { id, .. }
            | Self::StatusChanged { id, .. }
            | Self::Collapsed { id, .. }
            | Self::Rebound { id, .. }
            | Self::OutputReady { id, .. }
            | Self::ConsoleForwarded { id, .. }
            | Self::Diagnostic { id, .. }
            | Self::Unmounted { id } => *id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(phase: BootstrapPhase, degraded: bool) -> BootstrapStatus {
        BootstrapStatus {
            phase,
            degraded,
            failure: degraded.then(|| "no interpreter".to_string()),
            ..BootstrapStatus::default()
        }
    }

    #[test]
    fn loading_disables_control() {
        let control = RunControl::derive(&status(BootstrapPhase::LoadingLibraries, false), RunStatus::Idle);
        assert!(!control.enabled);
        assert_eq!(control.label, LABEL_LOADING);
    }

    #[test]
    fn running_disables_control() {
        let control = RunControl::derive(&status(BootstrapPhase::Ready, false), RunStatus::Running);
        assert!(!control.enabled);
        assert_eq!(control.label, LABEL_RUNNING);
    }

    #[test]
    fn degraded_keeps_control_with_tooltip() {
        let control = RunControl::derive(&status(BootstrapPhase::Ready, true), RunStatus::Failed);
        assert!(control.enabled);
        assert_eq!(control.label, LABEL_RUN);
        assert!(control.tooltip.unwrap().contains("no interpreter"));
    }
}
