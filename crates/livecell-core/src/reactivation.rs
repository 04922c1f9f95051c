//! Re-activation on host surface mode changes
//!
//! When a surface becomes visible again its cells get their UI handlers
//! re-bound. Cells that mounted while their runtime was loading and were
//! never activated get activated here once the runtime is ready.

use crate::host::{SurfaceId, SurfaceMode, SurfaceModeEvent};
use crate::identity::CellId;
use crate::lifecycle::CellManager;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// What one mode change did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReactivationReport {
    /// Cells whose handlers were re-bound
    pub rebound: Vec<CellId>,
    /// Cells activated for the first time
    pub activated: Vec<CellId>,
}

impl ReactivationReport {
    /// Nothing happened
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rebound.is_empty() && self.activated.is_empty()
    }
}

/// Watches surface modes and re-attaches cells
#[derive(Debug)]
pub struct ReactivationController {
    manager: CellManager,
    modes: Mutex<HashMap<SurfaceId, SurfaceMode>>,
}

impl ReactivationController {
    /// Create new controller
    #[must_use]
    pub fn new(manager: CellManager) -> Self {
        Self {
            manager,
            modes: Mutex::new(HashMap::new()),
        }
    }

    /// Last known mode of a surface
    #[must_use]
    pub fn mode(&self, surface: &SurfaceId) -> Option<SurfaceMode> {
        self.modes.lock().get(surface).copied()
    }

    /// Handle a mode change
    ///
    /// Acts only on a transition into `Rendered`. Leaving `Rendered`,
    /// entering `Streaming` and repeated `Rendered` reports only record
    /// the mode.
    /// First-render work of newly activated cells runs on spawned tasks;
    /// use [`CellManager::settle`] to wait for it.
    pub fn on_host_mode_changed(&self, surface: SurfaceId, mode: SurfaceMode) -> ReactivationReport {
        let previous = self.modes.lock().insert(surface.clone(), mode);
        if mode != SurfaceMode::Rendered || previous == Some(SurfaceMode::Rendered) {
            return ReactivationReport::default();
        }

        let mut report = ReactivationReport::default();
        for id in self.manager.registry().cells_on(&surface) {
            if self.manager.rebind(id).is_err() {
                continue;
            }
            report.rebound.push(id);

            let Some(kind) = self.manager.state(id).map(|s| s.kind) else {
                continue;
            };
            let ready = self
                .manager
                .pipeline(&kind)
                .is_some_and(|p| p.is_ready());
            if ready
                && !self.manager.registry().processed().contains(&id)
                && self.manager.spawn_first_render(id)
            {
                report.activated.push(id);
            }
        }

        tracing::debug!(
            "Surface {} rendered: {} rebound, {} activated",
            surface,
            report.rebound.len(),
            report.activated.len()
        );
        report
    }

    /// Drive the controller from a mode event stream until it closes
    pub fn spawn(self: Arc<Self>, mut events: broadcast::Receiver<SurfaceModeEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        self.on_host_mode_changed(event.surface, event.mode);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Missed {} surface mode events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        })
    }
}
