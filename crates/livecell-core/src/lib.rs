//! Live code cell lifecycle manager
//!
//! Turns fenced code blocks of a rendered document into stateful,
//! executable cells:
//! - stable identity across re-renders ([`identify`])
//! - one-shot directives (`#%autorun`, `#%collapse`, console forwarding)
//!   fired at most once per cell id
//! - shared runtime bootstrap, bounded output capture
//! - re-activation when the host surface becomes visible again
//!
//! # Example
//!
//! ```rust,no_run
//! use livecell_core::prelude::*;
//! use livecell_runtime::{HttpTemplateFetcher, ProcessRuntime, ProcessRuntimeConfig};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = CellManager::new(
//!     ManagerConfig::default(),
//!     Arc::new(HttpTemplateFetcher::new(Duration::from_secs(10))?),
//!     Arc::new(NullInputSurface),
//! );
//! manager.register_runtime(Arc::new(ProcessRuntime::new(ProcessRuntimeConfig::python())));
//!
//! let ctx = RenderContext::rendered("message-1");
//! let mount = manager.on_fenced_block("python", "#%autorun\nprint(1 + 1)", 0, &ctx);
//! manager.settle().await;
//! # let _ = mount;
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod config;
pub mod console;
pub mod error;
pub mod host;
pub mod identity;
pub mod lifecycle;
pub mod reactivation;
pub mod registry;
pub mod state;
pub mod view;

pub use config::ManagerConfig;
pub use console::{compose_message, extract_console_text, ConsoleBridge, ForwardOutcome};
pub use error::{CellError, Diagnostic, ErrorClass};
pub use host::{
    HostError, HostInputSurface, HostSurfaceModeEvents, NullInputSurface, RenderContext,
    SurfaceId, SurfaceMode, SurfaceModeEvent,
};
pub use identity::{identify, CellId};
pub use lifecycle::{CellManager, ManagerStats, MaterializeRequest};
pub use reactivation::{ReactivationController, ReactivationReport};
pub use registry::{CellEntry, CellRegistry, ProcessedIds};
pub use state::{CellState, OneShotFlags, RunStatus};
pub use view::{CellEvent, MountPoint, RunControl};

/// Common imports
pub mod prelude {
    pub use crate::config::ManagerConfig;
    pub use crate::error::{CellError, Diagnostic};
    pub use crate::host::{
        HostInputSurface, HostSurfaceModeEvents, NullInputSurface, RenderContext, SurfaceMode,
    };
    pub use crate::identity::{identify, CellId};
    pub use crate::lifecycle::CellManager;
    pub use crate::reactivation::ReactivationController;
    pub use crate::state::RunStatus;
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
