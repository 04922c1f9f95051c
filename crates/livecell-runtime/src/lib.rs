//! Runtimes for live code cells
//!
//! This crate provides:
//! - [`RuntimeAdapter`] - uniform interface over an execution engine
//! - [`BootstrapPipeline`] - shared, idempotent runtime loading
//! - [`ExecutionEngine`] - bounded output capture around one run
//! - [`ProcessRuntime`] and [`TemplateRuntime`] - concrete adapters
//! - [`TemplateFetcher`] implementations for `#%load`
//!
//! # Example
//!
//! ```rust,no_run
//! use livecell_runtime::{BootstrapPipeline, ExecutionEngine, ExecutionRequest};
//! use livecell_runtime::process::{ProcessRuntime, ProcessRuntimeConfig};
//! use std::sync::Arc;
//!
//! # async fn demo() {
//! let runtime = Arc::new(ProcessRuntime::new(ProcessRuntimeConfig::python()));
//! let pipeline = BootstrapPipeline::new(runtime, 16);
//! let ready = pipeline.ensure_ready().await;
//!
//! let result = ExecutionEngine::default()
//!     .execute(&ready, ExecutionRequest::new("cell-1", "print(1 + 1)"))
//!     .await;
//! assert_eq!(result.text.full().trim(), "2");
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod adapter;
pub mod bootstrap;
pub mod docgen;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod kind;
pub mod process;

pub use adapter::{
    ArtifactKind, BinaryPayload, ExecutionRequest, RawArtifact, RawOutput, RuntimeAdapter,
    TemplateMode,
};
pub use bootstrap::{
    validate_transition, BootstrapEvent, BootstrapPhase, BootstrapPipeline, BootstrapStatus,
    ReadyHandle,
};
pub use docgen::TemplateRuntime;
pub use engine::{
    Artifact, CapturedText, ExecutionEngine, ExecutionFailure, ExecutionResult,
    DEFAULT_MAX_OUTPUT_CHARS, NO_OUTPUT_PLACEHOLDER,
};
pub use error::{BootstrapError, FailureCategory, FetchError, RuntimeError, RuntimeFault};
pub use fetch::{CachedFetcher, FileTemplateFetcher, HttpTemplateFetcher, TemplateFetcher};
pub use kind::RuntimeKind;
pub use process::{LibrarySpec, ProcessRuntime, ProcessRuntimeConfig};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
