//! Execution engine
//!
//! Wraps a single adapter run: captures stdout/stderr, converts faults and
//! adapter panics into a failed [`ExecutionResult`], assigns artifact ids,
//! bounds the displayed text, and always resets per-run artifact state
//! before returning.

use crate::adapter::{ArtifactKind, BinaryPayload, ExecutionRequest, RawArtifact};
use crate::bootstrap::ReadyHandle;
use crate::error::{FailureCategory, RuntimeFault};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::time::Instant;

/// Default limit for displayed output, in characters
pub const DEFAULT_MAX_OUTPUT_CHARS: usize = 10_000;

/// Shown when a run succeeds without printing anything
pub const NO_OUTPUT_PLACEHOLDER: &str = "Code executed successfully (no output)";

/// Captured output text with a display bound
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedText {
    full: String,
    limit: usize,
}

impl CapturedText {
    /// Create new captured text
    #[must_use]
    pub fn new(full: impl Into<String>, limit: usize) -> Self {
        Self {
            full: full.into(),
            limit,
        }
    }

    /// Untruncated text
    #[inline]
    #[must_use]
    pub fn full(&self) -> &str {
        &self.full
    }

    /// Length in characters
    #[must_use]
    pub fn char_count(&self) -> usize {
        self.full.chars().count()
    }

    /// Whether the display form is cut
    #[must_use]
    pub fn is_truncated(&self) -> bool {
        self.full.chars().nth(self.limit).is_some()
    }

    /// Whether nothing was captured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.full.trim().is_empty()
    }

    /// Bounded text for display, with a notice when cut
    #[must_use]
    pub fn display(&self) -> String {
        match self.full.char_indices().nth(self.limit) {
            Some((cut, _)) => format!(
                "{}\n\n... output truncated (showing {} of {} characters)",
                &self.full[..cut],
                self.limit,
                self.char_count()
            ),
            None => self.full.clone(),
        }
    }
}

/// Output artifact with a stable id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// `<cell>-artifact-<index>-<hash>`
    pub id: String,
    /// Artifact kind
    pub kind: ArtifactKind,
    /// File name
    pub name: String,
    /// MIME type
    pub mime: String,
    /// Content
    pub bytes: Vec<u8>,
}

/// Failure attached to a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionFailure {
    /// Failure category
    pub category: FailureCategory,
    /// Human-readable message
    pub message: String,
    /// Expected syntax or next step
    pub hint: Option<String>,
    /// Structured trace
    pub trace: Option<String>,
}

impl From<RuntimeFault> for ExecutionFailure {
    fn from(fault: RuntimeFault) -> Self {
        Self {
            category: fault.category,
            message: fault.message,
            hint: fault.hint,
            trace: fault.trace,
        }
    }
}

/// Result of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Captured output, bounded for display
    pub text: CapturedText,
    /// Artifacts with stable ids
    pub artifacts: Vec<Artifact>,
    /// Generated document, if any
    pub binary: Option<BinaryPayload>,
    /// Wall time of the run
    pub duration_ms: u64,
    /// Set when the run failed
    pub error: Option<ExecutionFailure>,
}

impl ExecutionResult {
    /// Run finished without a failure
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Text for the output area
    #[must_use]
    pub fn display_text(&self) -> String {
        if self.text.is_empty() && self.is_success() && self.artifacts.is_empty() {
            NO_OUTPUT_PLACEHOLDER.to_string()
        } else {
            self.text.display()
        }
    }

    /// Look up an artifact by id
    #[must_use]
    pub fn artifact(&self, id: &str) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.id == id)
    }
}

/// Runs code on a ready runtime
#[derive(Debug, Clone, Copy)]
pub struct ExecutionEngine {
    max_output_chars: usize,
}

impl Default for ExecutionEngine {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_OUTPUT_CHARS)
    }
}

impl ExecutionEngine {
    /// Create new engine
    #[must_use]
    pub fn new(max_output_chars: usize) -> Self {
        Self { max_output_chars }
    }

    /// Display bound
    #[must_use]
    pub fn max_output_chars(&self) -> usize {
        self.max_output_chars
    }

    /// Run one request
    ///
    /// Never fails: faults, panics and unready runtimes all come back as a
    /// result with [`ExecutionResult::error`] set.
    pub async fn execute(&self, ready: &ReadyHandle, request: ExecutionRequest) -> ExecutionResult {
        let started = Instant::now();
        let adapter = &ready.adapter;

        let outcome = if adapter.is_ready() {
            match AssertUnwindSafe(adapter.run(&request)).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(panic) => Err(RuntimeFault::runtime(format!(
                    "runtime panicked: {}",
                    panic_message(panic.as_ref())
                ))),
            }
        } else {
            let reason = ready
                .failure
                .clone()
                .unwrap_or_else(|| format!("runtime '{}' is not loaded", ready.kind));
            Err(RuntimeFault::new(FailureCategory::BootstrapError, reason)
                .with_hint("reload the page or check the runtime installation"))
        };

        adapter.reset_artifacts().await;

        let mut result = match outcome {
            Ok(raw) => {
                let mut text = raw.stdout;
                if !raw.stderr.trim().is_empty() {
                    text.push_str("\nErrors:\n");
                    text.push_str(&raw.stderr);
                }
                ExecutionResult {
                    text: CapturedText::new(text, self.max_output_chars),
                    artifacts: assign_ids(&request.cell, raw.artifacts),
                    binary: raw.binary,
                    duration_ms: 0,
                    error: None,
                }
            }
            Err(fault) => {
                tracing::warn!("Cell {} failed: {}", request.cell, fault);
                let mut text = format!("Execution error: {}", fault.message);
                if let Some(hint) = &fault.hint {
                    text.push_str("\n\n");
                    text.push_str(hint);
                }
                if let Some(trace) = &fault.trace {
                    text.push_str("\n\nTraceback:\n");
                    text.push_str(trace);
                }
                ExecutionResult {
                    text: CapturedText::new(text, self.max_output_chars),
                    artifacts: Vec::new(),
                    binary: None,
                    duration_ms: 0,
                    error: Some(fault.into()),
                }
            }
        };

        result.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        tracing::debug!(
            "Cell {} finished in {}ms ({} chars, {} artifacts)",
            request.cell,
            result.duration_ms,
            result.text.char_count(),
            result.artifacts.len()
        );
        result
    }
}

fn assign_ids(cell: &str, raw: Vec<RawArtifact>) -> Vec<Artifact> {
    raw.into_iter()
        .enumerate()
        .map(|(idx, artifact)| {
            let digest = blake3::hash(&artifact.bytes);
            let short = hex::encode(&digest.as_bytes()[..4]);
            Artifact {
                id: format!("{cell}-artifact-{idx}-{short}"),
                kind: artifact.kind,
                name: artifact.name,
                mime: artifact.mime,
                bytes: artifact.bytes,
            }
        })
        .collect()
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
