//! Runtime adapter trait
//!
//! An adapter wraps one execution engine (an interpreter process, a
//! document generator, ...) behind a uniform async interface. Adapters
//! are shared between cells, so every method takes `&self`.

use crate::error::{RuntimeError, RuntimeFault};
use crate::kind::RuntimeKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// How a runtime treats `#%load` templates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateMode {
    /// Template text is spliced into the editable cell text
    #[default]
    Splice,
    /// Template is fetched by the runtime itself at run time
    Reference,
}

/// Code handed to an adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    /// Cell identifier, used to name artifacts
    pub cell: String,
    /// Current editable text
    pub code: String,
}

impl ExecutionRequest {
    /// Create new request
    #[inline]
    #[must_use]
    pub fn new(cell: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            cell: cell.into(),
            code: code.into(),
        }
    }
}

/// Kind of produced artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Rendered image
    Image,
    /// Generated document
    Document,
    /// Anything else
    Other,
}

impl ArtifactKind {
    /// Guess from a file extension
    #[must_use]
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "png" | "jpg" | "jpeg" | "gif" | "svg" | "webp" => Self::Image,
            "docx" | "pdf" | "odt" | "html" | "md" => Self::Document,
            _ => Self::Other,
        }
    }
}

/// Artifact as returned by the adapter, before the engine assigns an id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawArtifact {
    /// Artifact kind
    pub kind: ArtifactKind,
    /// File name
    pub name: String,
    /// MIME type
    pub mime: String,
    /// Content
    pub bytes: Vec<u8>,
}

impl RawArtifact {
    /// Create new artifact, guessing kind and mime from the name
    #[must_use]
    pub fn from_file(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let name = name.into();
        let ext = name.rsplit_once('.').map(|(_, e)| e).unwrap_or_default();
        Self {
            kind: ArtifactKind::from_extension(ext),
            mime: mime_for(ext).to_string(),
            name,
            bytes,
        }
    }
}

fn mime_for(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "html" => "text/html",
        "md" => "text/markdown",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

/// Binary payload a cell run produced as its result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryPayload {
    /// Suggested download name
    pub file_name: String,
    /// MIME type
    pub mime: String,
    /// Content
    pub bytes: Vec<u8>,
}

/// Everything an adapter returns from one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawOutput {
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
    /// Artifacts in production order
    pub artifacts: Vec<RawArtifact>,
    /// Generated document, if any
    pub binary: Option<BinaryPayload>,
}

impl RawOutput {
    /// Output carrying only stdout
    #[must_use]
    pub fn stdout(text: impl Into<String>) -> Self {
        Self {
            stdout: text.into(),
            ..Self::default()
        }
    }
}

/// Execution engine behind a runtime kind
#[async_trait]
pub trait RuntimeAdapter: Send + Sync + std::fmt::Debug {
    /// Runtime kind served by this adapter
    fn kind(&self) -> RuntimeKind;

    /// Fence languages routed to this adapter
    fn languages(&self) -> Vec<String>;

    /// Load the interpreter or engine
    async fn load_core(&self) -> Result<(), RuntimeError>;

    /// Optional libraries loaded after the core
    fn libraries(&self) -> Vec<String> {
        Vec::new()
    }

    /// Load one library
    async fn load_library(&self, _name: &str) -> Result<(), RuntimeError> {
        Ok(())
    }

    /// Whether the core is loaded and runs can be served
    fn is_ready(&self) -> bool;

    /// Run one cell's code
    ///
    /// `Err` means the code itself failed; `Ok` may still carry stderr.
    async fn run(&self, request: &ExecutionRequest) -> Result<RawOutput, RuntimeFault>;

    /// Clear per-run artifact state (figures, temp files)
    async fn reset_artifacts(&self) {}

    /// How `#%load` is handled
    fn template_mode(&self) -> TemplateMode {
        TemplateMode::Splice
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_from_file_guesses_kind() {
        let png = RawArtifact::from_file("figure_0.png", vec![1, 2]);
        assert_eq!(png.kind, ArtifactKind::Image);
        assert_eq!(png.mime, "image/png");

        let doc = RawArtifact::from_file("report.docx", Vec::new());
        assert_eq!(doc.kind, ArtifactKind::Document);

        let other = RawArtifact::from_file("data", Vec::new());
        assert_eq!(other.kind, ArtifactKind::Other);
        assert_eq!(other.mime, "application/octet-stream");
    }
}
