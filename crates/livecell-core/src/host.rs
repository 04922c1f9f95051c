//! Host collaborator interfaces
//!
//! The manager never touches UI state directly. It writes to the host's
//! input box through [`HostInputSurface`] and learns about surface
//! visibility from typed [`SurfaceModeEvent`]s.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

/// Host input errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    /// Input box missing or detached
    #[error("host input unavailable: {0}")]
    Unavailable(String),

    /// Host refused the change
    #[error("host rejected input: {0}")]
    Rejected(String),
}

/// Conversation input box of the host
///
/// Every method resolves once the host UI has committed the change, so
/// callers never need fixed settle delays.
#[async_trait]
pub trait HostInputSurface: Send + Sync + fmt::Debug {
    /// Unsent text currently in the input
    async fn pending_text(&self) -> Result<String, HostError>;

    /// Replace the input text
    async fn replace_text(&self, text: &str) -> Result<(), HostError>;

    /// Submit the input
    async fn submit(&self) -> Result<(), HostError>;

    /// Append `text`, keeping unsent content; returns the new input text
    async fn append(&self, text: &str) -> Result<String, HostError> {
        let existing = self.pending_text().await?;
        let joined = if existing.trim().is_empty() {
            text.to_string()
        } else {
            format!("{existing}\n{text}")
        };
        self.replace_text(&joined).await?;
        Ok(joined)
    }
}

/// Host without an input box
#[derive(Debug, Default, Clone, Copy)]
pub struct NullInputSurface;

#[async_trait]
impl HostInputSurface for NullInputSurface {
    async fn pending_text(&self) -> Result<String, HostError> {
        Err(HostError::Unavailable("no input surface".into()))
    }

    async fn replace_text(&self, _text: &str) -> Result<(), HostError> {
        Err(HostError::Unavailable("no input surface".into()))
    }

    async fn submit(&self) -> Result<(), HostError> {
        Err(HostError::Unavailable("no input surface".into()))
    }
}

/// Identifier of a host surface (a message bubble, a document pane)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SurfaceId(String);

impl SurfaceId {
    /// Create new surface id
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Id as string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SurfaceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Display mode of a host surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceMode {
    /// Raw source shown
    Source,
    /// Rendered and visible
    Rendered,
    /// Partial content still arriving
    Streaming,
}

/// Mode change reported by the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceModeEvent {
    /// Surface that changed
    pub surface: SurfaceId,
    /// New mode
    pub mode: SurfaceMode,
}

/// Broadcast channel of surface mode changes
#[derive(Debug, Clone)]
pub struct HostSurfaceModeEvents {
    sender: broadcast::Sender<SurfaceModeEvent>,
}

impl Default for HostSurfaceModeEvents {
    fn default() -> Self {
        Self::new(64)
    }
}

impl HostSurfaceModeEvents {
    /// Create new channel
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Report a mode change; returns the number of listeners reached
    pub fn publish(&self, surface: impl Into<SurfaceId>, mode: SurfaceMode) -> usize {
        self.sender
            .send(SurfaceModeEvent {
                surface: surface.into(),
                mode,
            })
            .unwrap_or(0)
    }

    /// Subscribe to mode changes
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SurfaceModeEvent> {
        self.sender.subscribe()
    }
}

/// Where a fenced block is being rendered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderContext {
    /// Surface the block belongs to
    pub surface: SurfaceId,
    /// Surface still receiving content
    pub streaming: bool,
}

impl RenderContext {
    /// Rendering into a finished surface
    #[must_use]
    pub fn rendered(surface: impl Into<SurfaceId>) -> Self {
        Self {
            surface: surface.into(),
            streaming: false,
        }
    }

    /// Rendering a partial, still streaming surface
    #[must_use]
    pub fn streaming(surface: impl Into<SurfaceId>) -> Self {
        Self {
            surface: surface.into(),
            streaming: true,
        }
    }
}
