//! Host input surface backed by the terminal transcript

use async_trait::async_trait;
use livecell_core::{HostError, HostInputSurface};
use parking_lot::Mutex;

/// Chat input emulation: keeps the draft in memory, records submissions
#[derive(Debug, Default)]
pub(crate) struct TranscriptInput {
    draft: Mutex<String>,
    submitted: Mutex<Vec<String>>,
}

impl TranscriptInput {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Text left in the draft
    pub(crate) fn draft(&self) -> String {
        self.draft.lock().clone()
    }

    /// Messages sent so far
    pub(crate) fn submitted(&self) -> Vec<String> {
        self.submitted.lock().clone()
    }
}

#[async_trait]
impl HostInputSurface for TranscriptInput {
    async fn pending_text(&self) -> Result<String, HostError> {
        Ok(self.draft())
    }

    async fn replace_text(&self, text: &str) -> Result<(), HostError> {
        tracing::debug!("Host input now holds {} chars", text.chars().count());
        *self.draft.lock() = text.to_string();
        Ok(())
    }

    async fn submit(&self) -> Result<(), HostError> {
        let message = std::mem::take(&mut *self.draft.lock());
        if message.trim().is_empty() {
            return Err(HostError::Rejected("empty message".into()));
        }
        self.submitted.lock().push(message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn append_then_submit() {
        let input = TranscriptInput::new();
        input.replace_text("draft").await.unwrap();
        assert_eq!(input.append("42").await.unwrap(), "draft\n42");
        input.submit().await.unwrap();
        assert_eq!(input.submitted(), vec!["draft\n42".to_string()]);
        assert_eq!(input.draft(), "");
    }

    #[tokio::test]
    async fn empty_submit_rejected() {
        let input = TranscriptInput::new();
        assert!(input.submit().await.is_err());
        assert!(input.submitted().is_empty());
    }
}
